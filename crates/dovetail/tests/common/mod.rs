//! Shared test utilities for dovetail integration tests.
//!
//! - `TestHarness`: isolated shared/work/RAM/media directories and a config
//!   pointing at them
//! - `ScriptedRunner`: a fake `StepRunner` that writes artifacts and fails or
//!   panics on demand

pub mod harness;
pub mod runner;

pub use harness::TestHarness;
pub use runner::ScriptedRunner;
