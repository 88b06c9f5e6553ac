pub mod checkpoint;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod runner;
pub mod step;

pub use checkpoint::StepAction;
pub use command::{CommandStepRunner, Invocation, ToolCommand};
pub use config::PipelineConfig;
pub use context::JobContext;
pub use error::PipelineError;
pub use runner::{PipelineExecutor, PipelineOutcome};
pub use step::{StepOutcome, StepRunner};
