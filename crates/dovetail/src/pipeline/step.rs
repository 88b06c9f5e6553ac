use std::path::PathBuf;

use crate::queue::Step;

use super::context::JobContext;

/// Result of one step. Failures carry a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub success: bool,
    pub artifact: Option<PathBuf>,
    pub reason: Option<String>,
}

impl StepOutcome {
    pub fn succeeded(artifact: impl Into<PathBuf>) -> Self {
        Self {
            success: true,
            artifact: Some(artifact.into()),
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            artifact: None,
            reason: Some(reason.into()),
        }
    }
}

/// Executes the media operation behind a pipeline step.
///
/// Implementations must report tool failures through [`StepOutcome`]
/// rather than panicking.
pub trait StepRunner: Send + Sync {
    fn run_step(&self, step: Step, ctx: &JobContext) -> StepOutcome;
}
