use std::path::Path;

use crate::queue::StepStatus;

/// What the executor does with one step on this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    /// Completed and its artifact is still present.
    Skip,
    /// Not completed yet.
    Run,
    /// Marked completed but the artifact is gone.
    Rerun,
}

pub fn decide(status: StepStatus, artifact: &Path) -> StepAction {
    match status {
        StepStatus::Completed if artifact.exists() => StepAction::Skip,
        StepStatus::Completed => StepAction::Rerun,
        StepStatus::Pending | StepStatus::Failed => StepAction::Run,
    }
}
