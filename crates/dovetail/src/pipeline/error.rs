use std::path::PathBuf;
use thiserror::Error;

use crate::queue::StoreError;

/// Fatal pipeline errors. A failing step is not an error; it is reported
/// through [`PipelineOutcome::StepFailed`](super::PipelineOutcome::StepFailed).
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Checkpoint update failed: {0}")]
    Store(#[from] StoreError),

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Input path '{0}' has no file name")]
    InvalidInputPath(PathBuf),
}
