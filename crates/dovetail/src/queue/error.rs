//! Queue store error types.

use std::path::PathBuf;
use thiserror::Error;

use super::record::JobId;

/// Errors from queue store transactions and queue operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO error reading, writing or renaming the queue document.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The advisory lock on the lock file could not be acquired or released.
    #[error("Failed to lock '{path}': {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize queue state: {0}")]
    Serialize(#[from] serde_json::Error),

    /// `execute_with_lock` was called from inside a running transaction.
    #[error("Re-entrant queue transaction on the same thread")]
    Reentrant,

    #[error("Job {0} not found")]
    JobNotFound(JobId),

    #[error("No job for input path '{0}'")]
    InputPathNotFound(String),

    /// Paths are stored as UTF-8 strings; anything else cannot round-trip.
    #[error("Path '{}' is not valid UTF-8", .0.display())]
    NonUtf8Path(PathBuf),

    #[error("Input path '{}' has no file name", .0.display())]
    NoFileName(PathBuf),

    /// Reset index outside `1..=len`.
    #[error("Step index {index} out of range (job has {len} steps, indices start at 1)")]
    InvalidStepIndex { index: usize, len: usize },

    #[error("Step '{step}' is not part of job {job_id}")]
    UnknownStep { job_id: JobId, step: String },

    /// A job cannot be marked done while steps are outstanding.
    #[error("Job {0} cannot be marked done: not every step is completed")]
    IncompleteSteps(JobId),
}
