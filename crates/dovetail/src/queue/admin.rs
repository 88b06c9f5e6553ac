//! Operator resets that roll a job's checkpoints back.

use chrono::{DateTime, Utc};
use tracing::info;

use super::error::StoreError;
use super::record::JobRecord;

/// Checks `from_step_index` against the job's step count (1-based, inclusive).
pub(crate) fn validate_step_index(job: &JobRecord, from_step_index: usize) -> Result<(), StoreError> {
    let len = job.steps.len();
    if from_step_index == 0 || from_step_index > len {
        return Err(StoreError::InvalidStepIndex {
            index: from_step_index,
            len,
        });
    }
    Ok(())
}

/// Applies a reset to `job`, bypassing quarantine.
pub(crate) fn reset_job(
    job: &mut JobRecord,
    from_step_index: usize,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    validate_step_index(job, from_step_index)?;
    job.reset_from(from_step_index, now);
    info!(
        job_id = %job.id,
        "Reset {} from step {} ({} steps)",
        job.input_path,
        from_step_index,
        job.steps.len()
    );
    Ok(())
}
