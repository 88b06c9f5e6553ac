//! Claim protocol: quarantine exhausted jobs, then lease the oldest eligible one.

use chrono::{DateTime, Utc};
use tracing::warn;

use super::record::{JobRecord, JobStatus};
use super::retry::RetryPolicy;
use super::state::QueueState;

/// Moves every `failed` job whose retry budget is spent to `failed_permanent`.
/// Returns how many jobs were quarantined.
pub(crate) fn quarantine_exhausted(
    state: &mut QueueState,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> usize {
    let mut quarantined = 0;
    for job in state
        .jobs
        .iter_mut()
        .filter(|job| job.status == JobStatus::Failed && policy.is_exhausted(job.retries))
    {
        warn!(
            job_id = %job.id,
            retries = job.retries,
            "Job {} exceeded {} retries, marking failed_permanent",
            job.input_path,
            policy.max_retries
        );
        job.mark_quarantined(now);
        quarantined += 1;
    }
    quarantined
}

/// Picks the eligible job with the earliest `created_at` (ties broken by id)
/// and leases it to `worker_id`.
pub(crate) fn claim_next(
    state: &mut QueueState,
    policy: &RetryPolicy,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Option<JobRecord> {
    quarantine_exhausted(state, policy, now);

    let job = state
        .jobs
        .iter_mut()
        .filter(|job| job.status.is_claimable())
        .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))?;

    job.start_claim(worker_id, now);
    Some(job.clone())
}
