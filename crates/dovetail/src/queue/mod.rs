//! Persistent job queue.
//!
//! [`JobQueue`] is the operational surface used by producers, workers and
//! operators. Every method is one [`QueueStore::execute_with_lock`]
//! transaction, so the shared document stays consistent across processes.

use std::path::Path;

use chrono::{Duration, Utc};
use tracing::{debug, info};

use crate::config::Config;

mod admin;
mod claim;
pub mod error;
pub mod record;
pub mod retry;
pub mod state;
pub mod store;

pub use error::StoreError;
pub use record::{JobId, JobRecord, JobStatus, JobType, Step, StepProgress, StepStatus};
pub use retry::RetryPolicy;
pub use state::{QueueCounts, QueueState};
pub use store::QueueStore;

#[derive(Debug, Clone)]
pub struct JobQueue {
    store: QueueStore,
    policy: RetryPolicy,
}

impl JobQueue {
    pub fn new(store: QueueStore, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            QueueStore::new(config.queue_path(), config.lock_path()),
            RetryPolicy::new(config.queue.max_retries),
        )
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Enqueues `input_path` unless a record for it already exists.
    /// Returns `true` when a new job was created.
    pub fn add_job(&self, input_path: &Path, job_type: JobType) -> Result<bool, StoreError> {
        let key = input_key(input_path)?;
        let added = self.store.execute_with_lock(|state| {
            if state.contains_path(&key) {
                return Ok(false);
            }
            let created_at = state.next_created_at(Utc::now());
            state
                .jobs
                .push(JobRecord::new(key.clone(), job_type, created_at));
            Ok(true)
        })?;

        if added {
            info!("Queued {} ({})", key, job_type);
        } else {
            debug!("Already queued: {}", key);
        }
        Ok(added)
    }

    /// Enqueues a batch in a single transaction. Returns the number of new jobs.
    pub fn add_jobs<I, P>(&self, input_paths: I, job_type: JobType) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let keys = input_paths
            .into_iter()
            .map(|p| input_key(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let added = self.store.execute_with_lock(|state| {
            let now = Utc::now();
            let mut added = 0;
            for key in keys {
                if state.contains_path(&key) {
                    continue;
                }
                let created_at = state.next_created_at(now);
                state.jobs.push(JobRecord::new(key, job_type, created_at));
                added += 1;
            }
            Ok(added)
        })?;

        info!("Queued {} new {} jobs", added, job_type);
        Ok(added)
    }

    /// Quarantines exhausted jobs, then leases the oldest eligible job to
    /// `worker_id`. `None` means nothing is eligible right now.
    pub fn claim_next_available_job(
        &self,
        worker_id: &str,
    ) -> Result<Option<JobRecord>, StoreError> {
        let policy = self.policy;
        let claimed = self
            .store
            .execute_with_lock(|state| Ok(claim::claim_next(state, &policy, worker_id, Utc::now())))?;

        if let Some(job) = &claimed {
            info!(
                job_id = %job.id,
                worker_id,
                attempt = job.retries,
                "Claimed {}",
                job.input_path
            );
        }
        Ok(claimed)
    }

    /// Sets the job status. Marking a job `done` requires every step to be
    /// completed and stamps `completed_at`.
    pub fn update_job_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        output_path: Option<&Path>,
    ) -> Result<(), StoreError> {
        self.store.execute_with_lock(|state| {
            let job = state
                .find_mut(job_id)
                .ok_or(StoreError::JobNotFound(job_id))?;
            if status == JobStatus::Done && !job.steps.all_completed() {
                return Err(StoreError::IncompleteSteps(job_id));
            }

            let now = Utc::now();
            job.status = status;
            job.updated_at = now;
            if let Some(path) = output_path {
                job.output_path = Some(path_key(path)?);
            }
            if status == JobStatus::Done {
                job.completed_at = Some(now);
                job.last_error = None;
            }
            Ok(())
        })?;

        debug!(job_id = %job_id, "Status -> {}", status);
        Ok(())
    }

    /// Marks the job `failed` and records the reason.
    pub fn fail_job(&self, job_id: JobId, reason: &str) -> Result<(), StoreError> {
        self.store.execute_with_lock(|state| {
            let job = state
                .find_mut(job_id)
                .ok_or(StoreError::JobNotFound(job_id))?;
            job.status = JobStatus::Failed;
            job.last_error = Some(reason.to_string());
            job.updated_at = Utc::now();
            Ok(())
        })
    }

    /// Persists one step checkpoint. The step must belong to the job's type.
    pub fn update_job_step_status(
        &self,
        job_id: JobId,
        step: Step,
        status: StepStatus,
    ) -> Result<(), StoreError> {
        self.store.execute_with_lock(|state| {
            let job = state
                .find_mut(job_id)
                .ok_or(StoreError::JobNotFound(job_id))?;
            if !job.steps.set(step, status) {
                return Err(StoreError::UnknownStep {
                    job_id,
                    step: step.to_string(),
                });
            }
            job.updated_at = Utc::now();
            Ok(())
        })?;

        debug!(job_id = %job_id, step = %step, "Step -> {}", status);
        Ok(())
    }

    pub fn get_all_input_paths(&self) -> Result<Vec<String>, StoreError> {
        self.store.execute_with_lock(|state| {
            Ok(state.jobs.iter().map(|job| job.input_path.clone()).collect())
        })
    }

    pub fn get_job(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        self.store
            .execute_with_lock(|state| Ok(state.find(job_id).cloned()))
    }

    /// All jobs in creation order.
    pub fn list_jobs(&self) -> Result<Vec<JobRecord>, StoreError> {
        let mut jobs = self.store.execute_with_lock(|state| Ok(state.jobs.clone()))?;
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    pub fn counts_by_status(&self) -> Result<QueueCounts, StoreError> {
        self.store.execute_with_lock(|state| Ok(state.counts()))
    }

    /// Rolls the job back to the 1-based step `from_step_index`: that step and
    /// every later one become `pending`, the job becomes `failed` with
    /// `retries = 0`. Works on quarantined jobs too.
    pub fn reset_job_progress(
        &self,
        job_id: JobId,
        from_step_index: usize,
    ) -> Result<JobRecord, StoreError> {
        self.store.execute_with_lock(|state| {
            let job = state
                .find_mut(job_id)
                .ok_or(StoreError::JobNotFound(job_id))?;
            admin::reset_job(job, from_step_index, Utc::now())?;
            Ok(job.clone())
        })
    }

    /// Same as [`reset_job_progress`](Self::reset_job_progress), keyed by input path.
    pub fn force_reset_job_progress(
        &self,
        input_path: &Path,
        from_step_index: usize,
    ) -> Result<JobRecord, StoreError> {
        let key = path_key(input_path)?;
        self.store.execute_with_lock(|state| {
            let job = state
                .find_by_path_mut(&key)
                .ok_or_else(|| StoreError::InputPathNotFound(key.clone()))?;
            admin::reset_job(job, from_step_index, Utc::now())?;
            Ok(job.clone())
        })
    }

    /// `running` jobs claimed longer than `threshold` ago. Read-only.
    /// A threshold reaching back past the representable range matches nothing.
    pub fn find_stale_jobs(&self, threshold: Duration) -> Result<Vec<JobRecord>, StoreError> {
        let Some(cutoff) = Utc::now().checked_sub_signed(threshold) else {
            return Ok(Vec::new());
        };
        self.store.execute_with_lock(|state| {
            Ok(state
                .jobs
                .iter()
                .filter(|job| job.status == JobStatus::Running)
                .filter(|job| matches!(job.claimed_at, Some(at) if at < cutoff))
                .cloned()
                .collect())
        })
    }
}

fn path_key(path: &Path) -> Result<String, StoreError> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| StoreError::NonUtf8Path(path.to_path_buf()))
}

/// Key for a new job: UTF-8, with a file stem to name its artifacts after.
fn input_key(path: &Path) -> Result<String, StoreError> {
    let key = path_key(path)?;
    match path.file_stem() {
        Some(stem) if !stem.is_empty() => Ok(key),
        _ => Err(StoreError::NoFileName(path.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn queue(temp: &TempDir) -> JobQueue {
        JobQueue::new(QueueStore::in_dir(temp.path()), RetryPolicy::default())
    }

    #[test]
    fn test_add_job_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let queue = queue(&temp);
        let path = PathBuf::from("/media/movie.mkv");

        assert!(queue.add_job(&path, JobType::Standard).unwrap());
        assert!(!queue.add_job(&path, JobType::Extended).unwrap());

        let jobs = queue.list_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_type, JobType::Standard);
    }

    #[test]
    fn test_add_jobs_skips_known_paths() {
        let temp = TempDir::new().unwrap();
        let queue = queue(&temp);
        queue
            .add_job(Path::new("/media/a.mkv"), JobType::Standard)
            .unwrap();

        let added = queue
            .add_jobs(["/media/a.mkv", "/media/b.mkv", "/media/c.mkv"], JobType::Standard)
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(
            queue.get_all_input_paths().unwrap(),
            vec!["/media/a.mkv", "/media/b.mkv", "/media/c.mkv"]
        );
    }

    #[test]
    fn test_done_requires_completed_steps() {
        let temp = TempDir::new().unwrap();
        let queue = queue(&temp);
        queue
            .add_job(Path::new("/media/a.mkv"), JobType::Standard)
            .unwrap();
        let job = queue.claim_next_available_job("w1").unwrap().unwrap();

        let err = queue
            .update_job_status(job.id, JobStatus::Done, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::IncompleteSteps(_)));
        assert_eq!(
            queue.get_job(job.id).unwrap().unwrap().status,
            JobStatus::Running
        );

        for step in JobType::Standard.steps() {
            queue
                .update_job_step_status(job.id, *step, StepStatus::Completed)
                .unwrap();
        }
        queue
            .update_job_status(job.id, JobStatus::Done, Some(Path::new("/media/a_final.mkv")))
            .unwrap();

        let done = queue.get_job(job.id).unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Done);
        assert!(done.completed_at.is_some());
        assert_eq!(done.output_path.as_deref(), Some("/media/a_final.mkv"));
    }

    #[test]
    fn test_step_outside_job_type_is_rejected() {
        let temp = TempDir::new().unwrap();
        let queue = queue(&temp);
        queue
            .add_job(Path::new("/media/a.mkv"), JobType::Standard)
            .unwrap();
        let job = queue.list_jobs().unwrap().remove(0);

        let err = queue
            .update_job_step_status(job.id, Step::InjectRpu, StepStatus::Completed)
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownStep { .. }));
    }

    #[test]
    fn test_unknown_job_id() {
        let temp = TempDir::new().unwrap();
        let queue = queue(&temp);
        let err = queue
            .update_job_status(JobId::new(), JobStatus::Failed, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::JobNotFound(_)));
    }

    #[test]
    fn test_fail_job_records_reason() {
        let temp = TempDir::new().unwrap();
        let queue = queue(&temp);
        queue
            .add_job(Path::new("/media/a.mkv"), JobType::Standard)
            .unwrap();
        let job = queue.claim_next_available_job("w1").unwrap().unwrap();

        queue.fail_job(job.id, "ffmpeg exited with 1").unwrap();

        let failed = queue.get_job(job.id).unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("ffmpeg exited with 1"));
    }

    #[test]
    fn test_force_reset_unknown_path() {
        let temp = TempDir::new().unwrap();
        let queue = queue(&temp);
        let err = queue
            .force_reset_job_progress(Path::new("/media/missing.mkv"), 1)
            .unwrap_err();
        assert!(matches!(err, StoreError::InputPathNotFound(_)));
    }

    #[test]
    fn test_find_stale_jobs() {
        let temp = TempDir::new().unwrap();
        let queue = queue(&temp);
        queue
            .add_jobs(["/media/a.mkv", "/media/b.mkv"], JobType::Standard)
            .unwrap();
        let stale = queue.claim_next_available_job("w1").unwrap().unwrap();
        queue.claim_next_available_job("w2").unwrap().unwrap();

        queue
            .store()
            .execute_with_lock(|state| {
                let job = state.find_mut(stale.id).unwrap();
                job.claimed_at = Some(Utc::now() - Duration::hours(3));
                Ok(())
            })
            .unwrap();

        let found = queue.find_stale_jobs(Duration::hours(2)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, stale.id);
        assert_eq!(
            queue.get_job(stale.id).unwrap().unwrap().status,
            JobStatus::Running
        );
    }

    #[test]
    fn test_huge_stale_threshold_matches_nothing() {
        let temp = TempDir::new().unwrap();
        let queue = queue(&temp);
        queue
            .add_job(Path::new("/media/a.mkv"), JobType::Standard)
            .unwrap();
        queue.claim_next_available_job("w1").unwrap().unwrap();

        let found = queue
            .find_stale_jobs(Duration::hours(i64::from(u32::MAX)))
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_input_path_without_file_name_is_rejected() {
        let temp = TempDir::new().unwrap();
        let queue = queue(&temp);

        let err = queue.add_job(Path::new("/"), JobType::Standard).unwrap_err();
        assert!(matches!(err, StoreError::NoFileName(_)));

        let err = queue
            .add_jobs(["/media/a.mkv", "/"], JobType::Standard)
            .unwrap_err();
        assert!(matches!(err, StoreError::NoFileName(_)));
        assert!(queue.list_jobs().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_input_path_is_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp = TempDir::new().unwrap();
        let queue = queue(&temp);
        let path = Path::new("/media").join(OsStr::from_bytes(b"caf\xe9.mkv"));

        let err = queue.add_job(&path, JobType::Standard).unwrap_err();
        assert!(matches!(err, StoreError::NonUtf8Path(p) if p == path));
        assert!(queue.list_jobs().unwrap().is_empty());
    }

    #[test]
    fn test_counts_by_status() {
        let temp = TempDir::new().unwrap();
        let queue = queue(&temp);
        queue
            .add_jobs(["/media/a.mkv", "/media/b.mkv", "/media/c.mkv"], JobType::Standard)
            .unwrap();
        queue.claim_next_available_job("w1").unwrap();

        let counts = queue.counts_by_status().unwrap();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.running, 1);
        assert_eq!(counts.total(), 3);
    }
}
