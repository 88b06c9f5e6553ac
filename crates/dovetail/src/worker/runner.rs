use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::logging::JobLog;
use crate::pipeline::{
    JobContext, PipelineConfig, PipelineError, PipelineExecutor, PipelineOutcome, StepRunner,
};
use crate::queue::{JobId, JobQueue, JobRecord, JobStatus};

const SLEEP_SLICE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Keep polling, sleeping between empty claims, until shutdown.
    Poll,
    /// Process at most one job.
    Once,
    /// Process until nothing is eligible.
    Drain,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub completed: usize,
    pub failed: usize,
}

/// `<hostname>-<pid>`.
pub fn default_worker_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown-host".to_string());
    format!("{}-{}", host, std::process::id())
}

/// Claims jobs from the shared queue and runs their pipelines.
pub struct Worker {
    worker_id: String,
    queue: JobQueue,
    executor: PipelineExecutor,
    pipeline_config: PipelineConfig,
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(config: &Config, runner: Arc<dyn StepRunner>, shutdown: Arc<AtomicBool>) -> Self {
        let queue = JobQueue::from_config(config);
        Self {
            worker_id: default_worker_id(),
            executor: PipelineExecutor::new(queue.clone(), runner),
            queue,
            pipeline_config: PipelineConfig::from_config(config),
            poll_interval: config.poll_interval(),
            shutdown,
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn run(&self, mode: RunMode) -> Result<WorkerSummary> {
        info!(worker_id = %self.worker_id, "Worker started ({:?})", mode);
        let mut summary = WorkerSummary::default();

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!(worker_id = %self.worker_id, "Shutdown requested, stopping");
                break;
            }

            match self.queue.claim_next_available_job(&self.worker_id)? {
                Some(job) => {
                    if self.process_job(job)? {
                        summary.completed += 1;
                    } else {
                        summary.failed += 1;
                    }
                    if mode == RunMode::Once {
                        break;
                    }
                }
                None => match mode {
                    RunMode::Poll => self.idle(),
                    RunMode::Once | RunMode::Drain => {
                        info!("No eligible jobs in queue");
                        break;
                    }
                },
            }
        }

        info!(
            worker_id = %self.worker_id,
            completed = summary.completed,
            failed = summary.failed,
            "Worker stopped"
        );
        Ok(summary)
    }

    /// Sleeps for the poll interval, waking early on shutdown.
    fn idle(&self) {
        let deadline = Instant::now() + self.poll_interval;
        while !self.shutdown.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }

    /// Runs one claimed job. `Ok(true)` when it finished `done`, `Ok(false)`
    /// when a step failed. Queue or IO errors are returned after the job has
    /// been marked failed where possible; a panic marks it failed and resumes.
    pub fn process_job(&self, job: JobRecord) -> Result<bool> {
        let job_id = job.id;
        match panic::catch_unwind(AssertUnwindSafe(|| self.execute(job))) {
            Ok(Ok(completed)) => Ok(completed),
            Ok(Err(e)) => {
                error!(job_id = %job_id, "Fatal error while processing job: {}", e);
                self.record_failure(job_id, &e.to_string());
                Err(e)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(job_id = %job_id, "Worker panicked: {}", message);
                self.record_failure(job_id, &format!("worker panicked: {}", message));
                panic::resume_unwind(payload)
            }
        }
    }

    fn execute(&self, job: JobRecord) -> Result<bool> {
        let log = JobLog::open(&self.pipeline_config.log_dir, job.id).map_err(|e| {
            PipelineError::Io {
                path: self.pipeline_config.log_dir.clone(),
                source: e,
            }
        })?;
        log.info(&format!(
            "Claimed by {} (attempt {}/{})",
            self.worker_id,
            job.retries,
            self.queue.policy().max_retries
        ));

        let job_id = job.id;
        let ctx = match JobContext::new(job, &self.pipeline_config, log) {
            Ok(ctx) => ctx,
            Err(e @ PipelineError::InvalidInputPath(_)) => {
                let reason = e.to_string();
                error!(job_id = %job_id, "Cannot run job: {}", reason);
                self.queue.fail_job(job_id, &reason)?;
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        match self.executor.run(&ctx)? {
            PipelineOutcome::Completed { output_path } => {
                self.queue
                    .update_job_status(ctx.job.id, JobStatus::Done, Some(output_path.as_path()))?;
                ctx.log.info(&format!(
                    "Job done, output written to {}",
                    output_path.display()
                ));
                ctx.cleanup(&self.pipeline_config);
                Ok(true)
            }
            PipelineOutcome::StepFailed { step, reason } => {
                self.queue
                    .fail_job(ctx.job.id, &format!("{}: {}", step, reason))?;
                if self.queue.policy().is_exhausted(ctx.job.retries) {
                    ctx.log.warn(&format!(
                        "Retry budget of {} spent; job will be quarantined",
                        self.queue.policy().max_retries
                    ));
                } else {
                    ctx.log.info("Job marked failed; it will be retried");
                }
                Ok(false)
            }
        }
    }

    fn record_failure(&self, job_id: JobId, reason: &str) {
        if let Err(e) = self.queue.fail_job(job_id, reason) {
            warn!(job_id = %job_id, "Could not mark job failed: {}", e);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
