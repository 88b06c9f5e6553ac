use std::path::PathBuf;
use std::sync::Arc;

use tracing::info_span;

use crate::queue::{JobQueue, Step, StepStatus};

use super::checkpoint::{self, StepAction};
use super::context::JobContext;
use super::error::PipelineError;
use super::step::StepRunner;

/// How a pipeline pass ended. Step failures are expected outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed { output_path: PathBuf },
    StepFailed { step: Step, reason: String },
}

/// Runs a job's steps in order, checkpointing each one in the queue.
pub struct PipelineExecutor {
    queue: JobQueue,
    runner: Arc<dyn StepRunner>,
}

impl PipelineExecutor {
    pub fn new(queue: JobQueue, runner: Arc<dyn StepRunner>) -> Self {
        Self { queue, runner }
    }

    /// Executes every step not already completed, stopping at the first
    /// failure. Only queue and filesystem errors are returned as `Err`.
    pub fn run(&self, ctx: &JobContext) -> Result<PipelineOutcome, PipelineError> {
        let job = &ctx.job;
        let _pipeline_span = info_span!("pipeline",
            job_id = %job.id,
            job_type = %job.job_type,
        )
        .entered();

        ctx.log.info(&format!(
            "Starting {} pipeline for {} (attempt {})",
            job.job_type, job.input_path, job.retries
        ));
        ctx.prepare_dirs()?;

        let steps = job.job_type.steps();
        for (index, step) in steps.iter().copied().enumerate() {
            let _step_span = info_span!("step", step = %step).entered();
            let position = index + 1;
            let artifact = ctx.artifact_path(step);
            let status = job.steps.get(step).unwrap_or(StepStatus::Pending);

            match checkpoint::decide(status, &artifact) {
                StepAction::Skip => {
                    ctx.log.info(&format!(
                        "Step {}/{} {}: already completed, skipping",
                        position,
                        steps.len(),
                        step
                    ));
                    continue;
                }
                StepAction::Rerun => ctx.log.warn(&format!(
                    "Step {}/{} {}: marked completed but {} is missing, re-running",
                    position,
                    steps.len(),
                    step,
                    artifact.display()
                )),
                StepAction::Run => ctx.log.info(&format!(
                    "Step {}/{} {}: running",
                    position,
                    steps.len(),
                    step
                )),
            }

            let outcome = self.runner.run_step(step, ctx);
            let produced = outcome.artifact.clone().unwrap_or_else(|| artifact.clone());

            let failure = if !outcome.success {
                Some(
                    outcome
                        .reason
                        .unwrap_or_else(|| "step reported failure".to_string()),
                )
            } else if !produced.exists() {
                Some(format!(
                    "step reported success but {} does not exist",
                    produced.display()
                ))
            } else {
                None
            };

            match failure {
                None => {
                    self.queue
                        .update_job_step_status(job.id, step, StepStatus::Completed)?;
                    ctx.log.info(&format!("Step {} completed", step));
                }
                Some(reason) => {
                    self.queue
                        .update_job_step_status(job.id, step, StepStatus::Failed)?;
                    ctx.log.error(&format!("Step {} failed: {}", step, reason));
                    return Ok(PipelineOutcome::StepFailed { step, reason });
                }
            }
        }

        ctx.log.info(&format!(
            "Pipeline finished: {}",
            ctx.output_path.display()
        ));
        Ok(PipelineOutcome::Completed {
            output_path: ctx.output_path.clone(),
        })
    }
}
