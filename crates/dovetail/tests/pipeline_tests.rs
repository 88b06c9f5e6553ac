//! Checkpointed execution: skip, redo and stop-at-first-failure.

mod common;

use std::fs;
use std::sync::Arc;

use common::{ScriptedRunner, TestHarness};
use dovetail::{JobType, PipelineExecutor, PipelineOutcome, Step, StepStatus};

fn claim(harness: &TestHarness, name: &str, job_type: JobType) -> dovetail::JobRecord {
    let queue = harness.queue();
    queue
        .add_job(&harness.create_source(name), job_type)
        .unwrap();
    queue.claim_next_available_job("w1").unwrap().unwrap()
}

#[test]
fn test_extended_pipeline_runs_every_step_in_order() {
    let harness = TestHarness::new();
    let job = claim(&harness, "movie.mkv", JobType::Extended);
    let runner = Arc::new(ScriptedRunner::new());
    let executor = PipelineExecutor::new(harness.queue(), runner.clone());

    let ctx = harness.context_for(job.clone());
    let outcome = executor.run(&ctx).unwrap();

    assert_eq!(
        outcome,
        PipelineOutcome::Completed {
            output_path: harness.media_dir.join("movie_final.mkv")
        }
    );
    assert_eq!(runner.calls(), JobType::Extended.steps());
    let stored = harness.queue().get_job(job.id).unwrap().unwrap();
    assert!(stored.steps.all_completed());
}

#[test]
fn test_failure_stops_pipeline() {
    let harness = TestHarness::new();
    let job = claim(&harness, "movie.mkv", JobType::Standard);
    let runner = Arc::new(ScriptedRunner::new().fail_times(Step::ReencodeVideo, 1));
    let executor = PipelineExecutor::new(harness.queue(), runner.clone());

    let outcome = executor.run(&harness.context_for(job.clone())).unwrap();

    match outcome {
        PipelineOutcome::StepFailed { step, reason } => {
            assert_eq!(step, Step::ReencodeVideo);
            assert!(reason.contains("scripted failure"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(runner.calls(), vec![Step::ExtractVideo, Step::ReencodeVideo]);
    let stored = harness.queue().get_job(job.id).unwrap().unwrap();
    assert_eq!(
        stored.steps.statuses(),
        vec![
            StepStatus::Completed,
            StepStatus::Failed,
            StepStatus::Pending,
            StepStatus::Pending
        ]
    );
}

#[test]
fn test_completed_step_with_artifact_is_skipped() {
    let harness = TestHarness::new();
    let job = claim(&harness, "movie.mkv", JobType::Standard);
    let runner = Arc::new(ScriptedRunner::new().fail_times(Step::ExtractChapters, 1));
    let executor = PipelineExecutor::new(harness.queue(), runner.clone());
    executor.run(&harness.context_for(job.clone())).unwrap();

    // Second pass with the refreshed record, as a reclaim would deliver it.
    let queue = harness.queue();
    queue.fail_job(job.id, "chapters").unwrap();
    let job = queue.claim_next_available_job("w2").unwrap().unwrap();
    runner.clear_calls();

    let outcome = executor.run(&harness.context_for(job)).unwrap();

    assert!(matches!(outcome, PipelineOutcome::Completed { .. }));
    assert_eq!(runner.calls(), vec![Step::ExtractChapters, Step::Remux]);
}

#[test]
fn test_completed_step_with_missing_artifact_is_rerun() {
    let harness = TestHarness::new();
    let job = claim(&harness, "movie.mkv", JobType::Standard);
    let runner = Arc::new(ScriptedRunner::new().fail_times(Step::Remux, 1));
    let executor = PipelineExecutor::new(harness.queue(), runner.clone());
    let ctx = harness.context_for(job.clone());
    executor.run(&ctx).unwrap();

    // Simulate a reboot wiping the RAM disk.
    fs::remove_file(ctx.artifact_path(Step::ExtractChapters)).unwrap();

    let queue = harness.queue();
    queue.fail_job(job.id, "remux").unwrap();
    let job = queue.claim_next_available_job("w1").unwrap().unwrap();
    runner.clear_calls();

    executor.run(&harness.context_for(job)).unwrap();

    assert_eq!(runner.calls(), vec![Step::ExtractChapters, Step::Remux]);
    let log = fs::read_to_string(ctx.log.path()).unwrap();
    assert!(log.contains("is missing, re-running"));
}

#[test]
fn test_success_without_artifact_is_a_failure() {
    let harness = TestHarness::new();
    let job = claim(&harness, "movie.mkv", JobType::Standard);
    let runner = Arc::new(ScriptedRunner::new().without_artifact(Step::ExtractVideo));
    let executor = PipelineExecutor::new(harness.queue(), runner.clone());

    let outcome = executor.run(&harness.context_for(job.clone())).unwrap();

    assert!(matches!(
        outcome,
        PipelineOutcome::StepFailed {
            step: Step::ExtractVideo,
            ..
        }
    ));
    let stored = harness.queue().get_job(job.id).unwrap().unwrap();
    assert_eq!(stored.steps.get(Step::ExtractVideo), Some(StepStatus::Failed));
}
