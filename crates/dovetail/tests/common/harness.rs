//! Test harness for isolated queue and worker execution.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tempfile::TempDir;

use dovetail::{
    Config, JobContext, JobLog, JobQueue, JobRecord, PipelineConfig, StepRunner, Worker,
};

pub struct TestHarness {
    temp_dir: TempDir,
    pub media_dir: PathBuf,
    pub shared_dir: PathBuf,
    pub work_dir: PathBuf,
    pub ram_dir: PathBuf,
    pub config: Config,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let media_dir = temp_dir.path().join("media");
        let shared_dir = temp_dir.path().join("shared");
        let work_dir = temp_dir.path().join("work");
        let ram_dir = temp_dir.path().join("ram");
        for dir in [&media_dir, &shared_dir, &work_dir, &ram_dir] {
            fs::create_dir_all(dir).expect("Failed to create test dir");
        }

        let mut config = Config::default();
        config.shared_dir = shared_dir.clone();
        config.paths.temp_dir_base = work_dir.clone();
        config.paths.ram_temp_dir = ram_dir.clone();
        config.queue.poll_interval_secs = 1;
        config.scan.video_root = Some(media_dir.clone());

        Self {
            temp_dir,
            media_dir,
            shared_dir,
            work_dir,
            ram_dir,
            config,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// A fresh queue handle; each handle opens the lock file independently.
    pub fn queue(&self) -> JobQueue {
        JobQueue::from_config(&self.config)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::from_config(&self.config)
    }

    /// Creates an empty source file under the media dir.
    pub fn create_source(&self, relative: &str) -> PathBuf {
        let path = self.media_dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create source dir");
        }
        fs::write(&path, b"matroska").expect("Failed to write source");
        path
    }

    pub fn context_for(&self, job: JobRecord) -> JobContext {
        let config = self.pipeline_config();
        let log = JobLog::open(&config.log_dir, job.id).expect("Failed to open job log");
        JobContext::new(job, &config, log).expect("Failed to build job context")
    }

    pub fn worker(&self, runner: Arc<dyn StepRunner>, worker_id: &str) -> Worker {
        Worker::new(&self.config, runner, Arc::new(AtomicBool::new(false))).with_worker_id(worker_id)
    }

    pub fn job_log_path(&self, job: &JobRecord) -> PathBuf {
        self.config.log_dir().join(format!("{}.log", job.id))
    }
}
