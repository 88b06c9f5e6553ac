use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::logging::JobLog;
use crate::queue::{JobRecord, JobType, Step};

use super::config::PipelineConfig;
use super::error::PipelineError;

/// Everything a step needs to know about the job it runs for.
///
/// Large intermediates live in the per-job work dir; small ones (RPU,
/// chapters) in the RAM dir, which falls back to the work dir when the
/// configured RAM disk does not exist.
pub struct JobContext {
    pub job: JobRecord,
    pub base_name: String,
    pub work_dir: PathBuf,
    pub ram_dir: PathBuf,
    pub output_path: PathBuf,
    pub log: JobLog,
}

impl JobContext {
    pub fn new(job: JobRecord, config: &PipelineConfig, log: JobLog) -> Result<Self, PipelineError> {
        let input = PathBuf::from(&job.input_path);
        let base_name = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PipelineError::InvalidInputPath(input.clone()))?;

        let work_dir = config.temp_dir_base.join(job.id.to_string());
        let ram_dir = if config.ram_temp_dir.is_dir() {
            config.ram_temp_dir.join(format!("dovetail-{}", job.id))
        } else {
            work_dir.clone()
        };

        let output_dir = input.parent().unwrap_or_else(|| Path::new("."));
        let output_path = output_dir.join(format!("{}_final.mkv", base_name));

        Ok(Self {
            job,
            base_name,
            work_dir,
            ram_dir,
            output_path,
            log,
        })
    }

    pub fn input_path(&self) -> &Path {
        self.job.input_path()
    }

    pub fn job_type(&self) -> JobType {
        self.job.job_type
    }

    /// Creates the work and RAM dirs.
    pub fn prepare_dirs(&self) -> Result<(), PipelineError> {
        for dir in [&self.work_dir, &self.ram_dir] {
            fs::create_dir_all(dir).map_err(|e| PipelineError::Io {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// The file whose presence proves `step` completed.
    pub fn artifact_path(&self, step: Step) -> PathBuf {
        let base = &self.base_name;
        match step {
            Step::ExtractVideo => match self.job.job_type {
                JobType::Standard => self.work_dir.join(format!("{}_video.hevc", base)),
                JobType::Extended => self.work_dir.join(format!("{}_p7.hevc", base)),
            },
            Step::ConvertProfile => self.work_dir.join(format!("{}_p81.hevc", base)),
            Step::ExtractRpu => self.ram_dir.join("rpu_81.bin"),
            Step::ReencodeVideo => self.work_dir.join(format!("{}_final_video.hevc", base)),
            Step::InjectRpu => self.work_dir.join(format!("{}_dolby.hevc", base)),
            Step::ExtractChapters => self.ram_dir.join("chapters.txt"),
            Step::Remux => self.output_path.clone(),
        }
    }

    /// Stream fed to the encoder.
    pub fn reencode_source(&self) -> PathBuf {
        match self.job.job_type {
            JobType::Standard => self.artifact_path(Step::ExtractVideo),
            JobType::Extended => self.artifact_path(Step::ConvertProfile),
        }
    }

    /// Video stream muxed into the final file.
    pub fn remux_video_source(&self) -> PathBuf {
        match self.job.job_type {
            JobType::Standard => self.artifact_path(Step::ReencodeVideo),
            JobType::Extended => self.artifact_path(Step::InjectRpu),
        }
    }

    /// Removes the work and RAM dirs unless `keep_intermediates` is set.
    pub fn cleanup(&self, config: &PipelineConfig) {
        if config.keep_intermediates {
            self.log.info(&format!(
                "Keeping intermediates in {}",
                self.work_dir.display()
            ));
            return;
        }

        for dir in [&self.work_dir, &self.ram_dir] {
            if !dir.exists() {
                continue;
            }
            if let Err(e) = fs::remove_dir_all(dir) {
                warn!(job_id = %self.job.id, "Failed to remove {}: {}", dir.display(), e);
            }
        }
    }
}
