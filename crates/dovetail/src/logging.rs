//! Tracing setup and per-job log files.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::queue::JobId;

const DEFAULT_FILTER: &str = "dovetail=info";

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
/// Calling it more than once is harmless.
pub fn init_tracing(json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let result = if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .try_init()
    };

    if result.is_err() {
        debug!("Tracing subscriber already installed");
    }
}

/// `LOG_FORMAT=json` selects the JSON formatter.
pub fn json_requested_by_env() -> bool {
    std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARNING",
            Level::Error => "ERROR",
        }
    }
}

/// Append-only log for a single job, stored at `<log_dir>/<job_id>.log`.
///
/// Entries are also emitted through `tracing` with the `job_id` field.
/// Tool output goes to the file only.
#[derive(Debug)]
pub struct JobLog {
    job_id: JobId,
    path: PathBuf,
    file: Mutex<File>,
}

impl JobLog {
    pub fn open(log_dir: &Path, job_id: JobId) -> std::io::Result<Self> {
        fs::create_dir_all(log_dir)?;
        let path = log_dir.join(format!("{}.log", job_id));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            job_id,
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn info(&self, message: &str) {
        info!(job_id = %self.job_id, "{}", message);
        self.append(Level::Info, message);
    }

    pub fn warn(&self, message: &str) {
        warn!(job_id = %self.job_id, "{}", message);
        self.append(Level::Warn, message);
    }

    pub fn error(&self, message: &str) {
        error!(job_id = %self.job_id, "{}", message);
        self.append(Level::Error, message);
    }

    /// One line of external tool output.
    pub fn tool_output(&self, tool: &str, line: &str) {
        self.append(Level::Info, &format!("[{}] {}", tool, line));
    }

    fn append(&self, level: Level, message: &str) {
        let line = format!(
            "{} - {} - {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level.as_str(),
            message
        );

        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = file.write_all(line.as_bytes()) {
            warn!(
                job_id = %self.job_id,
                "Failed to write job log {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_job_log_appends_lines() {
        let temp = TempDir::new().unwrap();
        let job_id = JobId::new();

        let log = JobLog::open(&temp.path().join("logs"), job_id).unwrap();
        log.info("Starting job");
        log.tool_output("ffmpeg", "frame=100");
        log.error("Step failed");
        drop(log);

        let reopened = JobLog::open(&temp.path().join("logs"), job_id).unwrap();
        reopened.warn("Resumed");

        let content = fs::read_to_string(reopened.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].ends_with(" - INFO - Starting job"));
        assert!(lines[1].contains("[ffmpeg] frame=100"));
        assert!(lines[2].contains(" - ERROR - "));
        assert!(lines[3].ends_with(" - WARNING - Resumed"));
        assert!(reopened
            .path()
            .ends_with(format!("{}.log", job_id)));
    }
}
