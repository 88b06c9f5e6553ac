use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::error::{Result, WorkerError};
use crate::queue::{JobQueue, JobType};

/// Finds source videos under a root directory and enqueues them.
pub struct DirectoryScanner {
    root: PathBuf,
    extensions: Vec<String>,
    exclude_markers: Vec<String>,
}

/// Result of one scan pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub found: usize,
    pub queued: usize,
}

impl DirectoryScanner {
    pub fn new<P: AsRef<Path>>(root: P, extensions: Vec<String>, exclude_markers: Vec<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            extensions: extensions
                .into_iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
            exclude_markers,
        }
    }

    pub fn from_config<P: AsRef<Path>>(root: P, config: &ScanConfig) -> Self {
        Self::new(
            root,
            config.extensions.clone(),
            config.exclude_markers.clone(),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Candidate files, sorted by path.
    pub fn scan(&self) -> std::result::Result<Vec<PathBuf>, WorkerError> {
        if !self.root.is_dir() {
            return Err(WorkerError::ScanRootMissing(self.root.clone()));
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(WorkerError::ScanFailed {
                        path: self.root.clone(),
                        source: e,
                    })
                }
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", self.root.display(), e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.to_str().is_none() {
                warn!("Skipping path that is not valid UTF-8: {}", path.display());
                continue;
            }
            if self.is_candidate(path) {
                debug!("Found source video: {}", path.display());
                found.push(path.to_path_buf());
            }
        }

        found.sort();
        info!("Scanned {} source videos in {}", found.len(), self.root.display());
        Ok(found)
    }

    fn is_candidate(&self, path: &Path) -> bool {
        let extension_matches = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false);
        if !extension_matches {
            return false;
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        !self
            .exclude_markers
            .iter()
            .any(|marker| name.contains(marker.as_str()))
    }

    /// Scans and enqueues every candidate in one queue transaction.
    pub fn enqueue_into(&self, queue: &JobQueue, job_type: JobType) -> Result<ScanReport> {
        let found = self.scan()?;
        let queued = queue.add_jobs(&found, job_type)?;
        info!(
            "Queued {} of {} source videos from {}",
            queued,
            found.len(),
            self.root.display()
        );
        Ok(ScanReport {
            found: found.len(),
            queued,
        })
    }
}
