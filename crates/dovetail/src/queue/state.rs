//! In-memory image of the queue document.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::record::{JobId, JobRecord, JobStatus};

/// Full queue contents, persisted as `{"jobs": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueState {
    #[serde(default)]
    pub jobs: Vec<JobRecord>,
}

/// Number of jobs in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub running: usize,
    pub failed: usize,
    pub failed_permanent: usize,
    pub done: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.failed + self.failed_permanent + self.done
    }
}

impl QueueState {
    /// Parses a document and checks record-level invariants.
    pub(crate) fn parse(data: &str) -> Result<Self, String> {
        let mut state: QueueState = serde_json::from_str(data).map_err(|e| e.to_string())?;
        state.validate()?;
        Ok(state)
    }

    fn validate(&mut self) -> Result<(), String> {
        let mut paths = HashSet::new();
        let mut ids = HashSet::new();
        for job in &mut self.jobs {
            job.validate()?;
            if !paths.insert(job.input_path.clone()) {
                return Err(format!("duplicate input_path '{}'", job.input_path));
            }
            if !ids.insert(job.id) {
                return Err(format!("duplicate job id {}", job.id));
            }
        }
        Ok(())
    }

    pub fn find(&self, id: JobId) -> Option<&JobRecord> {
        self.jobs.iter().find(|job| job.id == id)
    }

    pub fn find_mut(&mut self, id: JobId) -> Option<&mut JobRecord> {
        self.jobs.iter_mut().find(|job| job.id == id)
    }

    pub fn find_by_path_mut(&mut self, input_path: &str) -> Option<&mut JobRecord> {
        self.jobs.iter_mut().find(|job| job.input_path == input_path)
    }

    pub fn contains_path(&self, input_path: &str) -> bool {
        self.jobs.iter().any(|job| job.input_path == input_path)
    }

    /// Creation timestamp for a new record: `now`, or just after the newest
    /// existing record so insertion order stays the FIFO order.
    pub(crate) fn next_created_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.jobs.iter().map(|job| job.created_at).max() {
            Some(latest) if latest >= now => latest + Duration::microseconds(1),
            _ => now,
        }
    }

    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for job in &self.jobs {
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::FailedPermanent => counts.failed_permanent += 1,
                JobStatus::Done => counts.done += 1,
            }
        }
        counts
    }
}
