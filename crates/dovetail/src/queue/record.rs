//! Job record — the persisted unit of work and its step checklist.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Opaque job identifier, stored as a hyphenated UUID string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Failed,
    FailedPermanent,
    Done,
}

impl JobStatus {
    /// Statuses the claim protocol may pick up.
    pub fn is_claimable(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Failed => "failed",
            JobStatus::FailedPermanent => "failed_permanent",
            JobStatus::Done => "done",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StepStatus::Pending => "pending",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        })
    }
}

/// A pipeline stage. Which stages a job runs is decided by its [`JobType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    ExtractVideo,
    ConvertProfile,
    ExtractRpu,
    ReencodeVideo,
    InjectRpu,
    ExtractChapters,
    Remux,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::ExtractVideo => "extract_video",
            Step::ConvertProfile => "convert_profile",
            Step::ExtractRpu => "extract_rpu",
            Step::ReencodeVideo => "reencode_video",
            Step::InjectRpu => "inject_rpu",
            Step::ExtractChapters => "extract_chapters",
            Step::Remux => "remux",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extract_video" => Ok(Step::ExtractVideo),
            "convert_profile" => Ok(Step::ConvertProfile),
            "extract_rpu" => Ok(Step::ExtractRpu),
            "reencode_video" => Ok(Step::ReencodeVideo),
            "inject_rpu" => Ok(Step::InjectRpu),
            "extract_chapters" => Ok(Step::ExtractChapters),
            "remux" => Ok(Step::Remux),
            other => Err(format!("unknown step '{}'", other)),
        }
    }
}

const STANDARD_STEPS: &[Step] = &[
    Step::ExtractVideo,
    Step::ReencodeVideo,
    Step::ExtractChapters,
    Step::Remux,
];

const EXTENDED_STEPS: &[Step] = &[
    Step::ExtractVideo,
    Step::ConvertProfile,
    Step::ExtractRpu,
    Step::ReencodeVideo,
    Step::InjectRpu,
    Step::ExtractChapters,
    Step::Remux,
];

/// Selects the fixed, ordered step list a job runs.
///
/// `Standard` is the plain re-encode path. `Extended` converts a Dolby Vision
/// profile 7 stream to 8.1, carries the RPU metadata across the re-encode and
/// re-injects it before the final remux.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    #[default]
    Standard,
    Extended,
}

impl JobType {
    pub fn steps(self) -> &'static [Step] {
        match self {
            JobType::Standard => STANDARD_STEPS,
            JobType::Extended => EXTENDED_STEPS,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Standard => "standard",
            JobType::Extended => "extended",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(JobType::Standard),
            "extended" => Ok(JobType::Extended),
            other => Err(format!(
                "unknown job type '{}' (expected 'standard' or 'extended')",
                other
            )),
        }
    }
}

/// Ordered step-name → status mapping.
///
/// Persisted as a JSON object whose key order follows the job type's step list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepProgress {
    entries: Vec<(Step, StepStatus)>,
}

impl StepProgress {
    pub fn for_job_type(job_type: JobType) -> Self {
        Self {
            entries: job_type
                .steps()
                .iter()
                .map(|step| (*step, StepStatus::Pending))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, step: Step) -> Option<StepStatus> {
        self.entries
            .iter()
            .find(|(s, _)| *s == step)
            .map(|(_, status)| *status)
    }

    /// Sets the status of an existing step. Returns `false` when the step is
    /// not part of this checklist; keys are never added.
    pub fn set(&mut self, step: Step, status: StepStatus) -> bool {
        match self.entries.iter_mut().find(|(s, _)| *s == step) {
            Some(entry) => {
                entry.1 = status;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Step, StepStatus)> + '_ {
        self.entries.iter().copied()
    }

    pub fn statuses(&self) -> Vec<StepStatus> {
        self.entries.iter().map(|(_, status)| *status).collect()
    }

    pub fn all_completed(&self) -> bool {
        self.entries
            .iter()
            .all(|(_, status)| *status == StepStatus::Completed)
    }

    /// Resets every step at 1-based position `from_index` or later to pending.
    fn reset_from(&mut self, from_index: usize) {
        for (_, status) in self.entries.iter_mut().skip(from_index.saturating_sub(1)) {
            *status = StepStatus::Pending;
        }
    }

    /// Checks the key set against `job_type` and restores canonical order.
    pub(crate) fn normalize(&mut self, job_type: JobType) -> Result<(), String> {
        let expected = job_type.steps();
        if self.entries.len() != expected.len() {
            return Err(format!(
                "expected {} steps for job type '{}', found {}",
                expected.len(),
                job_type,
                self.entries.len()
            ));
        }

        let mut ordered = Vec::with_capacity(expected.len());
        for step in expected {
            let status = self.get(*step).ok_or_else(|| {
                format!("step '{}' missing for job type '{}'", step, job_type)
            })?;
            ordered.push((*step, status));
        }
        self.entries = ordered;
        Ok(())
    }
}

impl Serialize for StepProgress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (step, status) in &self.entries {
            map.serialize_entry(step.as_str(), status)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for StepProgress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StepProgressVisitor;

        impl<'de> Visitor<'de> for StepProgressVisitor {
            type Value = StepProgress;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of step name to step status")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries: Vec<(Step, StepStatus)> = Vec::new();
                while let Some((name, status)) = access.next_entry::<String, StepStatus>()? {
                    let step = Step::from_str(&name).map_err(de::Error::custom)?;
                    if entries.iter().any(|(s, _)| *s == step) {
                        return Err(de::Error::custom(format!("duplicate step '{}'", name)));
                    }
                    entries.push((step, status));
                }
                Ok(StepProgress { entries })
            }
        }

        deserializer.deserialize_map(StepProgressVisitor)
    }
}

/// One unit of work: a source file, its pipeline variant and its progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub input_path: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub steps: StepProgress,
    pub worker_id: Option<String>,
    pub retries: u32,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output_path: Option<String>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl JobRecord {
    pub fn new(input_path: impl Into<String>, job_type: JobType, created_at: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            input_path: input_path.into(),
            job_type,
            status: JobStatus::Pending,
            steps: StepProgress::for_job_type(job_type),
            worker_id: None,
            retries: 0,
            created_at,
            claimed_at: None,
            completed_at: None,
            output_path: None,
            updated_at: created_at,
            last_error: None,
        }
    }

    pub fn input_path(&self) -> &Path {
        Path::new(&self.input_path)
    }

    pub fn output_path_buf(&self) -> Option<PathBuf> {
        self.output_path.as_ref().map(PathBuf::from)
    }

    /// Moves the record into `running` for `worker_id`.
    pub fn start_claim(&mut self, worker_id: &str, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.worker_id = Some(worker_id.to_string());
        self.claimed_at = Some(now);
        self.retries += 1;
        self.updated_at = now;
    }

    pub fn mark_quarantined(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::FailedPermanent;
        self.updated_at = now;
    }

    /// Rolls progress back to the 1-based step `from_index` and makes the job
    /// claimable again with a fresh retry budget.
    pub fn reset_from(&mut self, from_index: usize, now: DateTime<Utc>) {
        self.steps.reset_from(from_index);
        self.status = JobStatus::Failed;
        self.retries = 0;
        self.completed_at = None;
        self.last_error = None;
        self.updated_at = now;
    }

    /// Structural checks applied to every record loaded from disk.
    pub(crate) fn validate(&mut self) -> Result<(), String> {
        self.steps
            .normalize(self.job_type)
            .map_err(|e| format!("job {}: {}", self.id, e))?;

        if self.status == JobStatus::Done && !self.steps.all_completed() {
            return Err(format!(
                "job {}: status is done but not every step is completed",
                self.id
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_step_lists() {
        assert_eq!(JobType::Standard.steps().len(), 4);
        assert_eq!(JobType::Extended.steps().len(), 7);
        assert_eq!(JobType::Standard.steps().first(), Some(&Step::ExtractVideo));
        assert_eq!(JobType::Extended.steps().last(), Some(&Step::Remux));
    }

    #[test]
    fn test_job_type_from_str() {
        assert_eq!("standard".parse::<JobType>(), Ok(JobType::Standard));
        assert_eq!(" Extended ".parse::<JobType>(), Ok(JobType::Extended));
        assert!("hdr".parse::<JobType>().is_err());
    }

    #[test]
    fn test_new_record_is_pending() {
        let record = JobRecord::new("/media/movie.mkv", JobType::Standard, Utc::now());
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.retries, 0);
        assert!(record.worker_id.is_none());
        assert!(record
            .steps
            .iter()
            .all(|(_, status)| status == StepStatus::Pending));
    }

    #[test]
    fn test_steps_serialize_in_pipeline_order() {
        let record = JobRecord::new("/media/movie.mkv", JobType::Extended, Utc::now());
        let json = serde_json::to_string(&record.steps).unwrap();
        let extract = json.find("extract_video").unwrap();
        let convert = json.find("convert_profile").unwrap();
        let remux = json.find("remux").unwrap();
        assert!(extract < convert);
        assert!(convert < remux);
    }

    #[test]
    fn test_record_field_names_are_stable() {
        let record = JobRecord::new("/media/movie.mkv", JobType::Standard, Utc::now());
        let value = serde_json::to_value(&record).unwrap();
        for field in [
            "id",
            "input_path",
            "job_type",
            "status",
            "steps",
            "worker_id",
            "retries",
            "created_at",
            "claimed_at",
            "completed_at",
            "output_path",
        ] {
            assert!(value.get(field).is_some(), "missing field {}", field);
        }
        assert_eq!(value["job_type"], "standard");
        assert_eq!(value["steps"]["reencode_video"], "pending");
    }

    #[test]
    fn test_set_unknown_step_is_rejected() {
        let mut steps = StepProgress::for_job_type(JobType::Standard);
        assert!(!steps.set(Step::InjectRpu, StepStatus::Completed));
        assert_eq!(steps.get(Step::InjectRpu), None);
        assert_eq!(steps.len(), 4);
    }

    #[test]
    fn test_validate_restores_order() {
        let json = r#"{"remux":"pending","extract_chapters":"pending","reencode_video":"completed","extract_video":"completed"}"#;
        let mut steps: StepProgress = serde_json::from_str(json).unwrap();
        steps.normalize(JobType::Standard).unwrap();
        let order: Vec<Step> = steps.iter().map(|(s, _)| s).collect();
        assert_eq!(order, JobType::Standard.steps());
        assert_eq!(steps.get(Step::ReencodeVideo), Some(StepStatus::Completed));
    }

    #[test]
    fn test_validate_rejects_foreign_step_set() {
        let json = r#"{"extract_video":"pending","inject_rpu":"pending","extract_chapters":"pending","remux":"pending"}"#;
        let mut steps: StepProgress = serde_json::from_str(json).unwrap();
        assert!(steps.normalize(JobType::Standard).is_err());
    }

    #[test]
    fn test_duplicate_step_key_fails_to_parse() {
        let json = r#"{"remux":"pending","remux":"completed"}"#;
        assert!(serde_json::from_str::<StepProgress>(json).is_err());
    }

    #[test]
    fn test_validate_rejects_done_with_pending_steps() {
        let mut record = JobRecord::new("/media/movie.mkv", JobType::Standard, Utc::now());
        record.status = JobStatus::Done;
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_reset_from_keeps_earlier_steps() {
        let mut record = JobRecord::new("/media/movie.mkv", JobType::Standard, Utc::now());
        for step in JobType::Standard.steps() {
            record.steps.set(*step, StepStatus::Completed);
        }
        record.status = JobStatus::FailedPermanent;
        record.retries = 3;

        record.reset_from(3, Utc::now());

        assert_eq!(
            record.steps.statuses(),
            vec![
                StepStatus::Completed,
                StepStatus::Completed,
                StepStatus::Pending,
                StepStatus::Pending
            ]
        );
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.retries, 0);
    }

    #[test]
    fn test_job_id_roundtrip_through_display() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
