use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::queue::JobType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_shared_dir")]
    pub shared_dir: PathBuf,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_shared_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".dovetail").join("shared"))
        .unwrap_or_else(|| PathBuf::from(".dovetail/shared"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            shared_dir: default_shared_dir(),
            queue: QueueConfig::default(),
            paths: PathsConfig::default(),
            scan: ScanConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

impl Config {
    pub fn queue_path(&self) -> PathBuf {
        self.shared_dir.join("job_queue.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.shared_dir.join("job_queue.lock")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.shared_dir.join("logs")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.queue.poll_interval_secs)
    }

    pub fn stale_threshold(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.queue.stale_job_threshold_hours))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_stale_job_threshold_hours")]
    pub stale_job_threshold_hours: u32,
}

fn default_max_retries() -> u32 {
    3
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_stale_job_threshold_hours() -> u32 {
    2
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            poll_interval_secs: default_poll_interval_secs(),
            stale_job_threshold_hours: default_stale_job_threshold_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_temp_dir_base")]
    pub temp_dir_base: PathBuf,
    #[serde(default = "default_ram_temp_dir")]
    pub ram_temp_dir: PathBuf,
    #[serde(default)]
    pub keep_intermediates: bool,
}

fn default_temp_dir_base() -> PathBuf {
    PathBuf::from("/var/tmp/dovetail")
}

fn default_ram_temp_dir() -> PathBuf {
    PathBuf::from("/dev/shm")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            temp_dir_base: default_temp_dir_base(),
            ram_temp_dir: default_ram_temp_dir(),
            keep_intermediates: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default)]
    pub video_root: Option<PathBuf>,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_exclude_markers")]
    pub exclude_markers: Vec<String>,
    #[serde(default)]
    pub default_job_type: JobType,
}

fn default_extensions() -> Vec<String> {
    vec!["mkv".to_string()]
}

fn default_exclude_markers() -> Vec<String> {
    vec!["_DV_P8".to_string(), "_final".to_string()]
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            video_root: None,
            extensions: default_extensions(),
            exclude_markers: default_exclude_markers(),
            default_job_type: JobType::default(),
        }
    }
}

/// External tool locations and encoder / remux settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_dovi_tool")]
    pub dovi_tool: String,
    #[serde(default = "default_mkvmerge")]
    pub mkvmerge: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_crf")]
    pub crf: f32,
    #[serde(default = "default_tune")]
    pub tune: String,
    #[serde(default = "default_gop")]
    pub gop: u32,
    #[serde(default = "default_keyint_min")]
    pub keyint_min: u32,
    #[serde(default = "default_x265_params")]
    pub x265_params: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_audio_tracks")]
    pub audio_tracks: String,
    #[serde(default = "default_subtitle_tracks")]
    pub subtitle_tracks: String,
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_dovi_tool() -> String {
    "dovi_tool".to_string()
}

fn default_mkvmerge() -> String {
    "mkvmerge".to_string()
}

fn default_preset() -> String {
    "slow".to_string()
}

fn default_crf() -> f32 {
    20.5
}

fn default_tune() -> String {
    "fastdecode".to_string()
}

fn default_gop() -> u32 {
    240
}

fn default_keyint_min() -> u32 {
    24
}

fn default_x265_params() -> String {
    "pools=1:wpp=1".to_string()
}

fn default_language() -> String {
    "eng".to_string()
}

fn default_audio_tracks() -> String {
    "1,2,3,4".to_string()
}

fn default_subtitle_tracks() -> String {
    "6".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            dovi_tool: default_dovi_tool(),
            mkvmerge: default_mkvmerge(),
            preset: default_preset(),
            crf: default_crf(),
            tune: default_tune(),
            gop: default_gop(),
            keyint_min: default_keyint_min(),
            x265_params: default_x265_params(),
            language: default_language(),
            audio_tracks: default_audio_tracks(),
            subtitle_tracks: default_subtitle_tracks(),
        }
    }
}
