use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub const ENV_SHARED_DIR: &str = "DOVETAIL_SHARED_DIR";
pub const ENV_TEMP_DIR: &str = "DOVETAIL_TEMP_DIR";
pub const ENV_RAM_DIR: &str = "DOVETAIL_RAM_DIR";
pub const ENV_VIDEO_ROOT: &str = "DOVETAIL_VIDEO_ROOT";

/// `~/.dovetail/config.json`, used when no explicit path is given.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".dovetail").join("config.json"))
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

/// Overrides directory settings from `DOVETAIL_*` environment variables.
/// Empty values are ignored.
pub fn apply_env_overrides(config: &mut Config) {
    let var = |name: &str| {
        std::env::var_os(name)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    };

    if let Some(dir) = var(ENV_SHARED_DIR) {
        config.shared_dir = dir;
    }
    if let Some(dir) = var(ENV_TEMP_DIR) {
        config.paths.temp_dir_base = dir;
    }
    if let Some(dir) = var(ENV_RAM_DIR) {
        config.paths.ram_temp_dir = dir;
    }
    if let Some(dir) = var(ENV_VIDEO_ROOT) {
        config.scan.video_root = Some(dir);
    }
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.queue.max_retries == 0 {
        return Err(ConfigError::Validation {
            message: "queue.max_retries must be at least 1".to_string(),
        });
    }

    if config.queue.poll_interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "queue.poll_interval_secs must be at least 1".to_string(),
        });
    }

    if config.tools.keyint_min > config.tools.gop {
        return Err(ConfigError::Validation {
            message: format!(
                "tools.keyint_min ({}) must not exceed tools.gop ({})",
                config.tools.keyint_min, config.tools.gop
            ),
        });
    }

    if config.scan.extensions.iter().any(|ext| ext.starts_with('.')) {
        return Err(ConfigError::Validation {
            message: "scan.extensions must be given without a leading dot".to_string(),
        });
    }

    Ok(())
}
