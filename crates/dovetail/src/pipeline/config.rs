use std::path::PathBuf;

use crate::config::{Config, ToolsConfig};

/// Settings the pipeline needs from the full [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub temp_dir_base: PathBuf,
    pub ram_temp_dir: PathBuf,
    pub keep_intermediates: bool,
    pub log_dir: PathBuf,
    pub tools: ToolsConfig,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            temp_dir_base: config.paths.temp_dir_base.clone(),
            ram_temp_dir: config.paths.ram_temp_dir.clone(),
            keep_intermediates: config.paths.keep_intermediates,
            log_dir: config.log_dir(),
            tools: config.tools.clone(),
        }
    }
}
