use crate::config::ConfigError;
use crate::shared::logging::automation_log_path;
use std::path::{Path, PathBuf};

pub const GLOBAL_STATE_DIR: &str = ".comodin";
pub const GLOBAL_SETTINGS_FILE_NAME: &str = "automation.yaml";
pub const DATABASE_FILE_NAME: &str = "automation.db";

pub fn default_settings_path() -> Result<PathBuf, ConfigError> {
    let home = std::env::var_os("HOME").ok_or(ConfigError::HomeDirectoryUnavailable)?;
    Ok(PathBuf::from(home)
        .join(GLOBAL_STATE_DIR)
        .join(GLOBAL_SETTINGS_FILE_NAME))
}

/// On-disk layout under the configured state root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub root: PathBuf,
    pub database: PathBuf,
    pub log: PathBuf,
}

impl StatePaths {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            database: root.join("state").join(DATABASE_FILE_NAME),
            log: automation_log_path(root),
        }
    }
}
