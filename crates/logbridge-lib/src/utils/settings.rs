// Settings loading
//
// The configuration snapshot is read once at startup from a TOML file.
// `LOGBRIDGE_CONFIG` overrides the default per-user location.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::BridgeConfig;

const CONFIG_ENV_VAR: &str = "LOGBRIDGE_CONFIG";
const CONFIG_DIR_NAME: &str = "logbridge";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("No configuration directory available on this platform")]
    NoConfigDir,

    #[error("Cannot read configuration file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Resolve the configuration file path, honoring the env override
pub fn config_path() -> Result<PathBuf, SettingsError> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
        .ok_or(SettingsError::NoConfigDir)
}

/// Load the configuration snapshot from the resolved path
pub fn load_config() -> Result<BridgeConfig, SettingsError> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<BridgeConfig, SettingsError> {
    let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
