//! Configuration file in the user's config directory.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::robot::RobotConfig;

const CONFIG_DIR: &str = "binder";
const CONFIG_FILE: &str = "binder-config.json";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No user configuration directory on this platform")]
    NoConfigDir,
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid configuration in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Persisted configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinderConfig {
    pub robot: RobotConfig,
}

impl BinderConfig {
    /// Default location: `<config dir>/binder/binder-config.json`.
    ///
    /// # Errors
    /// Returns error if the platform has no config directory.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from the default location, writing defaults if the file is missing.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or created.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_or_init(&Self::default_path()?)
    }

    /// Load `path`, writing defaults there first if it does not exist.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or created.
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            let config = Self::default();
            config.save_to(path)?;
            tracing::info!(path = %path.display(), "Wrote default configuration");
            return Ok(config);
        }
        Self::load_from(path)
    }

    /// Load an existing file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write as pretty JSON, creating parent directories.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text).map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    fn scratch_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("binder-config-{}", uuid::Uuid::new_v4()))
            .join(CONFIG_FILE)
    }

    #[test]
    fn test_missing_file_writes_defaults() {
        let path = scratch_path();
        let config = assert_ok!(BinderConfig::load_or_init(&path));
        assert_eq!(config, BinderConfig::default());
        assert!(path.is_file());
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_save_then_load() {
        let path = scratch_path();
        let mut config = BinderConfig::default();
        config.robot.host = Some("192.168.0.10".to_string());
        config.robot.controller_rate = 500.0;
        assert_ok!(config.save_to(&path));

        let loaded = assert_ok!(BinderConfig::load_from(&path));
        assert_eq!(loaded.robot.host.as_deref(), Some("192.168.0.10"));
        assert_eq!(loaded.robot.controller_rate, 500.0);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_invalid_json_reports_path() {
        let path = scratch_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();
        let err = assert_err!(BinderConfig::load_from(&path));
        assert!(matches!(err, ConfigError::Json { .. }));
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
