//! Dashboard configuration.
//!
//! Loaded from `~/.dt/config.toml`. Every key is optional; a missing file means
//! defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Dashboard configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// Base URL of the delivery backend, without a trailing slash.
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_base_url: "http://localhost:3001".to_string(),
            request_timeout_secs: 30,
            log_filter: "delivery_tracker=info".to_string(),
        }
    }
}

impl Config {
    /// Load config from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.api_base_url = config.api_base_url.trim_end_matches('/').to_string();
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// The state directory: `~/.dt`.
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir().map(|h| h.join(".dt")).ok_or(ConfigError::NoHome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "api-base-url = \"https://deliveries.example.com/\"\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.api_base_url, "https://deliveries.example.com");
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_invalid_file_names_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "api-base-url = [").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }
}
