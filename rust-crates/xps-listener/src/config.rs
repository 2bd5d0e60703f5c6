//! Listener configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::listener::{DEFAULT_ENTITY, RECONNECT_DELAY_SECS};

/// Listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Path to configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Live channel to consume
    pub url: String,

    /// Sample decoded from each payload
    pub entity: String,

    /// Fixed delay between reconnection attempts (seconds)
    pub reconnect_delay_secs: u64,

    /// Log filter used when RUST_LOG is unset
    pub log_level: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("listener.toml"),
            url: "ws://localhost:8765/xps_operator".to_string(),
            entity: DEFAULT_ENTITY.to_string(),
            reconnect_delay_secs: RECONNECT_DELAY_SECS,
            log_level: "info".to_string(),
        }
    }
}

impl ListenerConfig {
    /// Load from the default location, creating it on first run
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_config_path()?)
    }

    /// Load from `config_path`, writing defaults there if it does not exist
    pub fn load_from(config_path: impl AsRef<Path>) -> Result<Self> {
        let config_path = config_path.as_ref().to_path_buf();

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let mut config: ListenerConfig =
                toml::from_str(&contents).context("Failed to parse config file")?;

            config.config_path = config_path;
            Ok(config)
        } else {
            let config = Self {
                config_path,
                ..Self::default()
            };
            config.save().context("Failed to save default config")?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("Failed to create config directory")?;
            }
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&self.config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    fn default_config_path() -> Result<PathBuf> {
        Ok(xps_paths::get_config_dir()?.join("listener.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_first_load_writes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("listener.toml");

        let config = ListenerConfig::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.url, "ws://localhost:8765/xps_operator");
        assert_eq!(config.reconnect_delay(), Duration::from_secs(5));

        let reloaded = ListenerConfig::load_from(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("listener.toml");
        std::fs::write(&path, "url = \"ws://beamline:9000/xps_operator\"\n").unwrap();

        let config = ListenerConfig::load_from(&path).unwrap();
        assert_eq!(config.url, "ws://beamline:9000/xps_operator");
        assert_eq!(config.entity, "shot_mean");
        assert_eq!(config.config_path, path);
    }
}
