//! Configuration management

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use xps_broadcaster::BroadcasterConfig;

/// Run store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// SQLite file, survives restarts
    Sqlite,
    /// Process memory, lost on exit
    Memory,
}

/// Run store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,

    /// SQLite file (default: `<data_dir>/store/runs.db`)
    pub db_path: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Sqlite,
            db_path: None,
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Path to configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// WebSocket address viewers connect to
    pub broadcast_url: String,

    /// Base URL of the store's HTTP API, announced to viewers
    pub store_url: String,

    /// Run store backend
    pub store: StoreConfig,

    /// Unix socket for instrument events (default: runtime dir `xps.sock`)
    pub ingest_socket_path: Option<String>,

    /// Send the current run start to viewers that connect mid-run
    pub replay_start_to_late_joiners: bool,

    /// Per-viewer send timeout (seconds)
    pub send_timeout_secs: u64,

    /// Events buffered between ingest and dispatcher
    pub event_queue_size: usize,

    /// Log filter used when RUST_LOG is unset
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("daemon.toml"),
            broadcast_url: "ws://localhost:8765/xps_operator".to_string(),
            store_url: "http://localhost:8000".to_string(),
            store: StoreConfig::default(),
            ingest_socket_path: None,
            replay_start_to_late_joiners: false,
            send_timeout_secs: 5,
            event_queue_size: 64,
            log_level: "info".to_string(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default location, or create it
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_config_path()?)
    }

    /// Load configuration from `config_path`, writing defaults there if missing
    pub fn load_from(config_path: impl AsRef<Path>) -> Result<Self> {
        let config_path = config_path.as_ref().to_path_buf();

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let mut config: DaemonConfig =
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

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn broadcaster_config(&self) -> BroadcasterConfig {
        BroadcasterConfig {
            url: self.broadcast_url.clone(),
            store_url: self.store_url.clone(),
            replay_start_to_late_joiners: self.replay_start_to_late_joiners,
            send_timeout: self.send_timeout(),
        }
    }

    pub fn ingest_socket_path(&self) -> Result<PathBuf> {
        match &self.ingest_socket_path {
            Some(path) => xps_paths::expand_home(path),
            None => xps_paths::get_ingest_socket_path(),
        }
    }

    pub fn store_db_path(&self) -> Result<PathBuf> {
        match &self.store.db_path {
            Some(path) => xps_paths::expand_home(path),
            None => xps_paths::get_store_db_path(),
        }
    }

    fn default_config_path() -> Result<PathBuf> {
        Ok(xps_paths::get_config_dir()?.join("daemon.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_written_on_first_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("daemon.toml");

        let config = DaemonConfig::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.store.kind, StoreKind::Sqlite);
        assert!(!config.replay_start_to_late_joiners);

        let reloaded = DaemonConfig::load_from(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_parse_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("daemon.toml");
        std::fs::write(
            &path,
            r#"
broadcast_url = "ws://0.0.0.0:9000/xps_operator"
replay_start_to_late_joiners = true
send_timeout_secs = 2

[store]
kind = "memory"
"#,
        )
        .unwrap();

        let config = DaemonConfig::load_from(&path).unwrap();
        assert_eq!(config.store.kind, StoreKind::Memory);
        assert_eq!(config.store_url, "http://localhost:8000");

        let broadcaster = config.broadcaster_config();
        assert_eq!(broadcaster.url, "ws://0.0.0.0:9000/xps_operator");
        assert!(broadcaster.replay_start_to_late_joiners);
        assert_eq!(broadcaster.send_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_explicit_paths() {
        let config = DaemonConfig {
            ingest_socket_path: Some("/tmp/xps-test.sock".to_string()),
            store: StoreConfig {
                kind: StoreKind::Sqlite,
                db_path: Some("/tmp/xps-test.db".to_string()),
            },
            ..DaemonConfig::default()
        };
        assert_eq!(
            config.ingest_socket_path().unwrap(),
            PathBuf::from("/tmp/xps-test.sock")
        );
        assert_eq!(config.store_db_path().unwrap(), PathBuf::from("/tmp/xps-test.db"));
    }
}
