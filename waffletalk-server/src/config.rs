//! Server configuration, read from a JSON file.
//!
//! Lookup order for the file: first CLI argument, then `WAFFLETALK_CONFIG`,
//! then `/etc/waffletalk.json`. Every field is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use waffletalk_core::SetConfig;

use crate::error::ConfigError;
use crate::storage::StoreConfig;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/waffletalk.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Database directory
    pub storage_path: PathBuf,
    /// Interval of the background journal flush
    pub flush_interval_ms: u64,
    /// Bucket size bound of every ordered set
    pub max_bucket_size: usize,
    /// Rank promotion probability of every ordered set
    pub promotion_probability: f64,
    /// Worker field of issued snowflakes
    pub worker_id: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let set = SetConfig::default();
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            storage_path: PathBuf::from("waffletalk_data"),
            flush_interval_ms: 1000,
            max_bucket_size: set.max_bucket_size,
            promotion_probability: set.promotion_probability,
            worker_id: std::env::var("WORKER_ID")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        }
    }
}

impl ServerConfig {
    /// Defaults with storage under `path` (used by tests).
    pub fn with_storage(bind_addr: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            storage_path: path.into(),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolve the config file from the process arguments and environment.
    /// A missing default file yields the defaults; a missing explicit file
    /// is an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let explicit = std::env::args()
            .nth(1)
            .or_else(|| std::env::var("WAFFLETALK_CONFIG").ok())
            .map(PathBuf::from);
        match explicit {
            Some(path) => Self::load(&path),
            None => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Self::load(path)
                } else {
                    log::info!("{DEFAULT_CONFIG_PATH} not found, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn set_config(&self) -> SetConfig {
        SetConfig {
            max_bucket_size: self.max_bucket_size.max(1),
            promotion_probability: self.promotion_probability,
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            path: self.storage_path.clone(),
            ..StoreConfig::default()
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.flush_interval_ms, 1000);
        assert_eq!(config.max_bucket_size, 64);
        assert_eq!(config.promotion_probability, 0.5);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("waffletalk.json");
        std::fs::write(&path, r#"{ "bind_addr": "0.0.0.0:8080", "max_bucket_size": 16 }"#).unwrap();
        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.set_config().max_bucket_size, 16);
        assert_eq!(config.flush_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(ServerConfig::load(&missing), Err(ConfigError::Io { .. })));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{ bind_addr").unwrap();
        assert!(matches!(ServerConfig::load(&broken), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_with_storage() {
        let config = ServerConfig::with_storage("127.0.0.1:0", "/tmp/wt");
        assert_eq!(config.store_config().path, PathBuf::from("/tmp/wt"));
        assert_eq!(config.bind_addr, "127.0.0.1:0");
    }
}
