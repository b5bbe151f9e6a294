//! formsync-server configuration
//!
//! Priority: command-line arguments > environment (via clap `env`) > TOML
//! file > built-in defaults.

use formsync_common::config::{default_data_dir, LoggingConfig};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Interface to bind
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Optional JSON field catalog replacing the built-in catalogs
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,

    /// Per-scope event buffer of the change broadcaster
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    /// How long the bulk gate stays closed after a bulk commit
    #[serde(default = "default_bulk_settle_ms")]
    pub bulk_settle_ms: u64,

    /// Upper bound for retrying writes on "database is locked"
    #[serde(default = "default_max_lock_wait_ms")]
    pub max_lock_wait_ms: u64,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_database_path() -> PathBuf {
    default_data_dir().join("formsync.db")
}

fn default_bind_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5740
}

fn default_broadcast_capacity() -> usize {
    100
}

fn default_bulk_settle_ms() -> u64 {
    500
}

fn default_max_lock_wait_ms() -> u64 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            bind_addr: default_bind_addr(),
            port: default_port(),
            catalog_path: None,
            broadcast_capacity: default_broadcast_capacity(),
            bulk_settle_ms: default_bulk_settle_ms(),
            max_lock_wait_ms: default_max_lock_wait_ms(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Command-line configuration overrides
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub database_path: Option<PathBuf>,
    pub bind_addr: Option<String>,
    pub port: Option<u16>,
    pub catalog_path: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl ServerConfig {
    /// Apply CLI overrides on top of file/default values
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(path) = overrides.database_path {
            self.database_path = path;
        }
        if let Some(addr) = overrides.bind_addr {
            self.bind_addr = addr;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if overrides.catalog_path.is_some() {
            self.catalog_path = overrides.catalog_path;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        self
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn bulk_settle(&self) -> Duration {
        Duration::from_millis(self.bulk_settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 5740);
        assert_eq!(config.bulk_settle(), Duration::from_millis(500));
        assert_eq!(config.listen_addr(), "127.0.0.1:5740");
        assert!(config.database_path.ends_with("formsync.db"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            port = 6001
            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 6001);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.broadcast_capacity, 100);
        assert!(config.catalog_path.is_none());
    }

    #[test]
    fn test_overrides_win() {
        let config = ServerConfig::default().with_overrides(ConfigOverrides {
            port: Some(7000),
            log_level: Some("trace".into()),
            ..Default::default()
        });
        assert_eq!(config.port, 7000);
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.bind_addr, "127.0.0.1");
    }
}
