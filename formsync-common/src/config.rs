//! Configuration file resolution and loading
//!
//! Config file priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. `~/.config/formsync/<name>.toml` or `/etc/formsync/<name>.toml`
//!
//! No file at all is not an error: callers fall back to built-in defaults.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Logging configuration shared by all formsync binaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolve which config file to load, if any
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    file_name: &str,
) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: platform config locations
    let user_config = dirs::config_dir().map(|d| d.join("formsync").join(file_name));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/formsync").join(file_name);
    if cfg!(unix) && system_config.exists() {
        return Some(system_config);
    }

    None
}

/// OS-dependent default data folder
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("formsync"))
        .unwrap_or_else(|| PathBuf::from("./formsync_data"))
}

/// Load and parse a TOML file into `T`
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse TOML {}: {}", path.display(), e)))
}

/// Load `T` from the resolved config file, or use `T::default()` when none exists
pub fn load_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    match path {
        Some(path) => {
            let config = load_toml(path)?;
            tracing::info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        None => {
            tracing::info!("No configuration file found, using built-in defaults");
            Ok(T::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Sample {
        #[serde(default)]
        port: u16,
        #[serde(default)]
        logging: LoggingConfig,
    }

    #[test]
    fn test_cli_path_wins() {
        let path = PathBuf::from("/tmp/explicit.toml");
        assert_eq!(
            resolve_config_path(Some(&path), "FORMSYNC_TEST_UNSET_VAR", "x.toml"),
            Some(path)
        );
    }

    #[test]
    fn test_load_toml_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.toml");
        std::fs::write(&path, "port = 6000\n").unwrap();

        let sample: Sample = load_toml(&path).unwrap();
        assert_eq!(sample.port, 6000);
        assert_eq!(sample.logging.level, "info");
    }

    #[test]
    fn test_load_toml_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "port = [").unwrap();

        let result: Result<Sample> = load_toml(&path);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_or_default_without_file() {
        let sample: Sample = load_or_default(None).unwrap();
        assert_eq!(sample, Sample::default());
    }
}
