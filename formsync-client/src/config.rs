//! Client configuration
//!
//! Loadable from TOML; every field has a default so partial files work.

use formsync_common::config::load_or_default;
use formsync_common::Result;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientConfig {
    /// Server base URL, e.g. `http://127.0.0.1:5740`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Fields per parallel group in the per-field fallback
    #[serde(default = "default_group_size")]
    pub group_size: usize,

    /// Pause between per-field groups
    #[serde(default = "default_group_delay_ms")]
    pub group_delay_ms: u64,

    /// Quiet period before pending edits are flushed
    #[serde(default = "default_autosave_debounce_ms")]
    pub autosave_debounce_ms: u64,

    /// How long the local bulk gate stays closed after a bulk operation
    #[serde(default = "default_bulk_settle_ms")]
    pub bulk_settle_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Periodic resync while connected; `None` disables it
    #[serde(default = "default_resync_interval_ms")]
    pub resync_interval_ms: Option<u64>,

    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:5740".to_string()
}

fn default_group_size() -> usize {
    5
}

fn default_group_delay_ms() -> u64 {
    300
}

fn default_autosave_debounce_ms() -> u64 {
    800
}

fn default_bulk_settle_ms() -> u64 {
    500
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_resync_interval_ms() -> Option<u64> {
    Some(60_000)
}

fn default_reconnect_initial_ms() -> u64 {
    500
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            group_size: default_group_size(),
            group_delay_ms: default_group_delay_ms(),
            autosave_debounce_ms: default_autosave_debounce_ms(),
            bulk_settle_ms: default_bulk_settle_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            resync_interval_ms: default_resync_interval_ms(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

impl ClientConfig {
    /// Load from a TOML file, or defaults when `path` is `None`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        load_or_default(path)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn group_delay(&self) -> Duration {
        Duration::from_millis(self.group_delay_ms)
    }

    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    pub fn bulk_settle(&self) -> Duration {
        Duration::from_millis(self.bulk_settle_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn resync_interval(&self) -> Option<Duration> {
        self.resync_interval_ms
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }

    pub fn reconnect_bounds(&self) -> (Duration, Duration) {
        let initial = Duration::from_millis(self.reconnect_initial_ms.max(1));
        let max = Duration::from_millis(self.reconnect_max_ms).max(initial);
        (initial, max)
    }
}
