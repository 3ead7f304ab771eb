//! Configuration for a watch session.
//!
//! Layered: defaults, then a TOML file, then environment variables.
//!
//! # Environment Variables
//!
//! Variables are prefixed with `WATCHTREE_` and use double underscores to
//! separate nested levels:
//! - `WATCHTREE_DEBOUNCE_MS=250` sets `debounce_ms`
//! - `WATCHTREE_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::WatchError;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// How long a path must be quiet before its event dispatches, in
    /// milliseconds. Zero dispatches on the next loop tick.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Capacity of each node's event channel.
    #[serde(default = "default_event_queue_size")]
    pub event_queue_size: usize,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default log level for all modules.
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides.
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_debounce_ms() -> u64 {
    500
}
fn default_event_queue_size() -> usize {
    100
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            event_queue_size: default_event_queue_size(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from `watchtree.toml` in the working directory, with
    /// environment overrides.
    pub fn load() -> Result<Self, WatchError> {
        Self::load_from(Path::new("watchtree.toml"))
    }

    /// Load settings from a specific TOML file, with environment
    /// overrides. A missing file falls back to defaults.
    pub fn load_from(path: &Path) -> Result<Self, WatchError> {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("WATCHTREE_").split("__"))
            .extract()
            .map_err(|e| WatchError::InitFailed {
                reason: format!("failed to load settings: {e}"),
            })
    }
}
