//! Client configuration.
//!
//! Layered the usual way: built-in defaults, then a TOML document, then
//! environment variables under a prefix (`ROUTECALL_` by default).
//!
//! ```toml
//! base_url = "https://api.example.com"
//! debounce_window_ms = 400
//! sweep_interval_ms = 1000
//! credentials = "include"
//!
//! [headers]
//! X-Client = "routecall"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;

use crate::debounce::{DEFAULT_SWEEP_INTERVAL, DEFAULT_WINDOW};
use crate::options::{Credentials, Mode, Redirect, ReferrerPolicy};

pub const DEFAULT_ENV_PREFIX: &str = "ROUTECALL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for environment variable {key}")]
    InvalidEnv { key: String, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Prefixed onto every relative request path.
    pub base_url: String,
    pub debounce_window_ms: u64,
    pub sweep_interval_ms: u64,
    /// Client-wide debounce switch; requests may override it.
    pub debounce: bool,
    pub credentials: Credentials,
    pub mode: Mode,
    pub redirect: Redirect,
    pub referrer_policy: ReferrerPolicy,
    /// Static default headers.
    pub headers: IndexMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            debounce_window_ms: DEFAULT_WINDOW.as_millis() as u64,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL.as_millis() as u64,
            debounce: true,
            credentials: Credentials::default(),
            mode: Mode::default(),
            redirect: Redirect::default(),
            referrer_policy: ReferrerPolicy::default(),
            headers: IndexMap::new(),
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Apply `{prefix}_BASE_URL`, `{prefix}_DEBOUNCE_WINDOW_MS`,
    /// `{prefix}_SWEEP_INTERVAL_MS` and `{prefix}_DEBOUNCE` from the process
    /// environment.
    pub fn with_env(self, prefix: &str) -> Result<Self, ConfigError> {
        self.with_env_from(prefix, |key| std::env::var(key).ok())
    }

    /// Same as [`with_env`](Self::with_env) with an explicit lookup.
    pub fn with_env_from<F>(mut self, prefix: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key = |name: &str| format!("{prefix}_{name}");

        if let Some(url) = lookup(&key("BASE_URL")) {
            self.base_url = url;
        }
        if let Some(ms) = parse_env(&lookup, &key("DEBOUNCE_WINDOW_MS"))? {
            self.debounce_window_ms = ms;
        }
        if let Some(ms) = parse_env(&lookup, &key("SWEEP_INTERVAL_MS"))? {
            self.sweep_interval_ms = ms;
        }
        if let Some(enabled) = parse_env(&lookup, &key("DEBOUNCE"))? {
            self.debounce = enabled;
        }
        self.validate()
    }

    /// The sweep ticks every `sweep_interval_ms`, so zero is rejected.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Zero {
                field: "sweep_interval_ms",
            });
        }
        Ok(self)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

fn parse_env<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                key: key.to_owned(),
                value,
            }),
    }
}
