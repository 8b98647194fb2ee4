//! Import configuration.
//!
//! Built once per process and passed by reference. Sources, lowest to highest
//! precedence: defaults, TOML file, `.env`, process environment, CLI flags
//! (applied by the binary).

use crate::client::RetryPolicy;
use crate::store::StoreLayout;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://financialmodelingprep.com/stable";

/// Environment variables read by [`ImportConfig::apply_env`].
pub const ENV_API_KEY: &str = "API_KEY";
pub const ENV_MAX_WORKERS: &str = "MAX_WORKERS";
pub const ENV_REQUESTS_PER_MINUTE: &str = "REQUESTS_PER_MINUTE";
pub const ENV_DATA_DIR: &str = "STOCKLAKE_DATA_DIR";
pub const ENV_BASE_URL: &str = "STOCKLAKE_BASE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing API key (set API_KEY in the environment or .env)")]
    MissingApiKey,

    #[error("max_workers must be at least 1, got {0}")]
    InvalidWorkers(usize),

    #[error("requests_per_minute must be at least 1, got {0}")]
    InvalidRateLimit(u32),

    #[error("rate limit window must be longer than zero")]
    InvalidRateWindow,

    #[error("max_attempts must be at least 1, got {0}")]
    InvalidAttempts(u32),

    #[error("request_timeout_secs must be at least 1")]
    InvalidTimeout,

    #[error("{var}={value:?} is not a valid value")]
    InvalidEnv { var: &'static str, value: String },

    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportConfig {
    pub api_key: String,
    pub base_url: String,
    pub data_dir: PathBuf,
    pub max_workers: usize,
    pub requests_per_minute: u32,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    /// Backoff before retry `n` (0-based) is `backoff_base_secs * 2^n`.
    pub backoff_base_secs: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            data_dir: PathBuf::from("data"),
            max_workers: 16,
            requests_per_minute: 700,
            request_timeout_secs: 30,
            max_attempts: 5,
            backoff_base_secs: 1,
        }
    }
}

impl fmt::Debug for ImportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = if self.api_key.is_empty() { "" } else { "<redacted>" };
        f.debug_struct("ImportConfig")
            .field("api_key", &key)
            .field("base_url", &self.base_url)
            .field("data_dir", &self.data_dir)
            .field("max_workers", &self.max_workers)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_attempts", &self.max_attempts)
            .field("backoff_base_secs", &self.backoff_base_secs)
            .finish()
    }
}

impl ImportConfig {
    pub fn from_toml(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content, path)
    }

    /// Overlay values found through `lookup` (normally `std::env::var`).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(key) = get(ENV_API_KEY) {
            self.api_key = key;
        }
        if let Some(url) = get(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(dir) = get(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(value) = get(ENV_MAX_WORKERS) {
            self.max_workers = value.parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_MAX_WORKERS,
                value,
            })?;
        }
        if let Some(value) = get(ENV_REQUESTS_PER_MINUTE) {
            self.requests_per_minute = value.parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_REQUESTS_PER_MINUTE,
                value,
            })?;
        }
        Ok(())
    }

    /// Defaults, then the optional TOML file, then `.env`, then the process environment.
    ///
    /// The result is not validated; CLI overrides are applied before [`validate`](Self::validate).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        // A missing .env is normal.
        if let Ok(env_path) = dotenvy::dotenv() {
            tracing::debug!(path = %env_path.display(), "loaded .env");
        }
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if self.max_workers == 0 {
            return Err(ConfigError::InvalidWorkers(self.max_workers));
        }
        if self.requests_per_minute == 0 {
            return Err(ConfigError::InvalidRateLimit(self.requests_per_minute));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidAttempts(self.max_attempts));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        Ok(())
    }

    pub fn layout(&self) -> StoreLayout {
        StoreLayout::new(&self.data_dir)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_secs(self.backoff_base_secs))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
