use crate::Error;
use bonkarena_client::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, str::FromStr, time::Duration};
use tracing::Level;

/// Backoff settings for server sync, in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub retry_non_idempotent: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::sync();
        Self {
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            retry_non_idempotent: policy.retry_non_idempotent,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            retry_non_idempotent: config.retry_non_idempotent,
        }
    }
}

/// Configuration of one player's ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Wallet address the snapshot is stored under.
    pub address: String,
    pub server_url: String,
    pub storage_directory: PathBuf,
    pub log_level: String,
    pub log_json: bool,
    pub sync: RetryConfig,
    /// Buffered balance events per subscriber. `0` uses the default.
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: String::new(),
            server_url: "http://127.0.0.1:8080".to_string(),
            storage_directory: PathBuf::from("bonkarena-data"),
            log_level: "info".to_string(),
            log_json: false,
            sync: RetryConfig::default(),
            event_capacity: 0,
        }
    }
}

impl Config {
    /// Read and validate a YAML config file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("could not read {}: {err}", path.display())))?;
        Self::parse(&contents)
    }

    pub fn parse(yaml: &str) -> Result<Self, Error> {
        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|err| Error::Config(format!("could not parse config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.address.trim().is_empty() {
            return Err(Error::Config("address is required".to_string()));
        }
        if self.address.contains(['/', '\\']) || self.address.starts_with('.') {
            return Err(Error::Config(format!("invalid address: {}", self.address)));
        }
        if self.sync.max_attempts == 0 {
            return Err(Error::Config("sync.max_attempts must be at least 1".to_string()));
        }
        self.log_level()?;
        Ok(())
    }

    pub fn log_level(&self) -> Result<Level, Error> {
        Level::from_str(&self.log_level)
            .map_err(|_| Error::Config(format!("invalid log level: {}", self.log_level)))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.sync)
    }
}
