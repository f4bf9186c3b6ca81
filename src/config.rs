//! Run configuration.
//!
//! Defaults come from [`crate::constants`]; a JSON file can override any of
//! them and command-line flags override the file.

use crate::constants::*;
use crate::request_file::RequestDefaults;
use crate::types::SamplingMethod;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key}: {message}")]
    Invalid { key: String, message: String },

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    pub fn invalid(key: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    pub batch_size: usize,
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
    pub batch_concurrency: usize,
    pub default_sampling_period: f64,
    pub default_sampling_method: SamplingMethod,
    pub ignore_older_days: u64,
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
    pub http_retries: usize,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
            default_sampling_period: DEFAULT_SAMPLING_PERIOD,
            default_sampling_method: SamplingMethod::Monitor,
            ignore_older_days: DEFAULT_IGNORE_OLDER_DAYS,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            http_retries: DEFAULT_HTTP_RETRIES,
        }
    }
}

impl KeeperConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        let config: KeeperConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: display,
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be greater than 0"));
        }
        if self.batch_concurrency == 0 {
            return Err(ConfigError::invalid(
                "batch_concurrency",
                "must be greater than 0",
            ));
        }
        if !self.default_sampling_period.is_finite() || self.default_sampling_period <= 0.0 {
            return Err(ConfigError::invalid(
                "default_sampling_period",
                format!("must be a positive number (got {})", self.default_sampling_period),
            ));
        }
        Ok(())
    }

    pub fn ignore_older(&self) -> Duration {
        Duration::from_secs(self.ignore_older_days * 86_400)
    }

    pub fn request_defaults(&self) -> RequestDefaults {
        RequestDefaults {
            sampling_period: self.default_sampling_period,
            sampling_method: self.default_sampling_method,
        }
    }
}
