//! Controller configuration
//!
//! Loaded from an optional YAML file. Every field has a default so an absent
//! file yields a working (if backend-less) configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resource::Backend;
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Retry behavior for failed reconciles
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Requeues before a key is dropped
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first requeue, doubled on every further attempt
    #[serde(default = "default_base_delay_millis")]
    pub base_delay_millis: u64,
    /// Upper bound for the requeue delay
    #[serde(default = "default_max_delay_seconds")]
    pub max_delay_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_millis: default_base_delay_millis(),
            max_delay_seconds: default_max_delay_seconds(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_millis),
            max_delay: Duration::from_secs(self.max_delay_seconds),
        }
    }
}

fn default_max_retries() -> u32 {
    crate::retry::MAX_RETRIES
}

fn default_base_delay_millis() -> u64 {
    500
}

fn default_max_delay_seconds() -> u64 {
    30
}

fn default_method() -> String {
    "least_conn".to_string()
}

fn default_upstream_max_conns() -> u32 {
    100
}

fn default_workers() -> usize {
    1
}

fn default_request_timeout_seconds() -> u64 {
    30
}

/// Controller configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Backend pool every created service forwards to
    #[serde(default)]
    pub backends: Vec<Backend>,
    /// Balancing method of created L4 services
    #[serde(default = "default_method")]
    pub method: String,
    /// Per-backend connection limit of created L4 services
    #[serde(default = "default_upstream_max_conns")]
    pub upstream_max_conns: u32,
    /// Number of concurrent reconcile workers
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Timeout for a single load balancer API request
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            backends: Vec::new(),
            method: default_method(),
            upstream_max_conns: default_upstream_max_conns(),
            workers: default_workers(),
            request_timeout_seconds: default_request_timeout_seconds(),
            retry: RetryConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: ControllerConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or the defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(i) = self.backends.iter().position(|b| b.host.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("backends[{i}].host is empty")));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.request_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "requestTimeoutSeconds must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}
