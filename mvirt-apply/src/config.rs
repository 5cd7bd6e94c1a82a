//! Apply configuration: overall timeout and retry policy.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::{Backoff, ConstantBackoff, ExponentialBackoff, NoRetry};

/// Default overall timeout for one reconcile call (20 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 1200;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    #[default]
    Exponential,
    Constant,
    None,
}

/// Retry policy for conflicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub strategy: BackoffStrategy,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// None retries until the timeout.
    pub max_retries: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            max_retries: Some(10),
        }
    }
}

impl RetryConfig {
    /// Build a fresh backoff policy. Each reconcile call gets its own.
    pub fn backoff(&self) -> Box<dyn Backoff> {
        let initial = Duration::from_millis(self.initial_delay_ms);
        match self.strategy {
            BackoffStrategy::Exponential => Box::new(ExponentialBackoff::new(
                initial,
                Duration::from_millis(self.max_delay_ms),
                self.multiplier,
                self.max_retries,
            )),
            BackoffStrategy::Constant => Box::new(ConstantBackoff::new(initial, self.max_retries)),
            BackoffStrategy::None => Box::new(NoRetry),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    /// Overall timeout per reconcile call. None disables it.
    pub timeout_secs: Option<u64>,
    pub retry: RetryConfig,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Some(DEFAULT_TIMEOUT_SECS),
            retry: RetryConfig::default(),
        }
    }
}

impl ApplyConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Load from a JSON file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let multiplier = self.retry.multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.multiplier must be a finite number >= 1.0, got {}",
                multiplier
            )));
        }
        Ok(())
    }
}
