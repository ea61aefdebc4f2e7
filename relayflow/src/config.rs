//! Engine configuration.

use crate::errors::ConfigError;
use crate::pipeline::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning knobs for a forwarder run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Retries granted per stage, on top of the first attempt.
    pub retries: u32,
    /// Base delay before a retry, in milliseconds.
    pub backoff_ms: u64,
    /// Cap applied to every computed delay, in milliseconds.
    pub max_backoff_ms: u64,
    /// How the delay grows across attempts.
    pub backoff_policy: BackoffPolicy,
    /// Capacity of the intake queue and of every internal buffer.
    pub queue_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff_ms: 100,
            max_backoff_ms: 30_000,
            backoff_policy: BackoffPolicy::default(),
            queue_size: 1000,
        }
    }
}

impl Config {
    /// Creates a config with the default tuning.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-stage retry budget.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the base backoff delay.
    #[must_use]
    pub fn with_backoff_ms(mut self, delay: u64) -> Self {
        self.backoff_ms = delay;
        self
    }

    /// Sets the backoff cap.
    #[must_use]
    pub fn with_max_backoff_ms(mut self, delay: u64) -> Self {
        self.max_backoff_ms = delay;
        self
    }

    /// Sets the backoff policy.
    #[must_use]
    pub fn with_backoff_policy(mut self, policy: BackoffPolicy) -> Self {
        self.backoff_policy = policy;
        self
    }

    /// Sets the queue capacity.
    #[must_use]
    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.queue_size = size;
        self
    }

    /// The base backoff delay.
    #[must_use]
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// The backoff cap.
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Rejects configs no pipeline can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_size == 0 {
            return Err(ConfigError::ZeroQueueSize);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.retries, 3);
        assert_eq!(config.backoff_ms, 100);
        assert_eq!(config.max_backoff_ms, 30_000);
        assert_eq!(config.backoff_policy, BackoffPolicy::Exponential);
        assert_eq!(config.queue_size, 1000);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new()
            .with_retries(5)
            .with_backoff_ms(250)
            .with_max_backoff_ms(4000)
            .with_backoff_policy(BackoffPolicy::Linear)
            .with_queue_size(64);

        assert_eq!(config.retries, 5);
        assert_eq!(config.backoff(), Duration::from_millis(250));
        assert_eq!(config.max_backoff(), Duration::from_millis(4000));
        assert_eq!(config.backoff_policy, BackoffPolicy::Linear);
        assert_eq!(config.queue_size, 64);
    }

    #[test]
    fn test_validate_rejects_zero_queue() {
        let config = Config::new().with_queue_size(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroQueueSize));
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_retries_is_valid() {
        let config = Config::new().with_retries(0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialize() {
        let config = Config::new().with_backoff_policy(BackoffPolicy::Constant);
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
