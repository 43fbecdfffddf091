//! Plain-data settings for loading resilience configuration from files or the environment.
//!
//! Durations are whole milliseconds and every field falls back to its default, so a partial
//! document such as `{"breaker": {"failure_threshold": 3}}` is valid. Settings are converted
//! into validated configs with `TryFrom`; nothing is checked until then.
//!
//! ```
//! use backstop::{BreakerSettings, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let settings = BreakerSettings { reset_timeout_ms: 5_000, ..Default::default() };
//! let config = CircuitBreakerConfig::try_from(&settings).unwrap();
//! assert_eq!(config.reset_timeout(), Duration::from_secs(5));
//! ```

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerError};
use crate::retry::{BuildError, RetryPolicy};
use std::time::Duration;

/// Errors converting settings into validated configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("breaker settings: {0}")]
    Breaker(#[from] CircuitBreakerError),
    #[error("retry settings: {0}")]
    Retry(#[from] BuildError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BreakerSettings {
    pub failure_threshold: usize,
    pub reset_timeout_ms: u64,
    pub half_open_trial_count: usize,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let config = CircuitBreakerConfig::default();
        Self {
            failure_threshold: config.failure_threshold(),
            reset_timeout_ms: millis(config.reset_timeout()),
            half_open_trial_count: config.half_open_trial_count(),
        }
    }
}

impl TryFrom<&BreakerSettings> for CircuitBreakerConfig {
    type Error = CircuitBreakerError;

    fn try_from(s: &BreakerSettings) -> Result<Self, Self::Error> {
        CircuitBreakerConfig::new(
            s.failure_threshold,
            Duration::from_millis(s.reset_timeout_ms),
            s.half_open_trial_count,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RetrySettings {
    pub max_attempts: usize,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts(),
            initial_delay_ms: millis(policy.initial_delay()),
            max_delay_ms: millis(policy.max_delay()),
            backoff_factor: policy.backoff_factor(),
        }
    }
}

impl TryFrom<&RetrySettings> for RetryPolicy {
    type Error = BuildError;

    fn try_from(s: &RetrySettings) -> Result<Self, Self::Error> {
        RetryPolicy::builder()
            .max_attempts(s.max_attempts)
            .initial_delay(Duration::from_millis(s.initial_delay_ms))
            .max_delay(Duration::from_millis(s.max_delay_ms))
            .backoff_factor(s.backoff_factor)
            .build()
    }
}

/// Breaker and retry settings for one protected resource.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ResilienceSettings {
    pub breaker: BreakerSettings,
    pub retry: RetrySettings,
}

impl ResilienceSettings {
    /// Validate both halves.
    pub fn validate(&self) -> Result<(CircuitBreakerConfig, RetryPolicy), ConfigError> {
        let breaker = CircuitBreakerConfig::try_from(&self.breaker)?;
        let retry = RetryPolicy::try_from(&self.retry)?;
        Ok((breaker, retry))
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
