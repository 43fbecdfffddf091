//! Capped exponential backoff.
//!
//! The first retry waits `initial`; every following retry waits the previous delay multiplied
//! by `factor`, capped at `max`. There is no jitter: identical configuration always yields the
//! identical schedule.
//!
//! ```rust
//! use std::time::Duration;
//! use backstop::Backoff;
//!
//! let backoff =
//!     Backoff::new(Duration::from_millis(100), Duration::from_millis(800), 2.0).unwrap();
//! let delays: Vec<_> = backoff.schedule().take(5).collect();
//! assert_eq!(
//!     delays,
//!     [100, 200, 400, 800, 800].map(Duration::from_millis).to_vec()
//! );
//! ```
//!
//! Products that overflow saturate to `max`, so a schedule never shrinks.

use std::time::Duration;

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackoffError {
    #[error("backoff factor must be a finite number > 1 (got {0})")]
    InvalidFactor(f64),
    #[error("max delay ({max:?}) must be >= initial delay ({initial:?})")]
    MaxLessThanInitial { initial: Duration, max: Duration },
}

/// Validated exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    factor: f64,
}

impl Default for Backoff {
    /// 1s initial, 8s cap, doubling.
    fn default() -> Self {
        Self { initial: Duration::from_secs(1), max: Duration::from_secs(8), factor: 2.0 }
    }
}

impl Backoff {
    /// Validate and build a backoff. `factor` must be finite and > 1, and `max >= initial`.
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Result<Self, BackoffError> {
        if !factor.is_finite() || factor <= 1.0 {
            return Err(BackoffError::InvalidFactor(factor));
        }
        if max < initial {
            return Err(BackoffError::MaxLessThanInitial { initial, max });
        }
        Ok(Self { initial, max, factor })
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Fresh delay sequence for one execution.
    pub fn schedule(&self) -> Schedule {
        Schedule { next: self.initial, max: self.max, factor: self.factor }
    }
}

/// Infinite iterator over successive backoff delays.
#[derive(Debug, Clone)]
pub struct Schedule {
    next: Duration,
    max: Duration,
    factor: f64,
}

impl Schedule {
    /// Return the current delay and advance to the next one.
    pub fn advance(&mut self) -> Duration {
        let current = self.next;
        self.next = scale(current, self.factor, self.max);
        current
    }
}

impl Iterator for Schedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.advance())
    }
}

/// `min(delay * factor, max)`, saturating at `max` when the product leaves `Duration`'s range.
fn scale(delay: Duration, factor: f64, max: Duration) -> Duration {
    let nanos = (delay.as_nanos() as f64 * factor).round();
    if !nanos.is_finite() || nanos >= max.as_nanos() as f64 {
        return max;
    }
    if nanos < u64::MAX as f64 {
        Duration::from_nanos(nanos as u64)
    } else {
        Duration::try_from_secs_f64(nanos / 1e9).map_or(max, |scaled| scaled.min(max))
    }
}
