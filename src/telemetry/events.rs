use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "telemetry-json")]
use serde_json::json;

/// Policy events emitted during execution.
///
/// Events describe what the policies did; they never influence control flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyEvent {
    /// Retry executor events, labelled with the operation being retried.
    Retry { operation: Arc<str>, event: RetryEvent },
    /// Circuit breaker events, labelled with the breaker's resource name.
    CircuitBreaker { breaker: Arc<str>, event: CircuitBreakerEvent },
}

/// Events emitted by the retry executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryEvent {
    /// A retry is about to be made.
    ///
    /// Emitted before sleeping.
    Attempt {
        /// The retry number (1-indexed; the initial call is not a retry)
        attempt: usize,
        /// The backoff delay before this retry
        delay: Duration,
    },
    /// The retry budget is spent and the last attempt still failed.
    Exhausted {
        /// Total number of invocations made
        total_attempts: usize,
        /// Total time spent in backoff
        total_delay: Duration,
    },
}

/// Events emitted by circuit breakers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerEvent {
    /// Circuit tripped to open. Calls are rejected until the reset timeout elapses.
    Opened {
        /// Consecutive failure count at the moment of the trip
        failure_count: usize,
    },
    /// Cooldown elapsed; a probe call is being let through.
    HalfOpen,
    /// Enough probes succeeded; normal operation resumes.
    Closed,
    /// Forced back to closed by an operator.
    Reset,
}

impl PolicyEvent {
    /// Severity this event should be logged at.
    pub fn level(&self) -> tracing::Level {
        match self {
            PolicyEvent::Retry { event: RetryEvent::Attempt { .. }, .. } => tracing::Level::INFO,
            PolicyEvent::Retry { event: RetryEvent::Exhausted { .. }, .. } => tracing::Level::WARN,
            PolicyEvent::CircuitBreaker { event: CircuitBreakerEvent::Opened { .. }, .. } => {
                tracing::Level::ERROR
            }
            PolicyEvent::CircuitBreaker { .. } => tracing::Level::INFO,
        }
    }

    /// Short human-readable description.
    pub fn message(&self) -> &'static str {
        match self {
            PolicyEvent::Retry { event: RetryEvent::Attempt { .. }, .. } => "retrying operation",
            PolicyEvent::Retry { event: RetryEvent::Exhausted { .. }, .. } => "retries exhausted",
            PolicyEvent::CircuitBreaker { event, .. } => match event {
                CircuitBreakerEvent::Opened { .. } => "circuit breaker opened",
                CircuitBreakerEvent::HalfOpen => "circuit breaker half-open",
                CircuitBreakerEvent::Closed => "circuit breaker closed",
                CircuitBreakerEvent::Reset => "circuit breaker reset",
            },
        }
    }

    /// Name of the operation or breaker that emitted the event.
    pub fn source(&self) -> &str {
        match self {
            PolicyEvent::Retry { operation, .. } => operation,
            PolicyEvent::CircuitBreaker { breaker, .. } => breaker,
        }
    }
}

impl fmt::Display for PolicyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyEvent::Retry { operation, event } => write!(f, "Retry[{}]::{}", operation, event),
            PolicyEvent::CircuitBreaker { breaker, event } => {
                write!(f, "CircuitBreaker[{}]::{}", breaker, event)
            }
        }
    }
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryEvent::Attempt { attempt, delay } => {
                write!(f, "Attempt(#{}, delay={:?})", attempt, delay)
            }
            RetryEvent::Exhausted { total_attempts, total_delay } => {
                write!(f, "Exhausted(attempts={}, delay={:?})", total_attempts, total_delay)
            }
        }
    }
}

impl fmt::Display for CircuitBreakerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerEvent::Opened { failure_count } => {
                write!(f, "Opened(failures={})", failure_count)
            }
            CircuitBreakerEvent::HalfOpen => write!(f, "HalfOpen"),
            CircuitBreakerEvent::Closed => write!(f, "Closed"),
            CircuitBreakerEvent::Reset => write!(f, "Reset"),
        }
    }
}

#[cfg_attr(not(feature = "telemetry-json"), allow(dead_code))]
#[inline]
fn clamp_u64(val: u128) -> u64 {
    val.min(u128::from(u64::MAX)) as u64
}

/// Convert a PolicyEvent into a JSON value for sinks.
#[cfg(feature = "telemetry-json")]
pub fn event_to_json(event: &PolicyEvent) -> serde_json::Value {
    let level = event.level().to_string();
    match event {
        PolicyEvent::Retry { operation, event } => match event {
            RetryEvent::Attempt { attempt, delay } => json!({
                "kind": "retry_attempt",
                "level": level,
                "operation": operation.as_ref(),
                "attempt": *attempt,
                "delay_ms": clamp_u64(delay.as_millis()),
            }),
            RetryEvent::Exhausted { total_attempts, total_delay } => json!({
                "kind": "retry_exhausted",
                "level": level,
                "operation": operation.as_ref(),
                "attempts": *total_attempts,
                "delay_ms": clamp_u64(total_delay.as_millis()),
            }),
        },
        PolicyEvent::CircuitBreaker { breaker, event } => match event {
            CircuitBreakerEvent::Opened { failure_count } => json!({
                "kind": "circuit_opened",
                "level": level,
                "breaker": breaker.as_ref(),
                "failures": *failure_count,
            }),
            CircuitBreakerEvent::HalfOpen => {
                json!({ "kind": "circuit_half_open", "level": level, "breaker": breaker.as_ref() })
            }
            CircuitBreakerEvent::Closed => {
                json!({ "kind": "circuit_closed", "level": level, "breaker": breaker.as_ref() })
            }
            CircuitBreakerEvent::Reset => {
                json!({ "kind": "circuit_reset", "level": level, "breaker": breaker.as_ref() })
            }
        },
    }
}
