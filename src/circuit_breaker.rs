//! Circuit breaker guarding one protected resource.
//!
//! State machine:
//!
//! ```text
//! Closed ──[failure_threshold failures]──────────> Open
//!   ▲                                               │
//!   │                                               │ [reset_timeout since last failure]
//!   │                                               ▼
//!   └──[half_open_trial_count probe successes]── HalfOpen
//!                       [any failure] ────────────> Open
//! ```
//!
//! - A success while `Closed` forgives one failure (the count decrements by one, never below
//!   zero) instead of resetting it.
//! - `HalfOpen` admits one probe at a time. Concurrent callers fail fast while a probe is in
//!   flight, so only one call ever tests a recovering resource.
//! - Every check-and-transition runs under one mutex; outcomes are applied in completion order.
//! - Clones share state. Construct one breaker per protected resource and hand clones to
//!   whoever calls it, or keep them in a [`CircuitBreakerRegistry`](crate::CircuitBreakerRegistry).

use crate::clock::{Clock, MonotonicClock};
use crate::telemetry::{CircuitBreakerEvent, NullSink, PolicyEvent, TelemetrySink};
use crate::ResilienceError;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CircuitState {
    /// Normal operating mode.
    Closed,
    /// Short-circuits calls until the reset timeout elapses.
    Open,
    /// Probe mode: single calls test whether the resource recovered.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        })
    }
}

/// Errors produced when validating breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitBreakerError {
    #[error("failure_threshold must be > 0 (got {provided})")]
    InvalidFailureThreshold { provided: usize },
    #[error("reset_timeout must be > 0 (got {0:?})")]
    InvalidResetTimeout(Duration),
    #[error("half_open_trial_count must be > 0 (got {provided})")]
    InvalidHalfOpenTrialCount { provided: usize },
}

/// Validated configuration for the circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    failure_threshold: usize,
    reset_timeout: Duration,
    half_open_trial_count: usize,
}

impl Default for CircuitBreakerConfig {
    /// 5 failures, 60s cooldown, 3 probe successes.
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            half_open_trial_count: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a config with validation.
    pub fn new(
        failure_threshold: usize,
        reset_timeout: Duration,
        half_open_trial_count: usize,
    ) -> Result<Self, CircuitBreakerError> {
        if failure_threshold == 0 {
            return Err(CircuitBreakerError::InvalidFailureThreshold { provided: 0 });
        }
        if reset_timeout.is_zero() {
            return Err(CircuitBreakerError::InvalidResetTimeout(reset_timeout));
        }
        if half_open_trial_count == 0 {
            return Err(CircuitBreakerError::InvalidHalfOpenTrialCount { provided: 0 });
        }
        Ok(Self { failure_threshold, reset_timeout, half_open_trial_count })
    }

    /// Builder starting from the defaults.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder { config: Self::default() }
    }

    /// Failures that trip the breaker from Closed.
    pub fn failure_threshold(&self) -> usize {
        self.failure_threshold
    }

    /// Time after the last failure before a probe is allowed.
    pub fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }

    /// Consecutive probe successes needed to close again.
    pub fn half_open_trial_count(&self) -> usize {
        self.half_open_trial_count
    }
}

/// Builder for [`CircuitBreakerConfig`]; validation happens in `build`.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn failure_threshold(mut self, failures: usize) -> Self {
        self.config.failure_threshold = failures;
        self
    }

    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.config.reset_timeout = timeout;
        self
    }

    pub fn half_open_trial_count(mut self, successes: usize) -> Self {
        self.config.half_open_trial_count = successes;
        self
    }

    pub fn build(self) -> Result<CircuitBreakerConfig, CircuitBreakerError> {
        let c = self.config;
        CircuitBreakerConfig::new(c.failure_threshold, c.reset_timeout, c.half_open_trial_count)
    }
}

/// Rejection returned by [`CircuitBreaker::try_acquire`] while the gate is shut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitOpen {
    /// Consecutive failures recorded when the call was rejected.
    pub failure_count: usize,
    /// Time since the most recent failure.
    pub open_for: Duration,
}

impl<E> From<CircuitOpen> for ResilienceError<E> {
    fn from(open: CircuitOpen) -> Self {
        ResilienceError::CircuitOpen { failure_count: open.failure_count, open_for: open.open_for }
    }
}

/// Point-in-time view of a breaker, read under its lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub half_open_successes: usize,
    /// Clock reading (ms) of the most recent failure.
    pub last_failure_millis: Option<u64>,
}

#[derive(Debug)]
struct BreakerCore {
    state: CircuitState,
    consecutive_failures: usize,
    last_failure_millis: Option<u64>,
    half_open_successes: usize,
    /// Incremented on every Open → HalfOpen transition.
    trial: u64,
    /// Trial number of the probe currently in flight.
    probe: Option<u64>,
}

impl Default for BreakerCore {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_millis: None,
            half_open_successes: 0,
            trial: 0,
            probe: None,
        }
    }
}

impl BreakerCore {
    fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            half_open_successes: self.half_open_successes,
            last_failure_millis: self.last_failure_millis,
        }
    }

    fn open_for(&self, now: u64) -> Duration {
        Duration::from_millis(now.saturating_sub(self.last_failure_millis.unwrap_or(now)))
    }

    /// Move to Open; returns the failure count at the trip.
    fn trip(&mut self, now: u64) -> usize {
        self.state = CircuitState::Open;
        self.last_failure_millis = Some(now);
        self.half_open_successes = 0;
        self.consecutive_failures
    }

    fn release_probe(&mut self, trial: Option<u64>) {
        if trial.is_some() && self.probe == trial {
            self.probe = None;
        }
    }
}

/// Circuit breaker guarding an async operation.
///
/// Clones share the same underlying state via `Arc`, so all handles observe and affect the
/// same circuit lifecycle.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    core: Arc<Mutex<BreakerCore>>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn TelemetrySink>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a breaker for the named resource.
    ///
    /// # Examples
    /// ```
    /// use backstop::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    /// let breaker = CircuitBreaker::new("billing-api", CircuitBreakerConfig::default());
    /// assert_eq!(breaker.state(), CircuitState::Closed);
    /// ```
    pub fn new(name: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            core: Arc::new(Mutex::new(BreakerCore::default())),
            config,
            clock: Arc::new(MonotonicClock::default()),
            sink: Arc::new(NullSink),
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(self, clock: C) -> Self {
        self.with_shared_clock(Arc::new(clock))
    }

    pub(crate) fn with_shared_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Send state transitions to a telemetry sink.
    pub fn with_sink<S: TelemetrySink + 'static>(self, sink: S) -> Self {
        self.with_shared_sink(Arc::new(sink))
    }

    pub(crate) fn with_shared_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state. Time alone never changes it; the Open → HalfOpen move happens when a
    /// call arrives after the cooldown.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Current consecutive failure count.
    pub fn failure_count(&self) -> usize {
        self.lock().consecutive_failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        self.lock().snapshot()
    }

    /// Force the breaker back to `Closed` with zeroed counters.
    ///
    /// A probe still in flight is disowned: its outcome is applied as an ordinary
    /// closed-state outcome.
    pub fn reset(&self) {
        {
            let mut core = self.lock();
            *core = BreakerCore { trial: core.trial, ..BreakerCore::default() };
        }
        tracing::info!(breaker = %self.name, "Circuit breaker reset → closed");
        self.emit(CircuitBreakerEvent::Reset);
    }

    /// Ask the gate for permission to call the resource.
    ///
    /// On success the returned [`Permit`] must be settled with [`Permit::success`] or
    /// [`Permit::failure`] once the call completes. Dropping it unsettled records nothing and
    /// frees the half-open probe slot.
    pub fn try_acquire(&self) -> Result<Permit<'_>, CircuitOpen> {
        let mut core = self.lock();
        let now = self.clock.now_millis();
        let state = core.state;
        match state {
            CircuitState::Closed => Ok(Permit::new(self, None)),
            CircuitState::Open => {
                let open_for = core.open_for(now);
                if open_for < self.config.reset_timeout {
                    return Err(CircuitOpen {
                        failure_count: core.consecutive_failures,
                        open_for,
                    });
                }
                core.state = CircuitState::HalfOpen;
                core.half_open_successes = 0;
                core.trial += 1;
                core.probe = Some(core.trial);
                let trial = core.trial;
                drop(core);
                tracing::info!(breaker = %self.name, trial, "Circuit breaker → half-open");
                self.emit(CircuitBreakerEvent::HalfOpen);
                Ok(Permit::new(self, Some(trial)))
            }
            CircuitState::HalfOpen => {
                if core.probe.is_some() {
                    return Err(CircuitOpen {
                        failure_count: core.consecutive_failures,
                        open_for: core.open_for(now),
                    });
                }
                core.probe = Some(core.trial);
                let trial = core.trial;
                tracing::debug!(
                    breaker = %self.name,
                    successes = core.half_open_successes,
                    needed = self.config.half_open_trial_count,
                    "Circuit breaker: half-open probe"
                );
                Ok(Permit::new(self, Some(trial)))
            }
        }
    }

    /// Executes the provided async operation under circuit breaker protection.
    ///
    /// # Errors
    /// Returns `ResilienceError::CircuitOpen` without invoking `operation` when the circuit is
    /// open or a half-open probe is already in flight. Returns `ResilienceError::Inner(E)` if
    /// the operation itself fails.
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        E: Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnOnce() -> Fut + Send,
    {
        let permit = self.try_acquire()?;
        match operation().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                permit.failure();
                Err(ResilienceError::Inner(e))
            }
        }
    }

    fn record_success(&self, trial: Option<u64>) {
        let mut core = self.lock();
        core.release_probe(trial);
        let current = core.trial;
        let state = core.state;
        let event = match state {
            CircuitState::Closed => {
                core.consecutive_failures = core.consecutive_failures.saturating_sub(1);
                None
            }
            CircuitState::HalfOpen if trial.is_some() && trial == Some(current) => {
                core.half_open_successes += 1;
                if core.half_open_successes >= self.config.half_open_trial_count {
                    core.state = CircuitState::Closed;
                    core.consecutive_failures = 0;
                    core.half_open_successes = 0;
                    Some(CircuitBreakerEvent::Closed)
                } else {
                    None
                }
            }
            // Late results from calls admitted before the current episode earn no credit.
            CircuitState::HalfOpen | CircuitState::Open => None,
        };
        drop(core);
        if let Some(event) = event {
            tracing::info!(breaker = %self.name, "Circuit breaker → closed");
            self.emit(event);
        }
    }

    fn record_failure(&self, trial: Option<u64>) {
        let mut core = self.lock();
        // Read under the guard so failures land in completion order.
        let now = self.clock.now_millis();
        core.release_probe(trial);
        let state = core.state;
        let tripped = match state {
            CircuitState::Closed => {
                core.consecutive_failures += 1;
                core.last_failure_millis = Some(now);
                if core.consecutive_failures >= self.config.failure_threshold {
                    Some(core.trip(now))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                core.consecutive_failures += 1;
                Some(core.trip(now))
            }
            CircuitState::Open => {
                // Completed after the trip; restart the cooldown from this failure.
                core.last_failure_millis = Some(now);
                None
            }
        };
        drop(core);
        if let Some(failure_count) = tripped {
            tracing::error!(
                breaker = %self.name,
                failures = failure_count,
                threshold = self.config.failure_threshold,
                "Circuit breaker → open"
            );
            self.emit(CircuitBreakerEvent::Opened { failure_count });
        }
    }

    fn emit(&self, event: CircuitBreakerEvent) {
        self.sink.emit(PolicyEvent::CircuitBreaker { breaker: self.name.clone(), event });
    }

    fn lock(&self) -> MutexGuard<'_, BreakerCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Permission to make one call through a [`CircuitBreaker`].
#[must_use = "a permit records nothing unless settled with success() or failure()"]
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: Option<u64>,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: Option<u64>) -> Self {
        Self { breaker, trial, settled: false }
    }

    /// True if this call is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.trial.is_some()
    }

    /// Record a successful call.
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success(self.trial);
    }

    /// Record a failed call.
    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.trial);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial.is_some() {
            self.breaker.lock().release_probe(self.trial);
        }
    }
}
