//! Retry executor for fallible async operations.
//!
//! Semantics:
//! - `max_attempts` counts *retries*: an operation is invoked at most `max_attempts + 1` times,
//!   and `max_attempts = 0` means exactly one invocation.
//! - The classifier runs on every failure, before the budget check. A fatal failure returns
//!   `NonRetryable` immediately, even with retries left.
//! - Delays follow the policy's [`Backoff`] schedule: `initial`, then multiplied by the factor
//!   and capped. A fresh schedule is started for every execution.
//! - The [`Sleeper`] controls how delays are applied (production uses `TokioSleeper`; tests can
//!   inject `InstantSleeper`/`TrackingSleeper`).
//!
//! Invariants:
//! - Invocations never exceed `max_attempts + 1`.
//! - The sleeper is called exactly once per retry, never after the last attempt.
//! - No state survives between executions.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use backstop::{RemoteError, RetryExecutor, RetryPolicy, TrackingSleeper};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(2)
//!     .initial_delay(Duration::from_millis(100))
//!     .build()
//!     .unwrap();
//! let sleeper = TrackingSleeper::new();
//! let retry = RetryExecutor::new(policy).with_sleeper(sleeper.clone());
//!
//! let result: Result<(), _> =
//!     retry.execute(|| async { Err(RemoteError::status(503, "unavailable")) }).await;
//! assert_eq!(result.unwrap_err().attempts(), 3);
//! assert_eq!(sleeper.calls(), [Duration::from_millis(100), Duration::from_millis(200)]);
//! # });
//! ```

use crate::backoff::{Backoff, BackoffError};
use crate::classify::{DefaultClassifier, ErrorClassifier, RemoteFailure};
use crate::config::millis;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::telemetry::{NullSink, PolicyEvent, RetryEvent, TelemetrySink};
use crate::ResilienceError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Errors returned when building a [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error("invalid backoff: {0}")]
    Backoff(#[from] BackoffError),
}

/// Immutable retry parameters: how many retries, and how long to wait before each.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: usize,
    backoff: Backoff,
}

impl Default for RetryPolicy {
    /// 3 retries, 1s initial delay doubling up to 8s.
    fn default() -> Self {
        Self { max_attempts: 3, backoff: Backoff::default() }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, backoff: Backoff) -> Self {
        Self { max_attempts, backoff }
    }

    /// Builder starting from the defaults.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Retries allowed after the first invocation.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn initial_delay(&self) -> Duration {
        self.backoff.initial()
    }

    pub fn max_delay(&self) -> Duration {
        self.backoff.max()
    }

    pub fn backoff_factor(&self) -> f64 {
        self.backoff.factor()
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: usize,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        let defaults = RetryPolicy::default();
        Self {
            max_attempts: defaults.max_attempts(),
            initial_delay: defaults.initial_delay(),
            max_delay: defaults.max_delay(),
            backoff_factor: defaults.backoff_factor(),
        }
    }

    /// Retries after the first invocation. Zero disables retrying.
    pub fn max_attempts(mut self, retries: usize) -> Self {
        self.max_attempts = retries;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn build(self) -> Result<RetryPolicy, BuildError> {
        let backoff = Backoff::new(self.initial_delay, self.max_delay, self.backoff_factor)?;
        Ok(RetryPolicy::new(self.max_attempts, backoff))
    }
}

/// Runs an operation under a [`RetryPolicy`].
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    sink: Arc<dyn TelemetrySink>,
    label: Arc<str>,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("label", &self.label)
            .field("sleeper", &"<sleeper>")
            .finish()
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            sleeper: Arc::new(TokioSleeper),
            sink: Arc::new(NullSink),
            label: Arc::from("operation"),
        }
    }

    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_sink<S: TelemetrySink + 'static>(self, sink: S) -> Self {
        self.with_shared_sink(Arc::new(sink))
    }

    pub(crate) fn with_shared_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = sink;
        self
    }

    /// Name attached to retry events and logs.
    pub fn with_label(mut self, label: impl Into<Arc<str>>) -> Self {
        self.label = label.into();
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Retry with the [`DefaultClassifier`]: transport failures and 5xx are retried.
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        E: RemoteFailure + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        self.run(&self.label, operation, &DefaultClassifier, None).await
    }

    /// Retry with a caller-supplied classifier.
    pub async fn execute_with<T, E, Fut, Op, C>(
        &self,
        operation: Op,
        classifier: C,
    ) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        E: Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut() -> Fut + Send,
        C: ErrorClassifier<E>,
    {
        self.run(&self.label, operation, &classifier, None).await
    }

    /// Like [`execute_with`](Self::execute_with), abandoning the sequence as soon as `cancel`
    /// fires. An in-flight attempt or backoff sleep is dropped.
    pub async fn execute_cancellable<T, E, Fut, Op, C>(
        &self,
        operation: Op,
        classifier: C,
        cancel: &CancellationToken,
    ) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        E: Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut() -> Fut + Send,
        C: ErrorClassifier<E>,
    {
        self.run(&self.label, operation, &classifier, Some(cancel)).await
    }

    pub(crate) async fn run<T, E, Fut, Op, C>(
        &self,
        label: &Arc<str>,
        mut operation: Op,
        classifier: &C,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        E: Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut() -> Fut + Send,
        C: ErrorClassifier<E> + ?Sized,
    {
        let mut schedule = self.policy.backoff.schedule();
        let mut total_delay = Duration::ZERO;
        let mut last: Option<E> = None;
        let mut invocations = 0usize;

        loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(ResilienceError::Cancelled { attempts: invocations, last });
            }

            invocations += 1;
            let outcome = match cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        return Err(ResilienceError::Cancelled { attempts: invocations, last });
                    }
                    outcome = operation() => outcome,
                },
                None => operation().await,
            };

            let error = match outcome {
                Ok(value) => {
                    if invocations > 1 {
                        tracing::debug!(operation = %label, attempts = invocations, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !classifier.is_retryable(&error) {
                tracing::debug!(operation = %label, attempts = invocations, "failure is not retryable");
                return Err(ResilienceError::NonRetryable { attempts: invocations, source: error });
            }

            if invocations > self.policy.max_attempts {
                tracing::warn!(
                    operation = %label,
                    attempts = invocations,
                    total_delay_ms = millis(total_delay),
                    "retries exhausted"
                );
                self.emit(
                    label,
                    RetryEvent::Exhausted { total_attempts: invocations, total_delay },
                );
                return Err(ResilienceError::RetryExhausted { attempts: invocations, source: error });
            }

            let delay = schedule.advance();
            total_delay = total_delay.saturating_add(delay);
            tracing::debug!(
                operation = %label,
                retry = invocations,
                delay_ms = millis(delay),
                "retrying after backoff"
            );
            self.emit(label, RetryEvent::Attempt { attempt: invocations, delay });
            last = Some(error);

            let sleep = self.sleeper.sleep(delay);
            match cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        return Err(ResilienceError::Cancelled { attempts: invocations, last });
                    }
                    _ = sleep => {}
                },
                None => sleep.await,
            }
        }
    }

    fn emit(&self, label: &Arc<str>, event: RetryEvent) {
        self.sink.emit(PolicyEvent::Retry { operation: label.clone(), event });
    }
}
