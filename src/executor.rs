//! Breaker-outside, retry-inside composition.
//!
//! The breaker sees exactly one verdict per logical call, after every internal retry: a call
//! that fails twice and then succeeds is one success, and a call that ends in
//! `RetryExhausted` or `NonRetryable` is one failure. `failure_threshold` therefore counts
//! fully failed calls, never raw attempts.

use crate::circuit_breaker::CircuitBreaker;
use crate::classify::{DefaultClassifier, ErrorClassifier, RemoteFailure};
use crate::config::{ConfigError, ResilienceSettings};
use crate::error::{OperationId, TaggedError};
use crate::retry::RetryExecutor;
use crate::sleeper::Sleeper;
use crate::telemetry::TelemetrySink;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runs operations through a [`CircuitBreaker`] wrapped around a [`RetryExecutor`].
///
/// Cheap to clone; clones share the breaker.
///
/// # Examples
/// ```
/// use backstop::{
///     CircuitBreaker, CircuitBreakerConfig, InstantSleeper, OperationId, RemoteError,
///     ResilientExecutor, RetryExecutor, RetryPolicy,
/// };
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let executor = ResilientExecutor::new(
///     CircuitBreaker::new("users-api", CircuitBreakerConfig::default()),
///     RetryExecutor::new(RetryPolicy::default()).with_sleeper(InstantSleeper),
/// );
/// let op = OperationId::new("GET", "/users/42");
/// let user = executor.execute(&op, || async { Ok::<_, RemoteError>("ada") }).await.unwrap();
/// assert_eq!(user, "ada");
/// # });
/// ```
#[derive(Clone, Debug)]
pub struct ResilientExecutor {
    breaker: CircuitBreaker,
    retry: RetryExecutor,
}

impl ResilientExecutor {
    pub fn new(breaker: CircuitBreaker, retry: RetryExecutor) -> Self {
        Self { breaker, retry }
    }

    /// Build a breaker named `name` and a retry executor from plain settings.
    pub fn from_settings(
        name: impl Into<Arc<str>>,
        settings: &ResilienceSettings,
    ) -> Result<Self, ConfigError> {
        let (breaker, retry) = settings.validate()?;
        Ok(Self::new(CircuitBreaker::new(name, breaker), RetryExecutor::new(retry)))
    }

    /// Send breaker transitions and retry events to one sink.
    pub fn with_sink<S: TelemetrySink + 'static>(self, sink: S) -> Self {
        let sink: Arc<dyn TelemetrySink> = Arc::new(sink);
        Self {
            breaker: self.breaker.with_shared_sink(sink.clone()),
            retry: self.retry.with_shared_sink(sink),
        }
    }

    pub fn with_sleeper<S: Sleeper + 'static>(self, sleeper: S) -> Self {
        Self { retry: self.retry.with_sleeper(sleeper), ..self }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    /// Run `operation` with the [`DefaultClassifier`].
    ///
    /// # Errors
    /// Every terminal failure comes back as a [`TaggedError`]: a quarantined call carries
    /// `CircuitOpen` with a retry count of zero; otherwise the retry outcome is tagged with the
    /// breaker state after the failure was recorded.
    pub async fn execute<T, E, Fut, Op>(
        &self,
        op: &OperationId,
        operation: Op,
    ) -> Result<T, TaggedError<E>>
    where
        T: Send,
        E: RemoteFailure + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        self.run(op, operation, &DefaultClassifier, None).await
    }

    /// Run `operation` with a caller-supplied classifier.
    pub async fn execute_with<T, E, Fut, Op, C>(
        &self,
        op: &OperationId,
        operation: Op,
        classifier: C,
    ) -> Result<T, TaggedError<E>>
    where
        T: Send,
        E: Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut() -> Fut + Send,
        C: ErrorClassifier<E>,
    {
        self.run(op, operation, &classifier, None).await
    }

    /// Like [`execute_with`](Self::execute_with), abandoning the call when `cancel` fires.
    /// A cancelled call is not recorded by the breaker.
    pub async fn execute_cancellable<T, E, Fut, Op, C>(
        &self,
        op: &OperationId,
        operation: Op,
        classifier: C,
        cancel: &CancellationToken,
    ) -> Result<T, TaggedError<E>>
    where
        T: Send,
        E: Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut() -> Fut + Send,
        C: ErrorClassifier<E>,
    {
        self.run(op, operation, &classifier, Some(cancel)).await
    }

    pub(crate) async fn run<T, E, Fut, Op, C>(
        &self,
        op: &OperationId,
        operation: Op,
        classifier: &C,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, TaggedError<E>>
    where
        T: Send,
        E: Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut() -> Fut + Send,
        C: ErrorClassifier<E> + ?Sized,
    {
        let permit = match self.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(open) => {
                tracing::debug!(
                    operation = %op,
                    breaker = self.breaker.name(),
                    failures = open.failure_count,
                    "call rejected by open circuit"
                );
                return Err(TaggedError::new(op.clone(), open.into(), self.breaker.state()));
            }
        };

        let label: Arc<str> = Arc::from(op.to_string());
        match self.retry.run(&label, operation, classifier, cancel).await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(err) => {
                if err.is_cancelled() {
                    drop(permit);
                } else {
                    permit.failure();
                }
                Err(TaggedError::new(op.clone(), err, self.breaker.state()))
            }
        }
    }
}
