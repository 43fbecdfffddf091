//! Error types for resilience policies
use crate::circuit_breaker::CircuitState;
use crate::classify::RemoteFailure;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Unified error type for the retry executor and circuit breaker.
#[derive(Debug, Clone)]
pub enum ResilienceError<E> {
    /// The circuit breaker short-circuited the call; the operation never ran.
    CircuitOpen { failure_count: usize, open_for: Duration },
    /// The last attempt failed with a retryable error and the retry budget is spent.
    RetryExhausted { attempts: usize, source: E },
    /// The classifier declared the failure fatal; no further attempts were made.
    NonRetryable { attempts: usize, source: E },
    /// The caller cancelled the sequence. `last` is the most recent failure, if any.
    Cancelled { attempts: usize, last: Option<E> },
    /// The operation failed under a bare circuit breaker (no retry layer).
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitOpen { failure_count, open_for } => write!(
                f,
                "circuit breaker open ({} failures, open for {:?})",
                failure_count, open_for
            ),
            Self::RetryExhausted { attempts, source } => {
                write!(f, "retry exhausted after {} attempts; last error: {}", attempts, source)
            }
            Self::NonRetryable { attempts, source } => {
                write!(f, "non-retryable failure on attempt {}: {}", attempts, source)
            }
            Self::Cancelled { attempts, last: Some(last) } => {
                write!(f, "cancelled after {} attempts; last error: {}", attempts, last)
            }
            Self::Cancelled { attempts, last: None } => {
                write!(f, "cancelled after {} attempts", attempts)
            }
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source_error().map(|e| e as &dyn std::error::Error)
    }
}

impl<E> ResilienceError<E> {
    /// Check if this error is due to the circuit breaker
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
    /// Check if this error is due to retry exhaustion
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }
    /// Check if the classifier rejected retrying
    pub fn is_non_retryable(&self) -> bool {
        matches!(self, Self::NonRetryable { .. })
    }
    /// Check if the caller cancelled the call
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
    /// Check if this error wraps an inner error from a bare breaker call.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }
    /// Number of times the operation was invoked before this error surfaced.
    ///
    /// `Inner` counts as one attempt and `CircuitOpen` as none.
    pub fn attempts(&self) -> usize {
        match self {
            Self::CircuitOpen { .. } => 0,
            Self::RetryExhausted { attempts, .. }
            | Self::NonRetryable { attempts, .. }
            | Self::Cancelled { attempts, .. } => *attempts,
            Self::Inner(_) => 1,
        }
    }
    /// Borrow the underlying operation error, if one exists.
    pub fn source_error(&self) -> Option<&E> {
        match self {
            Self::RetryExhausted { source, .. } | Self::NonRetryable { source, .. } => {
                Some(source)
            }
            Self::Cancelled { last, .. } => last.as_ref(),
            Self::Inner(e) => Some(e),
            Self::CircuitOpen { .. } => None,
        }
    }
    /// Take the underlying operation error, if one exists.
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::RetryExhausted { source, .. } | Self::NonRetryable { source, .. } => {
                Some(source)
            }
            Self::Cancelled { last, .. } => last,
            Self::Inner(e) => Some(e),
            Self::CircuitOpen { .. } => None,
        }
    }
    /// Access `(failure_count, open_for)` if the breaker rejected the call.
    pub fn circuit_open_info(&self) -> Option<(usize, Duration)> {
        match self {
            Self::CircuitOpen { failure_count, open_for } => Some((*failure_count, *open_for)),
            _ => None,
        }
    }
    /// Map the wrapped operation error.
    pub fn map<F, U>(self, f: F) -> ResilienceError<U>
    where
        F: FnOnce(E) -> U,
    {
        match self {
            Self::CircuitOpen { failure_count, open_for } => {
                ResilienceError::CircuitOpen { failure_count, open_for }
            }
            Self::RetryExhausted { attempts, source } => {
                ResilienceError::RetryExhausted { attempts, source: f(source) }
            }
            Self::NonRetryable { attempts, source } => {
                ResilienceError::NonRetryable { attempts, source: f(source) }
            }
            Self::Cancelled { attempts, last } => {
                ResilienceError::Cancelled { attempts, last: last.map(f) }
            }
            Self::Inner(e) => ResilienceError::Inner(f(e)),
        }
    }
}

/// Ready-made operation error covering the usual remote failure taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// No response was received.
    #[error("connection failed: {0}")]
    Connection(String),
    /// The resource answered with a non-success status.
    #[error("status {status}: {message}")]
    Status { status: u16, message: String },
    /// The request was rejected before or without reaching the resource.
    #[error("validation failed: {0}")]
    Validation(String),
}

impl RemoteError {
    pub fn connection(message: impl Into<String>) -> Self {
        RemoteError::Connection(message.into())
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        RemoteError::Status { status, message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        RemoteError::Validation(message.into())
    }
}

impl RemoteFailure for RemoteError {
    fn response_status(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            RemoteError::Connection(_) | RemoteError::Validation(_) => None,
        }
    }

    fn failure_kind(&self) -> crate::FailureKind {
        match self {
            RemoteError::Validation(_) => crate::FailureKind::Fatal,
            other => crate::FailureKind::from_status(other.response_status()),
        }
    }
}

/// Identity of a protected operation: the endpoint and the method used on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OperationId {
    pub endpoint: String,
    pub method: String,
}

impl OperationId {
    pub fn new(method: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), method: method.into() }
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.endpoint)
    }
}

/// Terminal failure of a resilient call, carrying the metadata a caller needs to tell a
/// quarantined resource apart from one that kept rejecting requests.
#[derive(Debug, Clone)]
pub struct TaggedError<E> {
    error: ResilienceError<E>,
    retry_count: usize,
    circuit_state: CircuitState,
    timestamp: SystemTime,
    operation: OperationId,
}

impl<E> TaggedError<E> {
    pub(crate) fn new(
        operation: OperationId,
        error: ResilienceError<E>,
        circuit_state: CircuitState,
    ) -> Self {
        Self {
            retry_count: error.attempts(),
            error,
            circuit_state,
            timestamp: SystemTime::now(),
            operation,
        }
    }

    pub fn error(&self) -> &ResilienceError<E> {
        &self.error
    }

    pub fn into_error(self) -> ResilienceError<E> {
        self.error
    }

    /// Invocations of the operation made during this call; `0` when the breaker short-circuited.
    pub fn retry_count(&self) -> usize {
        self.retry_count
    }

    /// Breaker state once the failure had been recorded.
    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_state
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn operation(&self) -> &OperationId {
        &self.operation
    }

    /// True when the breaker refused the call without touching the resource.
    pub fn is_quarantined(&self) -> bool {
        self.error.is_circuit_open()
    }
}

impl<E: fmt::Display> TaggedError<E> {
    /// Flatten into the caller-facing error shape.
    pub fn report(&self) -> ErrorReport
    where
        E: RemoteFailure,
    {
        ErrorReport {
            message: self.error.to_string(),
            status_code: self.error.source_error().and_then(|e| e.response_status()),
            metadata: ErrorMetadata {
                timestamp_ms: self
                    .timestamp
                    .duration_since(UNIX_EPOCH)
                    .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                    .unwrap_or_default(),
                endpoint: self.operation.endpoint.clone(),
                method: self.operation.method.clone(),
                retry_count: self.retry_count,
                circuit_breaker_state: self.circuit_state,
            },
        }
    }
}

impl<E: fmt::Display> fmt::Display for TaggedError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed after {} attempts (circuit {}): {}",
            self.operation, self.retry_count, self.circuit_state, self.error
        )
    }
}

impl<E: std::error::Error + 'static> std::error::Error for TaggedError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Caller-facing error shape: `{message, status_code?, metadata}`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorReport {
    pub message: String,
    pub status_code: Option<u16>,
    pub metadata: ErrorMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorMetadata {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub endpoint: String,
    pub method: String,
    pub retry_count: usize,
    pub circuit_breaker_state: CircuitState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn circuit_open_display() {
        let err: ResilienceError<RemoteError> = ResilienceError::CircuitOpen {
            failure_count: 10,
            open_for: Duration::from_secs(30),
        };
        let msg = err.to_string();
        assert!(msg.contains("circuit breaker open"));
        assert!(msg.contains("10"));
        assert!(err.source().is_none());
        assert_eq!(err.attempts(), 0);
    }

    #[test]
    fn retry_exhausted_display_includes_last_error() {
        let err = ResilienceError::RetryExhausted {
            attempts: 4,
            source: RemoteError::status(503, "unavailable"),
        };
        let msg = err.to_string();
        assert!(msg.contains("4 attempts"));
        assert!(msg.contains("unavailable"));
        assert!(err.source().is_some());
    }

    #[test]
    fn cancelled_display_without_failure() {
        let err: ResilienceError<RemoteError> =
            ResilienceError::Cancelled { attempts: 0, last: None };
        assert_eq!(err.to_string(), "cancelled after 0 attempts");
        assert!(err.is_cancelled());
        assert!(err.source_error().is_none());
    }

    #[test]
    fn predicates_cover_all_variants() {
        let open: ResilienceError<RemoteError> =
            ResilienceError::CircuitOpen { failure_count: 1, open_for: Duration::ZERO };
        assert!(open.is_circuit_open());
        assert_eq!(open.circuit_open_info(), Some((1, Duration::ZERO)));

        let exhausted =
            ResilienceError::RetryExhausted { attempts: 2, source: RemoteError::connection("x") };
        assert!(exhausted.is_retry_exhausted());
        assert!(!exhausted.is_circuit_open());

        let fatal =
            ResilienceError::NonRetryable { attempts: 1, source: RemoteError::status(404, "") };
        assert!(fatal.is_non_retryable());
        assert_eq!(fatal.attempts(), 1);

        let inner = ResilienceError::Inner(RemoteError::connection("x"));
        assert!(inner.is_inner());
        assert_eq!(inner.attempts(), 1);
    }

    #[test]
    fn map_preserves_variant() {
        let err = ResilienceError::RetryExhausted { attempts: 3, source: 7u32 };
        let mapped = err.map(|n| n * 2);
        assert!(matches!(mapped, ResilienceError::RetryExhausted { attempts: 3, source: 14 }));
    }

    #[test]
    fn remote_error_classification() {
        use crate::FailureKind;
        assert_eq!(RemoteError::connection("x").failure_kind(), FailureKind::Transient);
        assert_eq!(RemoteError::status(500, "x").failure_kind(), FailureKind::Transient);
        assert_eq!(RemoteError::status(409, "x").failure_kind(), FailureKind::Fatal);
        assert_eq!(RemoteError::validation("x").failure_kind(), FailureKind::Fatal);
        assert_eq!(RemoteError::validation("x").response_status(), None);
    }

    #[test]
    fn tagged_error_report_carries_metadata() {
        let tagged = TaggedError::new(
            OperationId::new("POST", "/orders"),
            ResilienceError::RetryExhausted {
                attempts: 4,
                source: RemoteError::status(502, "bad gateway"),
            },
            CircuitState::Open,
        );
        assert_eq!(tagged.retry_count(), 4);
        assert!(!tagged.is_quarantined());

        let report = tagged.report();
        assert_eq!(report.status_code, Some(502));
        assert_eq!(report.metadata.endpoint, "/orders");
        assert_eq!(report.metadata.method, "POST");
        assert_eq!(report.metadata.retry_count, 4);
        assert_eq!(report.metadata.circuit_breaker_state, CircuitState::Open);
        assert!(report.metadata.timestamp_ms > 0);
        assert!(report.message.contains("bad gateway"));
    }

    #[test]
    fn quarantined_report_has_no_status() {
        let tagged: TaggedError<RemoteError> = TaggedError::new(
            OperationId::new("GET", "/users"),
            ResilienceError::CircuitOpen { failure_count: 5, open_for: Duration::from_secs(2) },
            CircuitState::Open,
        );
        assert!(tagged.is_quarantined());
        assert_eq!(tagged.retry_count(), 0);
        assert_eq!(tagged.report().status_code, None);
        assert!(tagged.to_string().starts_with("GET /users failed after 0 attempts"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn report_serializes_with_snake_case_state() {
        let tagged: TaggedError<RemoteError> = TaggedError::new(
            OperationId::new("GET", "/users"),
            ResilienceError::CircuitOpen { failure_count: 5, open_for: Duration::from_secs(2) },
            CircuitState::HalfOpen,
        );
        let json = serde_json::to_value(tagged.report()).unwrap();
        assert_eq!(json["metadata"]["circuit_breaker_state"], "half_open");
        assert_eq!(json["metadata"]["retry_count"], 0);
        assert!(json["status_code"].is_null());
    }
}
