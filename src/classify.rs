//! Failure classification: which errors are worth retrying.
//!
//! The retry executor never inspects errors itself; it asks an [`ErrorClassifier`]. Any
//! `Fn(&E) -> bool` closure is a classifier, and [`DefaultClassifier`] implements the standard
//! policy for errors that expose a response status through [`RemoteFailure`]:
//!
//! - no response at all (connection refused, reset, DNS, ...) → transient, retry;
//! - status `500..=599` → transient, retry;
//! - anything else (4xx, validation) → fatal, never retried.

/// Whether a failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Connectivity failure or server-side error; retrying may succeed.
    Transient,
    /// Client-side or validation failure; retrying cannot help.
    Fatal,
}

impl FailureKind {
    /// Classify by response status, where `None` means no response was received.
    pub fn from_status(status: Option<u16>) -> Self {
        match status {
            None => FailureKind::Transient,
            Some(code) if (500..=599).contains(&code) => FailureKind::Transient,
            Some(_) => FailureKind::Fatal,
        }
    }

    pub fn is_transient(self) -> bool {
        self == FailureKind::Transient
    }
}

/// Errors produced by a call to a remote resource.
pub trait RemoteFailure {
    /// Status code of the response, or `None` when no response was received.
    fn response_status(&self) -> Option<u16>;

    /// Transient or fatal. Defaults to [`FailureKind::from_status`].
    fn failure_kind(&self) -> FailureKind {
        FailureKind::from_status(self.response_status())
    }
}

/// I/O errors never carry a response, so they are always transient.
impl RemoteFailure for std::io::Error {
    fn response_status(&self) -> Option<u16> {
        None
    }
}

/// Decides whether a failed attempt may be retried.
pub trait ErrorClassifier<E>: Send + Sync {
    fn is_retryable(&self, error: &E) -> bool;
}

impl<E, F> ErrorClassifier<E> for F
where
    F: Fn(&E) -> bool + Send + Sync,
{
    fn is_retryable(&self, error: &E) -> bool {
        self(error)
    }
}

/// Retries transient failures only; see the module docs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl<E: RemoteFailure> ErrorClassifier<E> for DefaultClassifier {
    fn is_retryable(&self, error: &E) -> bool {
        error.failure_kind().is_transient()
    }
}
