#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # backstop
//!
//! Client-side resilience for calls to remote, occasionally unreliable backends.
//!
//! ## Features
//!
//! - **Retry** with bounded, capped exponential backoff and a per-call retryability classifier
//! - **Circuit breakers** per protected resource, with single-probe half-open recovery
//! - **Composition** where the breaker sees one verdict per logical call, after retries
//! - **Tagged errors** telling a quarantined resource apart from one that kept failing
//! - **Telemetry** events for every trip, probe, close and retry, routed to pluggable sinks
//! - **Tower** layer for any `Service` with a cloneable request
//!
//! ## Quick Start
//!
//! ```rust
//! use backstop::{
//!     CircuitBreaker, CircuitBreakerConfig, LogSink, OperationId, RemoteError,
//!     ResilientExecutor, RetryExecutor, RetryPolicy,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let executor = ResilientExecutor::new(
//!         CircuitBreaker::new("billing-api", CircuitBreakerConfig::default()),
//!         RetryExecutor::new(RetryPolicy::default()),
//!     )
//!     .with_sink(LogSink);
//!
//!     let op = OperationId::new("GET", "/invoices/7");
//!     let result = executor
//!         .execute(&op, || async {
//!             // Your async call here
//!             Ok::<_, RemoteError>(())
//!         })
//!         .await;
//!     assert!(result.is_ok());
//! }
//! ```

pub mod backoff;
pub mod circuit_breaker;
pub mod classify;
pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod layer;
pub mod registry;
pub mod retry;
pub mod sleeper;
pub mod telemetry;

// Re-exports
pub use backoff::{Backoff, BackoffError, Schedule};
pub use circuit_breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder,
    CircuitBreakerError, CircuitOpen, CircuitState, Permit,
};
pub use classify::{DefaultClassifier, ErrorClassifier, FailureKind, RemoteFailure};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{BreakerSettings, ConfigError, ResilienceSettings, RetrySettings};
pub use error::{ErrorMetadata, ErrorReport, OperationId, RemoteError, ResilienceError, TaggedError};
pub use executor::ResilientExecutor;
pub use layer::{ResilientLayer, ResilientService};
pub use registry::{CircuitBreakerRegistry, RegistryError};
pub use retry::{BuildError, RetryExecutor, RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use telemetry::{
    CircuitBreakerEvent, LogSink, MemorySink, MulticastSink, NonBlockingSink, NullSink,
    PolicyEvent, RetryEvent, StreamingSink, TelemetrySink,
};
pub use tokio_util::sync::CancellationToken;
