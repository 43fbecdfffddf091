//! Telemetry and observability for backstop policies.
//!
//! Breakers emit an event on every trip, half-open probe, close and manual reset; the retry
//! executor emits one before every retry and one when its budget runs out. Events flow into a
//! [`TelemetrySink`], which can log, buffer, broadcast or forward them. Sinks observe only;
//! nothing they do feeds back into control flow.
//!
//! # Event Types
//!
//! - **Retry**: `Attempt`, `Exhausted`
//! - **Circuit Breaker**: `Opened`, `HalfOpen`, `Closed`, `Reset`

pub mod events;
pub mod sinks;

pub use events::{CircuitBreakerEvent, PolicyEvent, RetryEvent};
#[cfg(feature = "telemetry-json")]
pub use events::event_to_json;
pub use sinks::{
    LogSink, MemorySink, MulticastSink, NonBlockingSink, NullSink, StreamingSink, TelemetrySink,
};
