//! Owner-held registry of circuit breakers, one per protected resource.
//!
//! Nothing here is global: whoever builds the registry decides its lifetime and passes it
//! (or the breakers it hands out) to the code that needs them. Breakers created through the
//! registry share its clock and telemetry sink.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig};
use crate::clock::{Clock, MonotonicClock};
use crate::telemetry::{NullSink, TelemetrySink};
use tracing::warn;

/// Errors from breaker registries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("circuit breaker '{key}' not found")]
    NotFound { key: String },
}

/// Map from resource key to its breaker. Clones share the same map.
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    breakers: Arc<RwLock<HashMap<String, CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn TelemetrySink>,
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("default_config", &self.default_config)
            .field("breakers", &self.keys())
            .finish()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    /// Registry whose breakers use `default_config` unless told otherwise.
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: Arc::default(),
            default_config,
            clock: Arc::new(MonotonicClock::default()),
            sink: Arc::new(NullSink),
        }
    }

    /// Clock handed to breakers created from now on.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Sink handed to breakers created from now on.
    pub fn with_sink<S: TelemetrySink + 'static>(mut self, sink: S) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Breaker for `key`, created with the default config on first use.
    pub fn get_or_create(&self, key: &str) -> CircuitBreaker {
        self.get_or_create_with(key, &self.default_config)
    }

    /// Breaker for `key`, created with `config` on first use. An existing breaker keeps the
    /// config it was created with.
    pub fn get_or_create_with(&self, key: &str, config: &CircuitBreakerConfig) -> CircuitBreaker {
        if let Some(existing) = self.get(key) {
            return existing;
        }
        self.write()
            .entry(key.to_owned())
            .or_insert_with(|| {
                CircuitBreaker::new(key, config.clone())
                    .with_shared_clock(self.clock.clone())
                    .with_shared_sink(self.sink.clone())
            })
            .clone()
    }

    /// Register a breaker under `key`, replacing and returning any previous one.
    ///
    /// The last registration wins; state is replaced, never merged.
    pub fn register(&self, key: impl Into<String>, breaker: CircuitBreaker) -> Option<CircuitBreaker> {
        let key = key.into();
        let previous = self.write().insert(key.clone(), breaker);
        if previous.is_some() {
            warn!(target: "backstop::registry", key = %key, "circuit breaker key replaced; last registration wins");
        }
        previous
    }

    pub fn get(&self, key: &str) -> Option<CircuitBreaker> {
        self.read().get(key).cloned()
    }

    /// Force the breaker for `key` back to closed.
    pub fn reset(&self, key: &str) -> Result<(), RegistryError> {
        let breaker = self.get(key).ok_or_else(|| RegistryError::NotFound { key: key.to_owned() })?;
        breaker.reset();
        Ok(())
    }

    /// Snapshot every breaker, sorted by key.
    pub fn snapshot(&self) -> Vec<(String, BreakerSnapshot)> {
        let breakers: Vec<(String, CircuitBreaker)> =
            self.read().iter().map(|(k, b)| (k.clone(), b.clone())).collect();
        let mut entries: Vec<(String, BreakerSnapshot)> =
            breakers.into_iter().map(|(k, b)| (k, b.snapshot())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CircuitBreaker>> {
        self.breakers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CircuitBreaker>> {
        self.breakers.write().unwrap_or_else(PoisonError::into_inner)
    }
}
