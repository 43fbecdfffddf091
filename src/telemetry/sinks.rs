use super::events::PolicyEvent;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::Level;

/// A telemetry sink that consumes policy events.
///
/// Policies call `emit` inline, outside of any internal lock, and never wait on it.
/// Implementations must return promptly; wrap slow sinks in [`NonBlockingSink`].
pub trait TelemetrySink: Send + Sync + std::fmt::Debug {
    fn emit(&self, event: PolicyEvent);
}

impl<S: TelemetrySink + ?Sized> TelemetrySink for Arc<S> {
    fn emit(&self, event: PolicyEvent) {
        (**self).emit(event)
    }
}

/// A no-op telemetry sink that discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn emit(&self, _event: PolicyEvent) {}
}

/// A telemetry sink that logs events using the `tracing` crate, at each event's own level.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn emit(&self, event: PolicyEvent) {
        let level = event.level();
        let message = event.message();
        let source = event.source();
        if level == Level::ERROR {
            tracing::error!(target: "backstop::telemetry", source, event = %event, "{message}");
        } else if level == Level::WARN {
            tracing::warn!(target: "backstop::telemetry", source, event = %event, "{message}");
        } else if level == Level::INFO {
            tracing::info!(target: "backstop::telemetry", source, event = %event, "{message}");
        } else {
            tracing::debug!(target: "backstop::telemetry", source, event = %event, "{message}");
        }
    }
}

/// A telemetry sink that stores events in memory, evicting the oldest beyond its capacity.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<PolicyEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<PolicyEvent> {
        self.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<PolicyEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySink for MemorySink {
    fn emit(&self, event: PolicyEvent) {
        let mut guard = self.lock();
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(event);
    }
}

/// A streaming telemetry sink that broadcasts events to multiple subscribers.
///
/// Events sent while nobody is subscribed are counted as dropped.
#[derive(Clone, Debug)]
pub struct StreamingSink {
    sender: tokio::sync::broadcast::Sender<PolicyEvent>,
    dropped: Arc<AtomicU64>,
}

impl StreamingSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity.max(1));
        Self { sender, dropped: Arc::new(AtomicU64::new(0)) }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PolicyEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl TelemetrySink for StreamingSink {
    fn emit(&self, event: PolicyEvent) {
        if self.sender.send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Offloads emission to a bounded channel drained by a worker task.
///
/// Must be constructed inside a tokio runtime. When the channel is full the event is dropped
/// and counted rather than applying backpressure to the caller.
#[derive(Clone, Debug)]
pub struct NonBlockingSink {
    tx: tokio::sync::mpsc::Sender<PolicyEvent>,
    dropped: Arc<AtomicU64>,
}

impl NonBlockingSink {
    pub fn with_capacity<S>(sink: S, capacity: usize) -> Self
    where
        S: TelemetrySink + 'static,
    {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<PolicyEvent>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                sink.emit(event);
            }
        });
        Self { tx, dropped: Arc::new(AtomicU64::new(0)) }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl TelemetrySink for NonBlockingSink {
    fn emit(&self, event: PolicyEvent) {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Sends every event to both sinks.
#[derive(Clone, Debug)]
pub struct MulticastSink<A, B> {
    sink_a: A,
    sink_b: B,
}

impl<A, B> MulticastSink<A, B> {
    pub fn new(sink_a: A, sink_b: B) -> Self {
        Self { sink_a, sink_b }
    }
}

impl<A, B> TelemetrySink for MulticastSink<A, B>
where
    A: TelemetrySink,
    B: TelemetrySink,
{
    fn emit(&self, event: PolicyEvent) {
        self.sink_a.emit(event.clone());
        self.sink_b.emit(event);
    }
}
