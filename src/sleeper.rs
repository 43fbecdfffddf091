//! How retry backoff waits.
//!
//! `RetryExecutor` never calls `tokio::time::sleep` directly; it asks a [`Sleeper`], so tests
//! can record the requested delays instead of waiting them out.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

type SleepFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Waits out one backoff delay.
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    /// Suspend the current task for `duration` without blocking the thread.
    fn sleep(&self, duration: Duration) -> SleepFuture;
}

/// Default sleeper: the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> SleepFuture {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Skips every delay. Useful in doctests and benches.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantSleeper;

impl Sleeper for InstantSleeper {
    fn sleep(&self, _duration: Duration) -> SleepFuture {
        Box::pin(std::future::ready(()))
    }
}

/// Records each requested delay and returns at once.
///
/// Clones share the record, so a test can keep one handle and give another to the executor.
#[derive(Debug, Clone, Default)]
pub struct TrackingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl TrackingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order.
    pub fn calls(&self) -> Vec<Duration> {
        self.delays.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Sum of all requested delays.
    pub fn total(&self) -> Duration {
        self.calls().into_iter().fold(Duration::ZERO, Duration::saturating_add)
    }
}

impl Sleeper for TrackingSleeper {
    fn sleep(&self, duration: Duration) -> SleepFuture {
        self.delays.lock().unwrap_or_else(PoisonError::into_inner).push(duration);
        Box::pin(std::future::ready(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn tokio_sleeper_waits_on_the_runtime_timer() {
        let start = tokio::time::Instant::now();
        TokioSleeper.sleep(Duration::from_millis(50)).await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn instant_sleeper_leaves_the_clock_alone() {
        let start = tokio::time::Instant::now();
        InstantSleeper.sleep(Duration::from_secs(3600)).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn tracking_sleeper_clones_share_the_record() {
        let sleeper = TrackingSleeper::new();
        let handle = sleeper.clone();

        for millis in [100, 200, 400] {
            handle.sleep(Duration::from_millis(millis)).await;
        }

        assert_eq!(
            sleeper.calls(),
            [100, 200, 400].map(Duration::from_millis).to_vec()
        );
        assert_eq!(sleeper.total(), Duration::from_millis(700));
    }

    #[tokio::test]
    async fn tracking_total_saturates() {
        let sleeper = TrackingSleeper::new();
        sleeper.sleep(Duration::MAX).await;
        sleeper.sleep(Duration::MAX).await;
        assert_eq!(sleeper.total(), Duration::MAX);
    }
}
