#![allow(dead_code)]

use backstop::{
    CircuitBreaker, CircuitBreakerConfig, ManualClock, OperationId, RemoteError,
    ResilientExecutor, RetryExecutor, RetryPolicy, TrackingSleeper,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Stub resource that plays back a fixed list of outcomes, then repeats the last one.
#[derive(Debug)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<u32, RemoteError>>>,
    last: Mutex<Result<u32, RemoteError>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(outcomes: impl IntoIterator<Item = Result<u32, RemoteError>>) -> Self {
        Self {
            script: Mutex::new(outcomes.into_iter().collect()),
            last: Mutex::new(Ok(0)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: RemoteError) -> Self {
        Self::new([Err(err)])
    }

    pub fn healthy() -> Self {
        Self::new([Ok(0)])
    }

    /// Replace whatever is left of the script.
    pub fn set_script(&self, outcomes: impl IntoIterator<Item = Result<u32, RemoteError>>) {
        *self.script.lock().unwrap() = outcomes.into_iter().collect();
    }

    pub async fn call(&self) -> Result<u32, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(outcome) = next {
            *last = outcome;
        }
        last.clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn op() -> OperationId {
    OperationId::new("GET", "/accounts")
}

pub fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

pub struct Harness {
    pub executor: ResilientExecutor,
    pub clock: ManualClock,
    pub sleeper: TrackingSleeper,
}

/// Executor over a manual clock and a recording sleeper.
pub fn harness(threshold: usize, reset_ms: u64, trials: usize, retries: usize) -> Harness {
    let clock = ManualClock::new();
    let sleeper = TrackingSleeper::new();
    let config = CircuitBreakerConfig::new(threshold, ms(reset_ms), trials).unwrap();
    let policy = RetryPolicy::builder()
        .max_attempts(retries)
        .initial_delay(ms(100))
        .max_delay(ms(800))
        .build()
        .unwrap();
    let executor = ResilientExecutor::new(
        CircuitBreaker::new("accounts", config).with_clock(clock.clone()),
        RetryExecutor::new(policy).with_sleeper(sleeper.clone()),
    );
    Harness { executor, clock, sleeper }
}
