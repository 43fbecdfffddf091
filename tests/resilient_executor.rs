mod common;

use backstop::{
    CancellationToken, CircuitBreakerRegistry, CircuitState, DefaultClassifier, LogSink,
    MemorySink, OperationId, RemoteFailure, ResilientExecutor, RetryExecutor, RetryPolicy,
    TrackingSleeper,
};
use common::ms;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test]
async fn executors_share_a_breaker_per_resource() {
    let registry = CircuitBreakerRegistry::new(
        backstop::CircuitBreakerConfig::new(2, Duration::from_secs(30), 1).unwrap(),
    );
    let retry = RetryExecutor::new(RetryPolicy::builder().max_attempts(0).build().unwrap());
    let reads = ResilientExecutor::new(registry.get_or_create("inventory"), retry.clone());
    let writes = ResilientExecutor::new(registry.get_or_create("inventory"), retry);

    let get = OperationId::new("GET", "/items");
    let put = OperationId::new("PUT", "/items/1");
    let _ = reads.execute(&get, || async { Err::<(), _>(TestError::Unavailable) }).await;
    let _ = writes.execute(&put, || async { Err::<(), _>(TestError::Unavailable) }).await;

    let err = reads.execute(&get, || async { Ok::<_, TestError>(()) }).await.unwrap_err();
    assert!(err.is_quarantined());
    assert_eq!(registry.snapshot()[0].1.state, CircuitState::Open);

    registry.reset("inventory").unwrap();
    reads.execute(&get, || async { Ok::<_, TestError>(()) }).await.unwrap();
}

#[tokio::test]
async fn rejected_input_is_not_retried_but_counts_once() {
    let executor = ResilientExecutor::new(
        backstop::CircuitBreaker::new("orders", Default::default()),
        RetryExecutor::default().with_sleeper(TrackingSleeper::new()),
    );
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let err = executor
        .execute(&OperationId::new("POST", "/orders"), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError::Rejected)
            }
        })
        .await
        .unwrap_err();

    assert!(err.error().is_non_retryable());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(executor.breaker().failure_count(), 1);
    assert_eq!(err.report().status_code, Some(409));
    assert!(err.to_string().starts_with("POST /orders failed after 1 attempts (circuit closed)"));
}

#[tokio::test(start_paused = true)]
async fn cancellation_mid_backoff_leaves_breaker_untouched() {
    let executor = ResilientExecutor::new(
        backstop::CircuitBreaker::new(
            "reports",
            backstop::CircuitBreakerConfig::new(1, Duration::from_secs(30), 1).unwrap(),
        ),
        RetryExecutor::new(
            RetryPolicy::builder().initial_delay(Duration::from_secs(5)).build().unwrap(),
        ),
    );
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(ms(100)).await;
        trigger.cancel();
    });

    let err = executor
        .execute_cancellable(
            &OperationId::new("GET", "/reports"),
            || async { Err::<(), _>(TestError::Unavailable) },
            DefaultClassifier,
            &token,
        )
        .await
        .unwrap_err();

    assert!(err.error().is_cancelled());
    assert_eq!(err.retry_count(), 1);
    assert_eq!(err.circuit_state(), CircuitState::Closed);
    assert_eq!(executor.breaker().failure_count(), 0);
}

#[tokio::test]
async fn log_sink_reports_transitions_through_tracing() {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let writer = BufferWriter(buffer.clone());
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .without_time()
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let events = MemorySink::new();
    let executor = ResilientExecutor::new(
        backstop::CircuitBreaker::new(
            "profile",
            backstop::CircuitBreakerConfig::new(1, Duration::from_secs(30), 1).unwrap(),
        ),
        RetryExecutor::new(RetryPolicy::builder().max_attempts(1).build().unwrap())
            .with_sleeper(TrackingSleeper::new()),
    )
    .with_sink(backstop::MulticastSink::new(LogSink, events.clone()));

    let _ = executor
        .execute(&OperationId::new("GET", "/profile"), || async {
            Err::<(), _>(TestError::Unavailable)
        })
        .await;

    assert_eq!(events.len(), 3);
    let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
    assert!(logs.contains("retrying operation"));
    assert!(logs.contains("retries exhausted"));
    assert!(logs.contains("circuit breaker opened"));
    assert!(logs.contains("Retry[GET /profile]::Attempt(#1"));
}

#[derive(Clone)]
struct BufferWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TestError {
    Unavailable,
    Rejected,
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Unavailable => write!(f, "service unavailable"),
            TestError::Rejected => write!(f, "conflict"),
        }
    }
}

impl std::error::Error for TestError {}

impl RemoteFailure for TestError {
    fn response_status(&self) -> Option<u16> {
        match self {
            TestError::Unavailable => Some(503),
            TestError::Rejected => Some(409),
        }
    }
}
