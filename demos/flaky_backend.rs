//! A flaky backend behind retry + breaker, with transitions logged through `tracing`.
use backstop::{
    CircuitBreaker, CircuitBreakerConfig, LogSink, OperationId, RemoteError, ResilientExecutor,
    RetryExecutor, RetryPolicy, TaggedError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), TaggedError<RemoteError>> {
    tracing_subscriber::fmt().with_target(false).init();

    let executor = ResilientExecutor::new(
        CircuitBreaker::new(
            "inventory",
            CircuitBreakerConfig::builder()
                .failure_threshold(2)
                .reset_timeout(Duration::from_millis(500))
                .half_open_trial_count(1)
                .build()
                .expect("valid breaker config"),
        ),
        RetryExecutor::new(
            RetryPolicy::builder()
                .max_attempts(2)
                .initial_delay(Duration::from_millis(50))
                .max_delay(Duration::from_millis(200))
                .build()
                .expect("valid retry policy"),
        ),
    )
    .with_sink(LogSink);

    let calls = Arc::new(AtomicUsize::new(0));
    let op = OperationId::new("GET", "/inventory/sku-42");

    // Outage: every call fails until the breaker trips.
    for _ in 0..3 {
        let result = executor
            .execute(&op, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>(RemoteError::status(503, "maintenance")) }
            })
            .await;
        if let Err(err) = result {
            println!("{err}");
        }
    }

    // Recovery: wait out the cooldown and let a probe through.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let stock = executor
        .execute(&op, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, RemoteError>(17) }
        })
        .await?;

    println!(
        "stock={stock} state={} backend_calls={}",
        executor.breaker().state(),
        calls.load(Ordering::SeqCst)
    );
    Ok(())
}
