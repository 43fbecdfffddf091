mod common;

use backstop::{CircuitState, RemoteError};
use common::{harness, ms, op, ScriptedBackend};

#[tokio::test]
async fn trips_after_threshold_and_probes_after_cooldown() {
    let h = harness(3, 1000, 1, 0);
    let backend = ScriptedBackend::failing(RemoteError::status(503, "unavailable"));

    for _ in 0..3 {
        let err = h.executor.execute(&op(), || backend.call()).await.unwrap_err();
        assert!(err.error().is_retry_exhausted());
    }
    assert_eq!(h.executor.breaker().state(), CircuitState::Open);
    assert_eq!(backend.calls(), 3);

    h.clock.set_millis(500);
    let err = h.executor.execute(&op(), || backend.call()).await.unwrap_err();
    assert!(err.is_quarantined());
    assert_eq!(err.circuit_state(), CircuitState::Open);
    assert_eq!(backend.calls(), 3, "fail-fast must not reach the resource");
    assert_eq!(h.executor.breaker().failure_count(), 3);

    h.clock.set_millis(1100);
    backend.set_script([Ok(1)]);
    let value = h.executor.execute(&op(), || backend.call()).await.unwrap();
    assert_eq!(value, 1);
    assert_eq!(backend.calls(), 4);
    assert_eq!(h.executor.breaker().state(), CircuitState::Closed);
}

#[tokio::test]
async fn probe_reaches_resource_in_half_open() {
    let h = harness(3, 1000, 2, 0);
    let backend = ScriptedBackend::failing(RemoteError::connection("refused"));
    for _ in 0..3 {
        let _ = h.executor.execute(&op(), || backend.call()).await;
    }

    h.clock.set_millis(1100);
    backend.set_script([Ok(7)]);
    h.executor.execute(&op(), || backend.call()).await.unwrap();
    let snap = h.executor.breaker().snapshot();
    assert_eq!(snap.state, CircuitState::HalfOpen);
    assert_eq!(snap.half_open_successes, 1);

    h.executor.execute(&op(), || backend.call()).await.unwrap();
    let snap = h.executor.breaker().snapshot();
    assert_eq!(snap.state, CircuitState::Closed);
    assert_eq!(snap.consecutive_failures, 0);
}

#[tokio::test]
async fn half_open_failure_reopens_and_restarts_cooldown() {
    let h = harness(1, 1000, 3, 0);
    let backend = ScriptedBackend::failing(RemoteError::status(500, "boom"));
    let _ = h.executor.execute(&op(), || backend.call()).await;

    h.clock.set_millis(1000);
    let err = h.executor.execute(&op(), || backend.call()).await.unwrap_err();
    assert!(!err.is_quarantined(), "probe was let through");
    assert_eq!(err.circuit_state(), CircuitState::Open);
    assert_eq!(h.executor.breaker().snapshot().last_failure_millis, Some(1000));

    h.clock.set_millis(1999);
    let err = h.executor.execute(&op(), || backend.call()).await.unwrap_err();
    assert!(err.is_quarantined());
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn successes_never_raise_the_failure_count() {
    let h = harness(10, 1000, 1, 0);
    let backend = ScriptedBackend::new([
        Err(RemoteError::connection("a")),
        Err(RemoteError::connection("b")),
        Ok(1),
        Ok(2),
        Ok(3),
    ]);
    let mut counts = Vec::new();
    for _ in 0..5 {
        let _ = h.executor.execute(&op(), || backend.call()).await;
        counts.push(h.executor.breaker().failure_count());
    }
    assert_eq!(counts, vec![1, 2, 1, 0, 0]);
}

#[tokio::test]
async fn retry_delays_follow_capped_schedule() {
    let h = harness(5, 1000, 1, 5);
    let backend = ScriptedBackend::failing(RemoteError::status(502, "bad gateway"));
    let err = h.executor.execute(&op(), || backend.call()).await.unwrap_err();

    assert_eq!(err.retry_count(), 6);
    assert_eq!(backend.calls(), 6);
    assert_eq!(h.sleeper.calls(), vec![ms(100), ms(200), ms(400), ms(800), ms(800)]);
    assert_eq!(h.executor.breaker().failure_count(), 1);
}

#[tokio::test]
async fn fatal_error_propagates_with_zero_retries() {
    let h = harness(5, 1000, 1, 3);
    let backend = ScriptedBackend::failing(RemoteError::status(422, "unprocessable"));
    let err = h.executor.execute(&op(), || backend.call()).await.unwrap_err();

    assert!(err.error().is_non_retryable());
    assert_eq!(err.retry_count(), 1);
    assert!(h.sleeper.calls().is_empty());
    assert_eq!(err.report().status_code, Some(422));
}

#[tokio::test]
async fn identical_outcomes_replay_identically() {
    let script = || {
        vec![
            Err(RemoteError::connection("x")),
            Ok(1),
            Err(RemoteError::status(503, "y")),
            Err(RemoteError::status(503, "y")),
            Err(RemoteError::status(400, "z")),
            Ok(2),
            Err(RemoteError::connection("x")),
        ]
    };

    let mut finals = Vec::new();
    for _ in 0..2 {
        let h = harness(3, 1000, 2, 0);
        let backend = ScriptedBackend::new(script());
        for step in 0..7u64 {
            h.clock.set_millis(step * 400);
            let _ = h.executor.execute(&op(), || backend.call()).await;
        }
        finals.push((h.executor.breaker().snapshot(), backend.calls()));
    }
    assert_eq!(finals[0], finals[1]);
}
