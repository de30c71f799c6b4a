use std::sync::Arc;
use std::time::Duration;

use palisade::circuit::{presets, CircuitBreaker, CircuitState};
use palisade::clock::ManualClock;
use palisade::error::{CircuitOpenError, RawError};
use palisade::events::{BufferingSink, EventKind};

fn orders_api_breaker(
    clock: Arc<ManualClock>,
    events: Arc<BufferingSink>,
) -> CircuitBreaker {
    // External-API preset: failure_threshold 5, recovery_timeout 30s
    let mut config = presets::external_api();
    config.call_timeout_secs = 0;
    CircuitBreaker::with_parts("orders-api", config, clock, events)
}

async fn timeout_call(breaker: &CircuitBreaker) {
    let _ = breaker
        .execute(|| async { Err::<(), RawError>("request timeout".into()) })
        .await;
}

#[tokio::test]
async fn five_timeouts_open_the_circuit_and_sixth_fails_fast() {
    let clock = Arc::new(ManualClock::new());
    let events = Arc::new(BufferingSink::new());
    let breaker = orders_api_breaker(clock.clone(), events.clone());

    for _ in 0..5 {
        timeout_call(&breaker).await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(events.count_of(EventKind::CircuitOpened), 1);

    // Sixth call within the 30s window fails fast, operation untouched
    let mut invoked = false;
    let result = breaker
        .execute(|| {
            invoked = true;
            async { Ok::<_, RawError>(()) }
        })
        .await;
    let error = result.unwrap_err();
    assert!(error.into_raw().downcast_ref::<CircuitOpenError>().is_some());
    assert!(!invoked);
    assert_eq!(events.count_of(EventKind::CircuitRejected), 1);
}

#[tokio::test]
async fn success_after_recovery_window_closes_and_zeroes_counters() {
    let clock = Arc::new(ManualClock::new());
    let events = Arc::new(BufferingSink::new());
    let breaker = orders_api_breaker(clock.clone(), events.clone());

    for _ in 0..5 {
        timeout_call(&breaker).await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    clock.advance(Duration::from_secs(31));
    breaker
        .execute(|| async { Ok::<_, RawError>(()) })
        .await
        .unwrap();

    assert_eq!(breaker.state(), CircuitState::Closed);
    let stats = breaker.stats();
    assert_eq!(stats.failure_count, 0);
    assert_eq!(stats.success_count, 0);
    assert_eq!(stats.request_count, 0);
    assert_eq!(events.count_of(EventKind::CircuitHalfOpened), 1);
    assert_eq!(events.count_of(EventKind::CircuitClosed), 1);
}

#[tokio::test]
async fn half_open_admits_exactly_one_probe() {
    let clock = Arc::new(ManualClock::new());
    let events = Arc::new(BufferingSink::new());
    let breaker = Arc::new(orders_api_breaker(clock.clone(), events));

    for _ in 0..5 {
        timeout_call(&breaker).await;
    }
    clock.advance(Duration::from_secs(31));

    // Hold the probe slot open with a long-running trial call
    let probe_breaker = breaker.clone();
    let (started_tx, started_rx) = tokio::sync::oneshot::channel();
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let probe = tokio::spawn(async move {
        probe_breaker
            .execute(|| async {
                let _ = started_tx.send(());
                let _ = release_rx.await;
                Ok::<_, RawError>(())
            })
            .await
    });
    started_rx.await.unwrap();
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    // A second call while the probe is in flight is rejected
    let result = breaker.execute(|| async { Ok::<_, RawError>(()) }).await;
    assert!(result.is_err());

    release_tx.send(()).unwrap();
    probe.await.unwrap().unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
}
