//! Concurrency tests for the per-transport breaker registry.
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use dispatch_resilience::{
    Breaker, BreakerExt, BreakerRegistry, CircuitBreakerConfig, CircuitState, ResilienceError,
    StateChange, TransportCircuitBreakerRegistry,
};
use tokio_util::sync::CancellationToken;

fn registry(failure_threshold: u32) -> Arc<TransportCircuitBreakerRegistry> {
    Arc::new(
        TransportCircuitBreakerRegistry::with_defaults(CircuitBreakerConfig {
            failure_threshold,
            open_duration_ms: 3_600_000,
            ..CircuitBreakerConfig::default()
        })
        .expect("valid config"),
    )
}

#[test]
fn test_failures_do_not_leak_between_transports() {
    let registry = registry(3);

    let a = registry.get_or_create("A", None).unwrap();
    let same_a = registry.get_or_create("a", None).unwrap();
    assert!(Arc::ptr_eq(&a, &same_a));

    for _ in 0..3 {
        a.record_failure(None);
    }

    let b = registry.get_or_create("B", None).unwrap();
    assert_eq!(a.state(), CircuitState::Open);
    assert_eq!(b.state(), CircuitState::Closed);
    assert_eq!(b.stats().consecutive_failures, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_first_access_creates_one_breaker() {
    let registry = registry(3);

    let handles: Vec<_> = (0..64)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.get_or_create("orders", None).unwrap() })
        })
        .collect();

    let mut breakers = Vec::with_capacity(handles.len());
    for handle in handles {
        breakers.push(handle.await.expect("task panicked"));
    }

    assert_eq!(registry.len(), 1);
    assert!(breakers.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_isolation_under_concurrent_load() {
    let registry = registry(1_000);
    let failing: Vec<String> = (0..16).map(|i| format!("failing-{i}")).collect();
    let healthy: Vec<String> = (0..16).map(|i| format!("healthy-{i}")).collect();

    let mut handles = Vec::new();
    for name in failing.iter().chain(healthy.iter()).cloned() {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            let breaker = registry.get_or_create(&name, None).unwrap();
            for _ in 0..500 {
                if name.starts_with("failing") {
                    breaker.record_failure(None);
                } else {
                    breaker.record_success();
                }
                tokio::task::yield_now().await;
            }
        }));
    }
    for handle in handles {
        handle.await.expect("task panicked");
    }

    for name in &failing {
        let stats = registry.try_get(name).unwrap().stats();
        assert_eq!(stats.state, CircuitState::Closed, "{name}");
        assert_eq!(stats.consecutive_failures, 500, "{name}");
    }
    for name in &healthy {
        let stats = registry.try_get(name).unwrap().stats();
        assert_eq!(stats.state, CircuitState::Closed, "{name}");
        assert_eq!(stats.consecutive_failures, 0, "{name}");
    }
}

#[tokio::test]
async fn test_open_circuit_reports_retry_after() {
    let registry = registry(1);
    let breaker = registry.get_or_create("payments", None).unwrap();
    breaker.record_failure(None);
    assert_eq!(breaker.state(), CircuitState::Open);

    let token = CancellationToken::new();
    let err = breaker
        .execute(&token, |_| async { Ok::<_, std::io::Error>(()) })
        .await
        .unwrap_err();

    let ResilienceError::CircuitOpen(open) = err else {
        panic!("expected circuit open, got {err:?}");
    };
    assert_eq!(open.circuit, "payments");
    assert!(open.retry_after > Duration::ZERO);
    assert!(open.retry_after <= Duration::from_secs(3_600));
}

#[test]
fn test_registry_listener_sees_every_transport() {
    let registry = registry(1);
    let opened = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&opened);
    registry.subscribe_all(Arc::new(move |change: &StateChange| {
        if change.current == CircuitState::Open {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }));

    for name in ["a", "b", "c"] {
        registry.get_or_create(name, None).unwrap().record_failure(None);
    }

    assert_eq!(opened.load(Ordering::SeqCst), 3);
}
