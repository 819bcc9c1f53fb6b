//! Retry policy wrapping a circuit breaker, as the dispatch pipeline composes them.
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use dispatch_common::ErrorKind;
use dispatch_resilience::{
    BackoffStrategy, Breaker, BreakerExt, CircuitBreaker, CircuitBreakerConfig, CircuitState,
    DefaultRetryPolicy, RetryPolicy, backoff::BackoffOptions, create_calculator,
};
use tokio_util::sync::CancellationToken;

fn retry(max_attempts: u32) -> DefaultRetryPolicy {
    let backoff = create_calculator(
        BackoffStrategy::Fixed,
        Some(&BackoffOptions {
            base_delay_ms: 10,
            ..BackoffOptions::default()
        }),
    )
    .unwrap();
    DefaultRetryPolicy::new(max_attempts, backoff).unwrap()
}

fn breaker(failure_threshold: u32) -> CircuitBreaker {
    CircuitBreaker::new(
        "orders",
        CircuitBreakerConfig {
            failure_threshold,
            open_duration_ms: 60_000,
            ..CircuitBreakerConfig::default()
        },
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_while_retrying() {
    let breaker = breaker(2);
    let calls = AtomicU32::new(0);
    let token = CancellationToken::new();

    let (breaker, calls) = (&breaker, &calls);

    let err = retry(5)
        .with_non_retriable([ErrorKind::CIRCUIT_OPEN])
        .execute(&token, move |token| async move {
            breaker
                .execute(&token, move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
                })
                .await
        })
        .await
        .unwrap_err()
        .flatten();

    assert!(err.is_circuit_open());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_recover_without_opening() {
    let breaker = Arc::new(breaker(3));
    let calls = Arc::new(AtomicU32::new(0));
    let token = CancellationToken::new();

    let value = retry(3)
        .execute(&token, |token| {
            let breaker = Arc::clone(&breaker);
            let calls = Arc::clone(&calls);
            async move {
                breaker
                    .execute(&token, |_| async move {
                        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(io::Error::new(io::ErrorKind::TimedOut, "slow broker"))
                        } else {
                            Ok("published")
                        }
                    })
                    .await
            }
        })
        .await
        .map_err(dispatch_resilience::ResilienceError::flatten)
        .unwrap();

    assert_eq!(value, "published");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(breaker.stats().consecutive_failures, 0);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_is_not_counted_or_retried() {
    let breaker = breaker(1);
    let calls = AtomicU32::new(0);
    let token = CancellationToken::new();
    let canceller = token.clone();
    let (breaker, calls, canceller) = (&breaker, &calls, &canceller);

    let err = retry(5)
        .execute(&token, move |token| async move {
            breaker
                .execute(&token, move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    canceller.cancel();
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    Err::<(), _>(io::Error::other("interrupted"))
                })
                .await
        })
        .await
        .unwrap_err()
        .flatten();

    assert!(err.is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(breaker.state(), CircuitState::Closed);
}
