use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use ahash::AHashMap;
use dispatch_common::{Classify, ErrorKind, Message};
use dispatch_dlq::{DeadLetterId, DeadLetterQueue, DeadLetterReason};
use dispatch_resilience::{AnyRetryPolicy, BreakerExt, BreakerRegistry, ResilienceError, RetryPolicy};
use tokio_util::sync::CancellationToken;

use crate::{
    error::DispatchError,
    transport::{Transport, TransportError},
};

/// Failure kinds that map directly onto a dead-letter reason.
const KIND_REASONS: [(ErrorKind, DeadLetterReason); 7] = [
    (ErrorKind::VALIDATION, DeadLetterReason::ValidationFailed),
    (ErrorKind::DESERIALIZATION, DeadLetterReason::DeserializationFailed),
    (ErrorKind::AUTHORIZATION, DeadLetterReason::AuthorizationFailed),
    (ErrorKind::HANDLER_NOT_FOUND, DeadLetterReason::HandlerNotFound),
    (ErrorKind::EXPIRED, DeadLetterReason::MessageExpired),
    (ErrorKind::POISON, DeadLetterReason::PoisonMessage),
    (ErrorKind::CIRCUIT_OPEN, DeadLetterReason::CircuitBreakerOpen),
];

/// Dead-letter reason for a failure of `kind`. `retriable` failures without a
/// more specific reason ran out of attempts.
#[must_use]
pub fn dead_letter_reason(kind: &ErrorKind, retriable: bool) -> DeadLetterReason {
    KIND_REASONS
        .iter()
        .find(|(candidate, _)| candidate == kind)
        .map_or(
            if retriable {
                DeadLetterReason::MaxRetriesExceeded
            } else {
                DeadLetterReason::UnhandledException
            },
            |(_, reason)| *reason,
        )
}

/// How a dispatched message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The transport accepted the message after `attempts` invocations.
    Delivered { attempts: u32 },
    /// The message could not be delivered and was archived.
    DeadLettered {
        id: DeadLetterId,
        reason: DeadLetterReason,
    },
}

/// Publishes messages through retry, a per-transport circuit breaker, and
/// finally the dead-letter queue.
///
/// Each attempt goes through the transport's breaker. An open circuit rejects
/// the attempt without calling the transport; the rejection is retried like
/// any other failure unless `circuit_open` is one of the retry policy's
/// non-retriable kinds. Reported and archived attempt counts include only
/// calls that reached the transport.
///
/// A message that still fails is dead-lettered with a reason derived from its
/// failure kind. Cancellation is returned to the caller and never dead-lettered.
#[derive(Debug, Clone)]
pub struct ResilientDispatcher {
    retry: AnyRetryPolicy,
    breakers: Arc<dyn BreakerRegistry>,
    dead_letters: DeadLetterQueue,
}

impl ResilientDispatcher {
    pub fn new(
        retry: AnyRetryPolicy,
        breakers: Arc<dyn BreakerRegistry>,
        dead_letters: DeadLetterQueue,
    ) -> Self {
        Self {
            retry,
            breakers,
            dead_letters,
        }
    }

    #[must_use]
    pub const fn retry_policy(&self) -> &AnyRetryPolicy {
        &self.retry
    }

    #[must_use]
    pub fn breakers(&self) -> &Arc<dyn BreakerRegistry> {
        &self.breakers
    }

    #[must_use]
    pub const fn dead_letters(&self) -> &DeadLetterQueue {
        &self.dead_letters
    }

    /// Publish `message` on `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Cancelled`] if `token` is cancelled, a registry
    /// error for a blank transport name, or a dead-letter error if the failed
    /// message could not be archived.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(transport = transport.name(), message_type = %message.message_type)
    )]
    pub async fn dispatch(
        &self,
        transport: &dyn Transport,
        message: &Message,
        token: &CancellationToken,
    ) -> Result<DispatchOutcome, DispatchError> {
        let breaker = self.breakers.get_or_create(transport.name(), None)?;
        let invocations = AtomicU32::new(0);
        let (breaker, counter) = (&breaker, &invocations);

        let result = self
            .retry
            .execute(token, move |token| async move {
                breaker
                    .execute(&token, move |token| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        transport.publish(message, token)
                    })
                    .await
            })
            .await
            .map_err(ResilienceError::flatten);

        let attempts = invocations.load(Ordering::Relaxed);
        let failure = match result {
            Ok(()) => return Ok(DispatchOutcome::Delivered { attempts }),
            Err(ResilienceError::Cancelled) => {
                tracing::debug!(attempts, "Dispatch cancelled");
                return Err(DispatchError::Cancelled);
            }
            Err(failure) => failure,
        };

        self.dead_letter(transport, message, attempts, &failure)
            .await
            .map(|(id, reason)| DispatchOutcome::DeadLettered { id, reason })
    }

    async fn dead_letter(
        &self,
        transport: &dyn Transport,
        message: &Message,
        attempts: u32,
        failure: &ResilienceError<TransportError>,
    ) -> Result<(DeadLetterId, DeadLetterReason), DispatchError> {
        let kind = failure.kind();
        let reason = dead_letter_reason(&kind, self.retry.is_retriable(failure));

        let archived = message
            .clone()
            .with_attempts(message.attempts.saturating_add(attempts));
        let metadata = AHashMap::from_iter([
            ("transport".to_string(), transport.name().to_string()),
            ("error_kind".to_string(), kind.to_string()),
        ]);

        let id = self
            .dead_letters
            .enqueue(&archived, reason, Some(failure), Some(metadata))
            .await?;

        Ok((id, reason))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex};

    use async_trait::async_trait;
    use dispatch_dlq::{DeadLetterFilter, MemoryDeadLetterStore};
    use dispatch_resilience::{
        CircuitBreakerConfig, CircuitState, NoRetryPolicy, RetryOptions,
        TransportCircuitBreakerRegistry,
    };
    use pretty_assertions::assert_eq;

    use super::*;

    /// Transport replaying a fixed list of results, then succeeding.
    struct Script {
        name: &'static str,
        results: Mutex<VecDeque<Result<(), TransportError>>>,
        calls: AtomicU32,
    }

    impl Script {
        fn new(
            name: &'static str,
            results: impl IntoIterator<Item = Result<(), TransportError>>,
        ) -> Self {
            Self {
                name,
                results: Mutex::new(results.into_iter().collect()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for Script {
        fn name(&self) -> &str {
            self.name
        }

        async fn publish(
            &self,
            _message: &Message,
            _token: CancellationToken,
        ) -> Result<(), TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    fn retry_options(max_retry_attempts: u32) -> RetryOptions {
        RetryOptions {
            max_retry_attempts,
            base_delay_ms: 10,
            max_delay_ms: 100,
            jitter_enabled: false,
            non_retriable_kinds: vec![ErrorKind::VALIDATION],
            ..RetryOptions::default()
        }
    }

    fn dispatcher(max_retry_attempts: u32, failure_threshold: u32) -> ResilientDispatcher {
        let registry = TransportCircuitBreakerRegistry::with_defaults(CircuitBreakerConfig {
            failure_threshold,
            open_duration_ms: 3_600_000,
            ..CircuitBreakerConfig::default()
        })
        .unwrap();

        ResilientDispatcher::new(
            AnyRetryPolicy::from_options(&retry_options(max_retry_attempts)).unwrap(),
            Arc::new(registry),
            DeadLetterQueue::new(Arc::new(MemoryDeadLetterStore::new())),
        )
    }

    #[test]
    fn test_reason_mapping() {
        assert_eq!(
            dead_letter_reason(&ErrorKind::VALIDATION, false),
            DeadLetterReason::ValidationFailed
        );
        assert_eq!(
            dead_letter_reason(&ErrorKind::CIRCUIT_OPEN, true),
            DeadLetterReason::CircuitBreakerOpen
        );
        assert_eq!(
            dead_letter_reason(&ErrorKind::TIMEOUT, true),
            DeadLetterReason::MaxRetriesExceeded
        );
        assert_eq!(
            dead_letter_reason(&ErrorKind::custom("quota"), false),
            DeadLetterReason::UnhandledException
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried_then_delivered() {
        let dispatcher = dispatcher(3, 5);
        let transport = Script::new(
            "orders",
            [
                Err(TransportError::transient("busy")),
                Err(TransportError::timeout("slow")),
            ],
        );

        let outcome = dispatcher
            .dispatch(&transport, &Message::new("order.created", b"{}".to_vec()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Delivered { attempts: 3 });
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_are_dead_lettered() {
        let dispatcher = dispatcher(2, 5);
        let transport = Script::new(
            "orders",
            [
                Err(TransportError::connection("refused")),
                Err(TransportError::connection("refused again")),
            ],
        );
        let message = Message::new("order.created", b"{}".to_vec()).with_attempts(1);

        let outcome = dispatcher
            .dispatch(&transport, &message, &CancellationToken::new())
            .await
            .unwrap();

        let DispatchOutcome::DeadLettered { id, reason } = outcome else {
            panic!("Expected dead-lettered outcome, got {outcome:?}");
        };
        assert_eq!(reason, DeadLetterReason::MaxRetriesExceeded);

        let entry = dispatcher.dead_letters().get(&id).await.unwrap().unwrap();
        assert_eq!(entry.attempts, 3);
        assert_eq!(entry.error_message(), Some("refused again"));
        assert_eq!(entry.metadata.get("transport").map(String::as_str), Some("orders"));
        assert_eq!(entry.metadata.get("error_kind").map(String::as_str), Some("connection"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let dispatcher = dispatcher(5, 5);
        let transport = Script::new("orders", [Err(TransportError::validation("missing id"))]);

        let outcome = dispatcher
            .dispatch(&transport, &Message::new("order.created", b"{}".to_vec()), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            DispatchOutcome::DeadLettered {
                reason: DeadLetterReason::ValidationFailed,
                ..
            }
        ));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_dead_letters_without_calling_transport() {
        let dispatcher = dispatcher(5, 1);
        let transport = Script::new("orders", [Err(TransportError::connection("down"))]);
        let message = Message::new("order.created", b"{}".to_vec());
        let token = CancellationToken::new();

        // The first failure opens the breaker, so every retry is rejected
        let first = dispatcher.dispatch(&transport, &message, &token).await.unwrap();
        let DispatchOutcome::DeadLettered { id, reason } = first else {
            panic!("Expected dead-lettered outcome, got {first:?}");
        };
        assert_eq!(reason, DeadLetterReason::CircuitBreakerOpen);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

        // Rejected attempts never reached the transport and are not counted
        let entry = dispatcher.dead_letters().get(&id).await.unwrap().unwrap();
        assert_eq!(entry.attempts, 1);

        let second = dispatcher.dispatch(&transport, &message, &token).await.unwrap();
        let DispatchOutcome::DeadLettered { id, reason } = second else {
            panic!("Expected dead-lettered outcome, got {second:?}");
        };
        assert_eq!(reason, DeadLetterReason::CircuitBreakerOpen);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        let entry = dispatcher.dead_letters().get(&id).await.unwrap().unwrap();
        assert_eq!(entry.attempts, 0);
        assert_eq!(
            dispatcher.breakers().states().get("orders"),
            Some(&CircuitState::Open)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_is_never_dead_lettered() {
        let dispatcher = dispatcher(5, 5);
        let transport = Script::new("orders", [Err(TransportError::cancelled())]);
        let token = CancellationToken::new();

        let err = dispatcher
            .dispatch(&transport, &Message::new("order.created", b"{}".to_vec()), &token)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(
            dispatcher
                .dead_letters()
                .count(&DeadLetterFilter::all())
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_policy_calls_once() {
        let registry = TransportCircuitBreakerRegistry::with_defaults(CircuitBreakerConfig::default()).unwrap();
        let dispatcher = ResilientDispatcher::new(
            AnyRetryPolicy::NoRetry(NoRetryPolicy),
            Arc::new(registry),
            DeadLetterQueue::new(Arc::new(MemoryDeadLetterStore::new())),
        );
        let transport = Script::new("orders", [Err(TransportError::transient("busy"))]);

        let outcome = dispatcher
            .dispatch(&transport, &Message::new("order.created", b"{}".to_vec()), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            DispatchOutcome::DeadLettered {
                reason: DeadLetterReason::UnhandledException,
                ..
            }
        ));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }
}
