//! Named circuit breaker guarding calls into a single transport.
//!
//! # States
//!
//! - **Closed**: normal operation, every call is allowed
//! - **Open**: tripped by consecutive failures, calls are rejected immediately
//! - **Half-Open**: the open period elapsed, calls are allowed as recovery probes
//!
//! ```text
//! ┌─────────┐  failure_threshold consecutive failures  ┌──────┐
//! │ Closed  │ ───────────────────────────────────────> │ Open │ <─┐
//! └─────────┘                                          └──────┘   │
//!     ^                                                   │       │
//!     │                                                   │ open_duration elapsed
//!     │ success_threshold probe successes                 v       │ any failure
//!     │                                            ┌───────────┐  │
//!     └────────────────────────────────────────────│ Half-Open │──┘
//!                                                  └───────────┘
//! ```
//!
//! There is no timer. The Open → Half-Open transition is evaluated whenever the
//! state is read, from the time the circuit opened and the configured duration.
//!
//! Transitions are reported synchronously to subscribed listeners while the
//! state lock is held, so listeners observe transitions in the order they
//! happened. Listeners must not call back into the breaker that notified them.

use std::{
    fmt,
    future::Future,
    sync::{
        Arc, LazyLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dispatch_common::{Classify, ErrorKind, tracing};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    config::CircuitBreakerConfig,
    error::{CircuitOpenError, ConfigError, ResilienceError},
};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all calls allowed
    Closed,
    /// Circuit tripped - reject all calls immediately
    Open,
    /// Testing recovery - calls allowed as probes
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        })
    }
}

/// Failure that triggered a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionCause {
    pub kind: ErrorKind,
    pub message: String,
}

impl TransitionCause {
    fn from_error(error: &dyn Classify) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Notification delivered to listeners on every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub circuit: String,
    pub previous: CircuitState,
    pub current: CircuitState,
    /// Present when a recorded failure caused the transition
    pub cause: Option<TransitionCause>,
}

pub type StateChangeListener = Arc<dyn Fn(&StateChange) + Send + Sync>;

/// Decides whether a failure counts towards opening the circuit.
pub type FailurePredicate = Arc<dyn Fn(&dyn Classify) -> bool + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Number of times the circuit has entered Open
    pub times_opened: u64,
    /// Number of calls rejected while Open
    pub rejected: u64,
}

/// Operations shared by the real breaker and the always-closed null breaker.
pub trait Breaker: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Current state, after applying any pending Open → Half-Open transition.
    fn state(&self) -> CircuitState;

    /// Admit a call, or reject it with the remaining open period.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitOpenError`] while the circuit is open.
    fn try_acquire(&self) -> Result<(), CircuitOpenError>;

    fn record_success(&self);

    /// Record a failure. `None` always counts; `Some` is filtered through the
    /// failure predicate, if one is configured.
    fn record_failure(&self, error: Option<&dyn Classify>);

    /// Force the circuit closed and clear every counter.
    fn reset(&self);

    fn subscribe(&self, listener: StateChangeListener) -> SubscriptionId;

    /// Returns `true` if the subscription existed.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    fn stats(&self) -> CircuitBreakerStats;
}

/// Guarded execution for any [`Breaker`].
pub trait BreakerExt: Breaker {
    /// Run `operation` through the breaker.
    ///
    /// Rejects with [`ResilienceError::CircuitOpen`] without invoking the
    /// operation while open. Otherwise records the outcome, except for
    /// cancellation which is reported as [`ResilienceError::Cancelled`] and
    /// never counts as a failure.
    fn execute<T, E, F, Fut>(
        &self,
        token: &CancellationToken,
        operation: F,
    ) -> impl Future<Output = Result<T, ResilienceError<E>>> + Send
    where
        T: Send,
        E: Classify,
        F: FnOnce(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        async move {
            self.try_acquire()?;

            match operation(token.clone()).await {
                Ok(value) => {
                    self.record_success();
                    Ok(value)
                }
                Err(e) if e.is_cancellation() || token.is_cancelled() => {
                    tracing::debug!(circuit = %self.name(), "Call cancelled, not recorded");
                    Err(ResilienceError::Cancelled)
                }
                Err(e) => {
                    self.record_failure(Some(&e));
                    Err(ResilienceError::Operation(e))
                }
            }
        }
    }
}

impl<B: Breaker + ?Sized> BreakerExt for B {}

#[derive(Debug)]
struct BreakerData {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    times_opened: u64,
    rejected: u64,
}

impl BreakerData {
    const fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            times_opened: 0,
            rejected: 0,
        }
    }

    fn open_remaining(&self, open_duration: Duration) -> Duration {
        self.opened_at.map_or(Duration::ZERO, |opened_at| {
            open_duration.saturating_sub(Instant::now().duration_since(opened_at))
        })
    }
}

/// Circuit breaker for a single named transport.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    should_handle: Option<FailurePredicate>,
    data: Mutex<BreakerData>,
    listeners: Mutex<Vec<(SubscriptionId, StateChangeListener)>>,
    next_subscription: AtomicU64,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("data", &*self.data.lock())
            .field("listeners", &self.listeners.lock().len())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Create a closed breaker.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration fails validation.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            name: name.into(),
            config,
            should_handle: None,
            data: Mutex::new(BreakerData::new()),
            listeners: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        })
    }

    /// Only failures accepted by `predicate` count towards the threshold.
    /// Rejected failures still propagate to the caller.
    #[must_use]
    pub fn with_failure_predicate(
        mut self,
        predicate: impl Fn(&dyn Classify) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_handle = Some(Arc::new(predicate));
        self
    }

    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Apply the lazy Open → Half-Open transition if the open period elapsed.
    fn refresh(&self, data: &mut BreakerData) {
        if data.state == CircuitState::Open
            && data
                .opened_at
                .is_some_and(|opened_at| opened_at.elapsed() >= self.config.open_duration())
        {
            self.transition(data, CircuitState::HalfOpen, None);
        }
    }

    fn transition(&self, data: &mut BreakerData, to: CircuitState, cause: Option<TransitionCause>) {
        let previous = data.state;
        data.state = to;

        match to {
            CircuitState::Open => {
                data.opened_at = Some(Instant::now());
                data.consecutive_successes = 0;
                data.times_opened += 1;
                tracing::warn!(
                    circuit = %self.name,
                    from = %previous,
                    failures = data.consecutive_failures,
                    open_duration_ms = self.config.open_duration_ms,
                    "Circuit breaker OPENED - rejecting calls"
                );
            }
            CircuitState::HalfOpen => {
                data.consecutive_successes = 0;
                tracing::info!(circuit = %self.name, "Circuit breaker HALF-OPEN - probing recovery");
            }
            CircuitState::Closed => {
                data.consecutive_failures = 0;
                data.consecutive_successes = 0;
                data.opened_at = None;
                tracing::info!(circuit = %self.name, from = %previous, "Circuit breaker CLOSED");
            }
        }

        let change = StateChange {
            circuit: self.name.clone(),
            previous,
            current: to,
            cause,
        };
        for (_, listener) in self.listeners.lock().iter() {
            listener(&change);
        }
    }
}

impl Breaker for CircuitBreaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> CircuitState {
        let mut data = self.data.lock();
        self.refresh(&mut data);
        data.state
    }

    fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        let mut data = self.data.lock();
        self.refresh(&mut data);

        if data.state == CircuitState::Open {
            data.rejected += 1;
            let retry_after = data.open_remaining(self.config.open_duration());
            tracing::debug!(
                circuit = %self.name,
                retry_after_ms = retry_after.as_millis(),
                "Call rejected by open circuit"
            );
            return Err(CircuitOpenError {
                circuit: self.name.clone(),
                retry_after,
            });
        }

        Ok(())
    }

    fn record_success(&self) {
        let mut data = self.data.lock();
        self.refresh(&mut data);

        match data.state {
            CircuitState::Closed => data.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                data.consecutive_failures = 0;
                data.consecutive_successes += 1;
                if data.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut data, CircuitState::Closed, None);
                }
            }
            CircuitState::Open => {
                // Calls are rejected while open, so this came from a manual record.
                data.consecutive_failures = 0;
                tracing::debug!(circuit = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    fn record_failure(&self, error: Option<&dyn Classify>) {
        if let (Some(error), Some(predicate)) = (error, &self.should_handle)
            && !predicate(error)
        {
            tracing::trace!(circuit = %self.name, kind = %error.kind(), "Failure ignored by predicate");
            return;
        }

        let mut data = self.data.lock();
        self.refresh(&mut data);

        match data.state {
            CircuitState::Closed => {
                data.consecutive_failures = data.consecutive_failures.saturating_add(1);
                if data.consecutive_failures >= self.config.failure_threshold {
                    self.transition(
                        &mut data,
                        CircuitState::Open,
                        error.map(TransitionCause::from_error),
                    );
                }
            }
            CircuitState::HalfOpen => {
                data.consecutive_failures = data.consecutive_failures.saturating_add(1);
                self.transition(
                    &mut data,
                    CircuitState::Open,
                    error.map(TransitionCause::from_error),
                );
            }
            CircuitState::Open => {}
        }
    }

    fn reset(&self) {
        let mut data = self.data.lock();
        self.refresh(&mut data);

        if data.state == CircuitState::Closed {
            data.consecutive_failures = 0;
            data.consecutive_successes = 0;
            data.opened_at = None;
        } else {
            self.transition(&mut data, CircuitState::Closed, None);
        }
    }

    fn subscribe(&self, listener: StateChangeListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn stats(&self) -> CircuitBreakerStats {
        let mut data = self.data.lock();
        self.refresh(&mut data);

        CircuitBreakerStats {
            state: data.state,
            consecutive_failures: data.consecutive_failures,
            consecutive_successes: data.consecutive_successes,
            times_opened: data.times_opened,
            rejected: data.rejected,
        }
    }
}

/// Breaker that never opens. Used when circuit breaking is disabled.
///
/// Holds no mutable state. It keeps the transport name so logs and spans
/// still identify the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlwaysClosedBreaker {
    name: String,
}

static ALWAYS_CLOSED: LazyLock<Arc<AlwaysClosedBreaker>> =
    LazyLock::new(|| Arc::new(AlwaysClosedBreaker::new("always-closed")));

impl AlwaysClosedBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Shared process-wide instance for calls not tied to a transport.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::clone(&ALWAYS_CLOSED)
    }
}

impl Breaker for AlwaysClosedBreaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> CircuitState {
        CircuitState::Closed
    }

    fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        Ok(())
    }

    fn record_success(&self) {}

    fn record_failure(&self, _error: Option<&dyn Classify>) {}

    fn reset(&self) {}

    fn subscribe(&self, _listener: StateChangeListener) -> SubscriptionId {
        SubscriptionId(0)
    }

    fn unsubscribe(&self, _id: SubscriptionId) -> bool {
        false
    }

    fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            times_opened: 0,
            rejected: 0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{
        io,
        sync::atomic::{AtomicU32, Ordering},
    };

    use pretty_assertions::assert_eq;
    use tokio::time::advance;

    use super::*;

    fn breaker(failure_threshold: u32, open_duration_ms: u64, success_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "orders",
            CircuitBreakerConfig {
                enabled: true,
                failure_threshold,
                open_duration_ms,
                success_threshold,
            },
        )
        .unwrap()
    }

    fn recorder(breaker: &CircuitBreaker) -> Arc<Mutex<Vec<StateChange>>> {
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&changes);
        breaker.subscribe(Arc::new(move |change: &StateChange| {
            sink.lock().push(change.clone());
        }));
        changes
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = CircuitBreaker::new(
            "orders",
            CircuitBreakerConfig {
                failure_threshold: 0,
                ..CircuitBreakerConfig::default()
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_opens_at_threshold() {
        let breaker = breaker(3, 60_000, 1);

        breaker.record_failure(None);
        breaker.record_failure(None);
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure(None);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let breaker = breaker(3, 60_000, 1);

        breaker.record_failure(None);
        breaker.record_failure(None);
        breaker.record_success();
        breaker.record_failure(None);
        breaker.record_failure(None);

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().consecutive_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_open_duration() {
        let breaker = breaker(1, 50, 1);

        breaker.record_failure(None);
        assert_eq!(breaker.state(), CircuitState::Open);

        advance(Duration::from_millis(49)).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        advance(Duration::from_millis(1)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_needs_success_threshold() {
        let breaker = breaker(3, 50, 2);

        for _ in 0..3 {
            breaker.record_failure(None);
        }
        advance(Duration::from_millis(50)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.stats().consecutive_failures, 3);

        breaker.record_success();
        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::HalfOpen);
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.consecutive_successes, 1);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_and_clears_probes() {
        let breaker = breaker(1, 50, 2);

        breaker.record_failure(None);
        advance(Duration::from_millis(50)).await;
        breaker.record_success();
        assert_eq!(breaker.stats().consecutive_successes, 1);

        breaker.record_failure(None);
        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.consecutive_successes, 0);
        assert_eq!(stats.times_opened, 2);

        // A fresh open period starts from the second opening.
        advance(Duration::from_millis(30)).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_remaining_open_period() {
        let breaker = breaker(1, 3_600_000, 1);
        breaker.record_failure(None);

        advance(Duration::from_secs(600)).await;
        let err = breaker.try_acquire().unwrap_err();
        assert_eq!(err.circuit, "orders");
        assert_eq!(err.retry_after, Duration::from_secs(3_000));
        assert_eq!(breaker.stats().rejected, 1);
    }

    #[test]
    fn test_listeners_see_ordered_transitions() {
        let breaker = breaker(1, 60_000, 1);
        let changes = recorder(&breaker);

        let failure = io::Error::new(io::ErrorKind::TimedOut, "broker timed out");
        breaker.record_failure(Some(&failure));
        breaker.reset();

        let changes = changes.lock();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].previous, CircuitState::Closed);
        assert_eq!(changes[0].current, CircuitState::Open);
        assert_eq!(
            changes[0].cause,
            Some(TransitionCause {
                kind: ErrorKind::TIMEOUT,
                message: "broker timed out".to_string(),
            })
        );
        assert_eq!(changes[1].previous, CircuitState::Open);
        assert_eq!(changes[1].current, CircuitState::Closed);
        assert_eq!(changes[1].cause, None);
    }

    #[test]
    fn test_reset_when_closed_emits_nothing() {
        let breaker = breaker(3, 60_000, 1);
        let changes = recorder(&breaker);

        breaker.record_failure(None);
        breaker.reset();

        assert!(changes.lock().is_empty());
        assert_eq!(breaker.stats().consecutive_failures, 0);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let breaker = breaker(1, 60_000, 1);
        let count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&count);
        let id = breaker.subscribe(Arc::new(move |_: &StateChange| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(breaker.unsubscribe(id));
        assert!(!breaker.unsubscribe(id));

        breaker.record_failure(None);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failure_predicate_filters_counted_failures() {
        let breaker = breaker(1, 60_000, 1)
            .with_failure_predicate(|error| error.kind() != ErrorKind::VALIDATION);

        let invalid = io::Error::new(io::ErrorKind::InvalidInput, "bad payload");
        breaker.record_failure(Some(&invalid));
        assert_eq!(breaker.state(), CircuitState::Closed);

        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        breaker.record_failure(Some(&refused));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_execute_records_outcomes() {
        let breaker = breaker(2, 60_000, 1);
        let token = CancellationToken::new();

        let value = breaker
            .execute(&token, |_| async { Ok::<_, io::Error>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);

        for _ in 0..2 {
            let err = breaker
                .execute(&token, |_| async { Err::<(), _>(io::Error::other("down")) })
                .await
                .unwrap_err();
            assert_eq!(err.operation().map(ToString::to_string).as_deref(), Some("down"));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let invoked = AtomicU32::new(0);
        let err = breaker
            .execute(&token, |_| {
                invoked.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, io::Error>(()) }
            })
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_execute_cancellation_is_not_a_failure() {
        let breaker = breaker(1, 60_000, 1);
        let token = CancellationToken::new();
        token.cancel();

        let err = breaker
            .execute(&token, |token| async move {
                token.cancelled().await;
                Err::<(), _>(io::Error::other("aborted"))
            })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().consecutive_failures, 0);
    }

    #[test]
    fn test_concurrent_failures_open_exactly_once() {
        let breaker = Arc::new(breaker(50, 60_000, 1));
        let opened = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&opened);
        breaker.subscribe(Arc::new(move |change: &StateChange| {
            if change.current == CircuitState::Open {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let breaker = Arc::clone(&breaker);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        breaker.record_failure(None);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread panicked");
        }

        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.stats().times_opened, 1);
    }

    #[tokio::test]
    async fn test_always_closed_breaker() {
        let breaker = AlwaysClosedBreaker::shared();
        assert!(Arc::ptr_eq(&breaker, &AlwaysClosedBreaker::shared()));
        assert_eq!(AlwaysClosedBreaker::new("payments").name(), "payments");

        for _ in 0..100 {
            breaker.record_failure(None);
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire().is_ok());

        let token = CancellationToken::new();
        let value = breaker
            .execute(&token, |_| async { Ok::<_, io::Error>("sent") })
            .await
            .unwrap();
        assert_eq!(value, "sent");
    }
}
