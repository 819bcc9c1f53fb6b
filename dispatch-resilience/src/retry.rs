//! Retry policies for transport operations.
//!
//! [`DefaultRetryPolicy`] invokes an operation up to `max_attempts` times,
//! sleeping between attempts for the delay computed by its backoff calculator.
//! Failures are classified by [`ErrorKind`]:
//!
//! 1. cancellation is never retried and is reported as cancelled
//! 2. a kind in the non-retriable set is returned immediately
//! 3. a kind in the retriable set (or any kind when that set is empty) is retried
//! 4. once attempts run out the last failure is returned as-is
//!
//! [`NoRetryPolicy`] runs the operation exactly once. [`AnyRetryPolicy`] picks
//! one of the two at runtime from [`RetryOptions`].

use std::{fmt, future::Future, sync::Arc, time::Duration};

use ahash::AHashSet;
use dispatch_common::{Classify, ErrorKind, tracing};
use tokio_util::sync::CancellationToken;

use crate::{
    backoff::BackoffCalculator,
    config::RetryOptions,
    error::{ConfigError, ResilienceError},
};

/// Runs a cancellable operation, retrying failures according to the policy.
pub trait RetryPolicy: fmt::Debug + Send + Sync {
    /// Total number of invocations the policy allows.
    fn max_attempts(&self) -> u32;

    /// Whether `error` would be retried if attempts remained.
    fn is_retriable(&self, error: &dyn Classify) -> bool;

    /// Run `operation` until it succeeds, fails permanently, is cancelled, or
    /// runs out of attempts.
    ///
    /// The operation is always invoked at least once, even if `token` is
    /// already cancelled.
    fn execute<T, E, F, Fut>(
        &self,
        token: &CancellationToken,
        operation: F,
    ) -> impl Future<Output = Result<T, ResilienceError<E>>> + Send
    where
        T: Send,
        E: Classify,
        F: FnMut(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send;
}

fn cancelled_or<E: Classify>(token: &CancellationToken, error: E) -> ResilienceError<E> {
    if token.is_cancelled() || error.is_cancellation() {
        ResilienceError::Cancelled
    } else {
        ResilienceError::Operation(error)
    }
}

/// Retries with backoff and kind-based classification.
#[derive(Clone)]
pub struct DefaultRetryPolicy {
    max_attempts: u32,
    backoff: Arc<dyn BackoffCalculator>,
    retriable: AHashSet<ErrorKind>,
    non_retriable: AHashSet<ErrorKind>,
}

impl fmt::Debug for DefaultRetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultRetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("retriable", &self.retriable)
            .field("non_retriable", &self.non_retriable)
            .finish()
    }
}

impl DefaultRetryPolicy {
    /// Retry every non-cancellation failure up to `max_attempts` invocations.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `max_attempts` is zero.
    pub fn new(max_attempts: u32, backoff: Arc<dyn BackoffCalculator>) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::invalid("max_retry_attempts", "must be at least 1"));
        }

        Ok(Self {
            max_attempts,
            backoff,
            retriable: AHashSet::new(),
            non_retriable: AHashSet::new(),
        })
    }

    /// # Errors
    ///
    /// Returns [`ConfigError`] if the options fail validation.
    pub fn from_options(options: &RetryOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        Ok(Self::new(options.max_retry_attempts, options.calculator()?)?
            .with_retriable(options.retriable_kinds.iter().cloned())
            .with_non_retriable(options.non_retriable_kinds.iter().cloned()))
    }

    /// Restrict retries to these kinds.
    #[must_use]
    pub fn with_retriable(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retriable.extend(kinds);
        self
    }

    /// Never retry these kinds, even if they are also marked retriable.
    #[must_use]
    pub fn with_non_retriable(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.non_retriable.extend(kinds);
        self
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff
            .calculate_delay(attempt)
            .unwrap_or(Duration::ZERO)
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn is_retriable(&self, error: &dyn Classify) -> bool {
        if error.is_cancellation() {
            return false;
        }

        let kind = error.kind();
        if self.non_retriable.contains(&kind) {
            return false;
        }
        self.retriable.is_empty() || self.retriable.contains(&kind)
    }

    fn execute<T, E, F, Fut>(
        &self,
        token: &CancellationToken,
        mut operation: F,
    ) -> impl Future<Output = Result<T, ResilienceError<E>>> + Send
    where
        T: Send,
        E: Classify,
        F: FnMut(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        async move {
            let mut attempt = 1;

            loop {
                let error = match operation(token.clone()).await {
                    Ok(value) => {
                        if attempt > 1 {
                            tracing::debug!(attempt, "Operation succeeded after retry");
                        }
                        return Ok(value);
                    }
                    Err(error) => error,
                };

                if token.is_cancelled() || error.is_cancellation() {
                    tracing::debug!(attempt, "Operation cancelled, not retrying");
                    return Err(ResilienceError::Cancelled);
                }

                if !self.is_retriable(&error) {
                    tracing::debug!(
                        attempt,
                        kind = %error.kind(),
                        error = %error,
                        "Failure is not retriable"
                    );
                    return Err(ResilienceError::Operation(error));
                }

                if attempt >= self.max_attempts {
                    tracing::warn!(
                        attempts = attempt,
                        kind = %error.kind(),
                        error = %error,
                        "Retry attempts exhausted"
                    );
                    return Err(ResilienceError::Operation(error));
                }

                let delay = self.delay_for(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts = self.max_attempts,
                    delay_ms = delay.as_millis(),
                    kind = %error.kind(),
                    error = %error,
                    "Operation failed, retrying"
                );
                drop(error);

                tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        tracing::debug!(attempt, "Cancelled during backoff");
                        return Err(ResilienceError::Cancelled);
                    }
                    () = tokio::time::sleep(delay) => {}
                }

                attempt += 1;
            }
        }
    }
}

/// Runs the operation exactly once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoRetryPolicy;

impl RetryPolicy for NoRetryPolicy {
    fn max_attempts(&self) -> u32 {
        1
    }

    fn is_retriable(&self, _error: &dyn Classify) -> bool {
        false
    }

    fn execute<T, E, F, Fut>(
        &self,
        token: &CancellationToken,
        mut operation: F,
    ) -> impl Future<Output = Result<T, ResilienceError<E>>> + Send
    where
        T: Send,
        E: Classify,
        F: FnMut(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        async move {
            operation(token.clone())
                .await
                .map_err(|error| cancelled_or(token, error))
        }
    }
}

/// Retry policy selected from configuration at runtime.
#[derive(Debug, Clone)]
pub enum AnyRetryPolicy {
    Default(DefaultRetryPolicy),
    NoRetry(NoRetryPolicy),
}

impl AnyRetryPolicy {
    /// [`NoRetryPolicy`] when retries are disabled or only one attempt is
    /// allowed, otherwise [`DefaultRetryPolicy`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if enabled options fail validation.
    pub fn from_options(options: &RetryOptions) -> Result<Self, ConfigError> {
        if !options.enabled || options.max_retry_attempts == 1 {
            return Ok(Self::NoRetry(NoRetryPolicy));
        }
        DefaultRetryPolicy::from_options(options).map(Self::Default)
    }
}

impl RetryPolicy for AnyRetryPolicy {
    fn max_attempts(&self) -> u32 {
        match self {
            Self::Default(policy) => policy.max_attempts(),
            Self::NoRetry(policy) => policy.max_attempts(),
        }
    }

    fn is_retriable(&self, error: &dyn Classify) -> bool {
        match self {
            Self::Default(policy) => policy.is_retriable(error),
            Self::NoRetry(policy) => policy.is_retriable(error),
        }
    }

    fn execute<T, E, F, Fut>(
        &self,
        token: &CancellationToken,
        operation: F,
    ) -> impl Future<Output = Result<T, ResilienceError<E>>> + Send
    where
        T: Send,
        E: Classify,
        F: FnMut(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        async move {
            match self {
                Self::Default(policy) => policy.execute(token, operation).await,
                Self::NoRetry(policy) => policy.execute(token, operation).await,
            }
        }
    }
}
