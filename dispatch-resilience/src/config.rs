//! Circuit breaker and retry configuration.

use std::{sync::Arc, time::Duration};

use dispatch_common::ErrorKind;
use serde::{Deserialize, Serialize};

use crate::{
    backoff::{BackoffCalculator, BackoffOptions, BackoffStrategy, create_calculator},
    error::ConfigError,
};

/// Circuit breaker configuration.
///
/// Applied per transport: each destination gets its own breaker built from
/// this configuration (or from an override for that transport).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// When `false`, callers receive an always-closed breaker.
    ///
    /// Default: true
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// Consecutive failures required to open the circuit.
    ///
    /// Default: 5
    #[serde(default = "defaults::failure_threshold")]
    pub failure_threshold: u32,

    /// How long the circuit stays open before allowing probe calls (in milliseconds).
    ///
    /// Default: 30000 (30 seconds)
    #[serde(default = "defaults::open_duration_ms")]
    pub open_duration_ms: u64,

    /// Consecutive successful probes required to close a half-open circuit.
    ///
    /// Default: 1
    #[serde(default = "defaults::success_threshold")]
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::enabled(),
            failure_threshold: defaults::failure_threshold(),
            open_duration_ms: defaults::open_duration_ms(),
            success_threshold: defaults::success_threshold(),
        }
    }
}

impl CircuitBreakerConfig {
    #[must_use]
    pub const fn open_duration(&self) -> Duration {
        Duration::from_millis(self.open_duration_ms)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a threshold or the open duration is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold", "must be at least 1"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("success_threshold", "must be at least 1"));
        }
        if self.open_duration_ms == 0 {
            return Err(ConfigError::invalid("open_duration_ms", "must be greater than zero"));
        }
        Ok(())
    }
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryOptions {
    /// When `false`, operations run exactly once.
    ///
    /// Default: true
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// Total number of invocations, including the first.
    ///
    /// Default: 3
    #[serde(default = "defaults::max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Delay before the second invocation (in milliseconds).
    ///
    /// Default: 200
    #[serde(default = "defaults::base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any single delay (in milliseconds).
    ///
    /// Default: 30000 (30 seconds)
    #[serde(default = "defaults::max_delay_ms")]
    pub max_delay_ms: u64,

    /// Default: 2.0
    #[serde(default = "defaults::backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Default: true
    #[serde(default = "defaults::enabled")]
    pub jitter_enabled: bool,

    /// Jitter window as a fraction of the delay.
    ///
    /// Default: 0.2 (±20%)
    #[serde(default = "defaults::jitter_factor")]
    pub jitter_factor: f64,

    /// Kinds that are retried. Empty means every non-cancellation failure is retriable.
    #[serde(default)]
    pub retriable_kinds: Vec<ErrorKind>,

    /// Kinds that are never retried. Takes precedence over `retriable_kinds`.
    #[serde(default)]
    pub non_retriable_kinds: Vec<ErrorKind>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            enabled: defaults::enabled(),
            max_retry_attempts: defaults::max_retry_attempts(),
            base_delay_ms: defaults::base_delay_ms(),
            max_delay_ms: defaults::max_delay_ms(),
            backoff_multiplier: defaults::backoff_multiplier(),
            jitter_enabled: defaults::enabled(),
            jitter_factor: defaults::jitter_factor(),
            retriable_kinds: Vec::new(),
            non_retriable_kinds: Vec::new(),
        }
    }
}

impl RetryOptions {
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Backoff parameters equivalent to these options.
    #[must_use]
    pub const fn backoff_options(&self) -> BackoffOptions {
        BackoffOptions {
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: Some(self.max_delay_ms),
            multiplier: self.backoff_multiplier,
            jitter_enabled: self.jitter_enabled,
            jitter_factor: self.jitter_factor,
        }
    }

    /// Build the exponential calculator described by these options.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Backoff`] if the delays, multiplier or jitter are
    /// out of range.
    pub fn calculator(&self) -> Result<Arc<dyn BackoffCalculator>, ConfigError> {
        Ok(create_calculator(
            BackoffStrategy::Exponential,
            Some(&self.backoff_options()),
        )?)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError`] if `max_retry_attempts` is zero or the backoff
    /// parameters are out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retry_attempts == 0 {
            return Err(ConfigError::invalid("max_retry_attempts", "must be at least 1"));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::invalid(
                "max_delay_ms",
                format!(
                    "must not be lower than base_delay_ms ({} < {})",
                    self.max_delay_ms, self.base_delay_ms
                ),
            ));
        }
        self.calculator().map(|_| ())
    }
}

mod defaults {
    pub const fn enabled() -> bool {
        true
    }

    pub const fn failure_threshold() -> u32 {
        5
    }

    pub const fn open_duration_ms() -> u64 {
        30_000
    }

    pub const fn success_threshold() -> u32 {
        1
    }

    pub const fn max_retry_attempts() -> u32 {
        3
    }

    pub const fn base_delay_ms() -> u64 {
        200
    }

    pub const fn max_delay_ms() -> u64 {
        30_000
    }

    pub const fn backoff_multiplier() -> f64 {
        2.0
    }

    pub const fn jitter_factor() -> f64 {
        0.2
    }
}
