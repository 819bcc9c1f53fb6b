//! Resilience engine for message transports.
//!
//! This crate provides the building blocks used to protect calls into external
//! transports from cascading failure:
//!
//! - [`backoff`]: delay calculators (fixed, linear, exponential with jitter)
//! - [`circuit_breaker`]: the per-transport Closed / Open / Half-Open state machine
//! - [`retry`]: retry policies that classify failures by [`ErrorKind`]
//! - [`registry`]: a concurrent registry holding one breaker per transport
//!
//! Null variants ([`AlwaysClosedBreaker`], [`NoRetryPolicy`], [`NullBreakerRegistry`])
//! disable each concern without changing caller code.
//!
//! [`ErrorKind`]: dispatch_common::ErrorKind

pub mod backoff;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod registry;
pub mod retry;

pub use backoff::{
    BackoffCalculator, BackoffOptions, BackoffStrategy, ExponentialBackoff, FixedBackoff,
    LinearBackoff, create_calculator,
};
pub use circuit_breaker::{
    AlwaysClosedBreaker, Breaker, BreakerExt, CircuitBreaker, CircuitBreakerStats, CircuitState,
    StateChange, StateChangeListener, SubscriptionId, TransitionCause,
};
pub use config::{CircuitBreakerConfig, RetryOptions};
pub use error::{BackoffError, CircuitOpenError, ConfigError, RegistryError, ResilienceError};
pub use registry::{
    BreakerRegistry, NullBreakerRegistry, RegistryConfig, TransportCircuitBreakerRegistry,
};
pub use retry::{AnyRetryPolicy, DefaultRetryPolicy, NoRetryPolicy, RetryPolicy};
