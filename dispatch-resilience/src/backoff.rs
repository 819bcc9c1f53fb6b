//! Backoff delay calculators.
//!
//! A calculator maps a 1-indexed attempt number to the delay that should elapse
//! before the next attempt:
//!
//! ```text
//! Fixed:        delay = base
//! Linear:       delay = min(base * attempt, max)
//! Exponential:  delay = min(base * multiplier^(attempt - 1) * (1 ± jitter), max)
//! ```
//!
//! Calculators are immutable after construction and safe to share between tasks.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::BackoffError;

/// Cap applied by the linear calculator when none is configured.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30 * 60);

/// Computes the delay to wait before retrying.
pub trait BackoffCalculator: fmt::Debug + Send + Sync {
    /// Delay for the given attempt number.
    ///
    /// # Errors
    ///
    /// Returns [`BackoffError::OutOfRange`] if `attempt` is zero.
    fn calculate_delay(&self, attempt: u32) -> Result<Duration, BackoffError>;
}

fn check_attempt(attempt: u32) -> Result<(), BackoffError> {
    if attempt == 0 {
        return Err(BackoffError::out_of_range("attempt", "must be at least 1"));
    }
    Ok(())
}

fn check_positive(parameter: &'static str, value: Duration) -> Result<(), BackoffError> {
    if value.is_zero() {
        return Err(BackoffError::out_of_range(parameter, "must be greater than zero"));
    }
    Ok(())
}

/// Same delay for every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    /// # Errors
    ///
    /// Returns [`BackoffError::OutOfRange`] if `delay` is zero.
    pub fn new(delay: Duration) -> Result<Self, BackoffError> {
        check_positive("delay", delay)?;
        Ok(Self { delay })
    }
}

impl BackoffCalculator for FixedBackoff {
    fn calculate_delay(&self, attempt: u32) -> Result<Duration, BackoffError> {
        check_attempt(attempt)?;
        Ok(self.delay)
    }
}

/// Delay grows by `base` on every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    base: Duration,
    max_delay: Duration,
}

impl LinearBackoff {
    /// Create a linear calculator, capped at [`DEFAULT_MAX_DELAY`] if `max_delay`
    /// is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`BackoffError::OutOfRange`] if either delay is zero.
    pub fn new(base: Duration, max_delay: Option<Duration>) -> Result<Self, BackoffError> {
        check_positive("base_delay", base)?;
        let max_delay = max_delay.unwrap_or(DEFAULT_MAX_DELAY);
        check_positive("max_delay", max_delay)?;
        Ok(Self { base, max_delay })
    }
}

impl BackoffCalculator for LinearBackoff {
    fn calculate_delay(&self, attempt: u32) -> Result<Duration, BackoffError> {
        check_attempt(attempt)?;
        Ok(self
            .base
            .checked_mul(attempt)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay)))
    }
}

/// Delay multiplies on every attempt, optionally randomised.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    base: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: Option<f64>,
}

impl ExponentialBackoff {
    /// Create an exponential calculator without jitter.
    ///
    /// # Errors
    ///
    /// Returns [`BackoffError::OutOfRange`] if either delay is zero or the
    /// multiplier is below 1.
    pub fn new(base: Duration, max_delay: Duration, multiplier: f64) -> Result<Self, BackoffError> {
        check_positive("base_delay", base)?;
        check_positive("max_delay", max_delay)?;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(BackoffError::out_of_range(
                "multiplier",
                format!("must be a finite value of at least 1.0, got {multiplier}"),
            ));
        }
        Ok(Self {
            base,
            max_delay,
            multiplier,
            jitter: None,
        })
    }

    /// Randomise each delay within `±factor` of its exponential value.
    ///
    /// # Errors
    ///
    /// Returns [`BackoffError::OutOfRange`] if `factor` is outside `[0, 1]`.
    pub fn with_jitter(mut self, factor: f64) -> Result<Self, BackoffError> {
        if !(0.0..=1.0).contains(&factor) {
            return Err(BackoffError::out_of_range(
                "jitter_factor",
                format!("must be within [0, 1], got {factor}"),
            ));
        }
        self.jitter = Some(factor);
        Ok(self)
    }

    #[must_use]
    pub const fn jitter_factor(&self) -> Option<f64> {
        self.jitter
    }

    /// Uncapped delay in nanoseconds. May be infinite for large attempts.
    #[allow(clippy::cast_precision_loss)]
    fn raw_nanos(&self, attempt: u32) -> f64 {
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        self.base.as_nanos() as f64 * self.multiplier.powi(exponent)
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn cap(&self, nanos: f64) -> Duration {
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            self.max_delay
        } else {
            Duration::from_nanos(nanos.max(0.0) as u64)
        }
    }

    /// Delay for `attempt` using an explicit jitter sample in `[0, 1]`.
    ///
    /// A sample of `0.5` yields the un-jittered value; `0.0` and `1.0` yield the
    /// low and high edges of the jitter window. Ignored when jitter is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`BackoffError::OutOfRange`] if `attempt` is zero.
    pub fn delay_with_sample(&self, attempt: u32, sample: f64) -> Result<Duration, BackoffError> {
        check_attempt(attempt)?;
        let raw = self.raw_nanos(attempt);
        let scaled = match self.jitter {
            Some(factor) if factor > 0.0 => {
                let sample = sample.clamp(0.0, 1.0);
                raw * (2.0 * factor).mul_add(sample, 1.0 - factor)
            }
            _ => raw,
        };
        Ok(self.cap(scaled))
    }
}

impl BackoffCalculator for ExponentialBackoff {
    fn calculate_delay(&self, attempt: u32) -> Result<Duration, BackoffError> {
        let sample = if self.jitter.is_some() {
            rand::rng().random_range(0.0..=1.0)
        } else {
            0.5
        };
        self.delay_with_sample(attempt, sample)
    }
}

/// Backoff strategy tag used by configuration and the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    Exponential,
    ExponentialWithJitter,
}

impl fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fixed => "fixed",
            Self::Linear => "linear",
            Self::Exponential => "exponential",
            Self::ExponentialWithJitter => "exponential_with_jitter",
        })
    }
}

impl FromStr for BackoffStrategy {
    type Err = BackoffError;

    /// Accepts both backoff and retry-strategy spellings, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();

        match normalised.as_str() {
            "fixed" | "constant" | "fixeddelay" => Ok(Self::Fixed),
            "linear" | "linearbackoff" => Ok(Self::Linear),
            "exponential" | "exponentialbackoff" => Ok(Self::Exponential),
            "exponentialwithjitter" | "jitter" | "exponentialjitter" => {
                Ok(Self::ExponentialWithJitter)
            }
            _ => Err(BackoffError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Parameters shared by every calculator built through [`create_calculator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffOptions {
    /// Base (or fixed) delay in milliseconds.
    #[serde(default = "defaults::base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound in milliseconds. Defaults to 30 minutes.
    #[serde(default)]
    pub max_delay_ms: Option<u64>,

    /// Growth factor for exponential strategies.
    #[serde(default = "defaults::multiplier")]
    pub multiplier: f64,

    /// Enable jitter for the plain `Exponential` strategy.
    #[serde(default)]
    pub jitter_enabled: bool,

    /// Jitter window as a fraction of the delay.
    #[serde(default = "defaults::jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self {
            base_delay_ms: defaults::base_delay_ms(),
            max_delay_ms: None,
            multiplier: defaults::multiplier(),
            jitter_enabled: false,
            jitter_factor: defaults::jitter_factor(),
        }
    }
}

impl BackoffOptions {
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay_ms
            .map_or(DEFAULT_MAX_DELAY, Duration::from_millis)
    }
}

mod defaults {
    pub const fn base_delay_ms() -> u64 {
        200
    }

    pub const fn multiplier() -> f64 {
        2.0
    }

    pub const fn jitter_factor() -> f64 {
        0.2 // ±20%
    }
}

/// Build the calculator matching `strategy`.
///
/// # Errors
///
/// Returns [`BackoffError::MissingOptions`] when `options` is `None`, or
/// [`BackoffError::OutOfRange`] when the options fail validation.
pub fn create_calculator(
    strategy: BackoffStrategy,
    options: Option<&BackoffOptions>,
) -> Result<Arc<dyn BackoffCalculator>, BackoffError> {
    let options = options.ok_or(BackoffError::MissingOptions)?;

    Ok(match strategy {
        BackoffStrategy::Fixed => Arc::new(FixedBackoff::new(options.base_delay())?),
        BackoffStrategy::Linear => Arc::new(LinearBackoff::new(
            options.base_delay(),
            options.max_delay_ms.map(Duration::from_millis),
        )?),
        BackoffStrategy::Exponential => {
            let calculator =
                ExponentialBackoff::new(options.base_delay(), options.max_delay(), options.multiplier)?;
            if options.jitter_enabled {
                Arc::new(calculator.with_jitter(options.jitter_factor)?)
            } else {
                Arc::new(calculator)
            }
        }
        BackoffStrategy::ExponentialWithJitter => Arc::new(
            ExponentialBackoff::new(options.base_delay(), options.max_delay(), options.multiplier)?
                .with_jitter(options.jitter_factor)?,
        ),
    })
}

/// Parse a strategy tag and build the matching calculator.
///
/// # Errors
///
/// Returns [`BackoffError::UnknownStrategy`] for an unrecognised tag, otherwise
/// the same errors as [`create_calculator`].
pub fn create_calculator_from_tag(
    tag: &str,
    options: Option<&BackoffOptions>,
) -> Result<Arc<dyn BackoffCalculator>, BackoffError> {
    create_calculator(tag.parse()?, options)
}
