//! Subscriber initialisation.
//!
//! Components only ever emit through `tracing` macros; binaries call [`init`]
//! once at startup to decide how those events are rendered.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

/// Output format for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    /// Single-line human readable output
    #[default]
    Compact,
    /// One JSON object per event, for log shippers
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level filter (`trace`, `debug`, `info`, `warn`, `error`).
    ///
    /// The `LOG_LEVEL` environment variable takes precedence. When neither is set,
    /// debug builds log at `TRACE` and release builds at `INFO`.
    #[serde(default)]
    pub level: Option<String>,

    #[serde(default)]
    pub format: LogFormat,
}

impl LoggingConfig {
    /// Resolve the effective level filter.
    #[must_use]
    pub fn level_filter(&self) -> LevelFilter {
        let default = if cfg!(debug_assertions) {
            LevelFilter::TRACE
        } else {
            LevelFilter::INFO
        };

        let Some(level) = std::env::var("LOG_LEVEL").ok().or_else(|| self.level.clone()) else {
            return default;
        };

        LevelFilter::from_str(level.as_str()).unwrap_or_else(|_| {
            eprintln!("Invalid log level specified {level}, defaulting to {default}");
            default
        })
    }
}

fn is_dispatch_target(metadata: &tracing::Metadata<'_>) -> bool {
    metadata.target().starts_with("dispatch")
}

/// Install the global subscriber.
///
/// Only events from `dispatch*` targets are rendered.
pub fn init(config: &LoggingConfig) {
    let level = config.level_filter();

    match config.format {
        LogFormat::Compact => tracing_subscriber::Registry::default()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_file(false)
                    .with_line_number(false)
                    .compact()
                    .with_ansi(true)
                    .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                    .with_filter(level)
                    .with_filter(FilterFn::new(is_dispatch_target)),
            )
            .init(),
        LogFormat::Json => tracing_subscriber::Registry::default()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                    .with_filter(level)
                    .with_filter(FilterFn::new(is_dispatch_target)),
            )
            .init(),
    }
}
