use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use dispatch_common::logging::LoggingConfig;
use dispatch_dlq::{DeadLetterConfig, DeadLetterQueue};
use dispatch_resilience::{
    AnyRetryPolicy, RegistryConfig, RetryOptions, TransportCircuitBreakerRegistry,
};
use serde::{Deserialize, Serialize};

use crate::{dispatcher::ResilientDispatcher, error::DispatchError};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "DISPATCH_CONFIG";

/// Locations searched, in order, when neither `--config` nor [`CONFIG_ENV`] is set
pub const DEFAULT_CONFIG_PATHS: [&str; 2] =
    ["./dispatch.config.ron", "/etc/dispatch/dispatch.config.ron"];

/// Top-level configuration document.
///
/// ```ron
/// Dispatch (
///     logging: (level: Some("info"), format: Json),
///     retry: (max_retry_attempts: 5, non_retriable_kinds: ["validation"]),
///     circuit_breaker: (
///         defaults: (failure_threshold: 5, open_duration_ms: 30000),
///         overrides: { "payments": (failure_threshold: 2) },
///     ),
///     dead_letter: Postgres((connection_string: "postgres://dispatch@localhost/dispatch")),
/// )
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dispatch {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub retry: RetryOptions,

    #[serde(default)]
    pub circuit_breaker: RegistryConfig,

    #[serde(default)]
    pub dead_letter: DeadLetterConfig,
}

impl Dispatch {
    /// Parse a RON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid RON for this structure.
    pub fn from_ron(content: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(content)?)
    }

    /// Read and parse the configuration file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
        })?;
        Self::from_ron(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), e))
    }

    /// Build the dispatcher described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the retry or breaker settings are invalid, or the
    /// dead-letter store cannot be opened.
    pub async fn into_dispatcher(self) -> Result<ResilientDispatcher, DispatchError> {
        let retry = AnyRetryPolicy::from_options(&self.retry)?;
        let breakers = TransportCircuitBreakerRegistry::new(self.circuit_breaker)?;
        let dead_letters: DeadLetterQueue = self.dead_letter.into_queue().await?;

        Ok(ResilientDispatcher::new(retry, Arc::new(breakers), dead_letters))
    }
}

/// Find the configuration file using the following precedence:
/// 1. `explicit` (the `--config` argument)
/// 2. `DISPATCH_CONFIG` environment variable
/// 3. ./dispatch.config.ron (current working directory)
/// 4. /etc/dispatch/dispatch.config.ron (system-wide config)
///
/// # Errors
///
/// Returns an error if an explicitly named file does not exist, or no file is found.
pub fn find_config_file(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        anyhow::bail!("Config file does not exist: {}", path.display());
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("{CONFIG_ENV} points to non-existent file: {}", path.display());
    }

    if let Some(path) = DEFAULT_CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
    {
        return Ok(path);
    }

    let paths_tried = DEFAULT_CONFIG_PATHS
        .iter()
        .map(|p| format!("  - {p}"))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - --config argument\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}
