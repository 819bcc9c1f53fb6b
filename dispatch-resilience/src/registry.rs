//! Per-transport circuit breaker registry.
//!
//! Every transport (queue, topic, broker connection) gets its own breaker so a
//! failing destination never trips the circuit for a healthy one. Names are
//! matched case-insensitively; the first call for a name creates its breaker
//! atomically, and every later call receives the same instance.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use ahash::AHashMap;
use dashmap::{DashMap, mapref::entry::Entry};
use dispatch_common::tracing;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    circuit_breaker::{
        AlwaysClosedBreaker, Breaker, CircuitBreaker, CircuitState, StateChange,
        StateChangeListener, SubscriptionId,
    },
    config::CircuitBreakerConfig,
    error::RegistryError,
};

/// Registry configuration: defaults plus per-transport overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Applied to every transport without an override
    #[serde(default)]
    pub defaults: CircuitBreakerConfig,

    /// Per-transport configuration, keyed by transport name (case-insensitive)
    #[serde(default)]
    pub overrides: AHashMap<String, CircuitBreakerConfig>,
}

/// Lookup and lifecycle of per-transport breakers.
pub trait BreakerRegistry: fmt::Debug + Send + Sync {
    /// Existing breaker for `name`, or a new one built from `config` (or the
    /// registry configuration when `None`).
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::BlankName`] for an empty or whitespace name, or
    /// [`RegistryError::Config`] if the configuration used to create it is invalid.
    fn get_or_create(
        &self,
        name: &str,
        config: Option<&CircuitBreakerConfig>,
    ) -> Result<Arc<dyn Breaker>, RegistryError>;

    fn try_get(&self, name: &str) -> Option<Arc<dyn Breaker>>;

    /// Returns `true` if a breaker was registered under `name`.
    fn remove(&self, name: &str) -> bool;

    fn reset_all(&self);

    /// Snapshot of every breaker's state, keyed by transport name.
    fn states(&self) -> AHashMap<String, CircuitState>;

    fn transport_names(&self) -> Vec<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn normalise(name: &str) -> Result<String, RegistryError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(RegistryError::BlankName);
    }
    Ok(trimmed.to_lowercase())
}

type SharedListeners = Arc<RwLock<Vec<(SubscriptionId, StateChangeListener)>>>;

/// Concurrent registry of [`CircuitBreaker`]s keyed by transport name.
pub struct TransportCircuitBreakerRegistry {
    config: RegistryConfig,
    breakers: DashMap<String, Arc<dyn Breaker>>,
    listeners: SharedListeners,
    next_subscription: AtomicU64,
}

impl fmt::Debug for TransportCircuitBreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportCircuitBreakerRegistry")
            .field("config", &self.config)
            .field("breakers", &self.breakers.len())
            .field("listeners", &self.listeners.read().len())
            .finish_non_exhaustive()
    }
}

impl TransportCircuitBreakerRegistry {
    /// # Errors
    ///
    /// Returns [`RegistryError::Config`] if the defaults or any override are invalid,
    /// or [`RegistryError::BlankName`] if an override is keyed by a blank name.
    pub fn new(config: RegistryConfig) -> Result<Self, RegistryError> {
        config.defaults.validate()?;

        let mut overrides = AHashMap::with_capacity(config.overrides.len());
        for (name, override_config) in config.overrides {
            override_config.validate()?;
            overrides.insert(normalise(&name)?, override_config);
        }

        Ok(Self {
            config: RegistryConfig {
                defaults: config.defaults,
                overrides,
            },
            breakers: DashMap::new(),
            listeners: Arc::new(RwLock::new(Vec::new())),
            next_subscription: AtomicU64::new(1),
        })
    }

    /// Registry with the same configuration for every transport.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Config`] if `defaults` is invalid.
    pub fn with_defaults(defaults: CircuitBreakerConfig) -> Result<Self, RegistryError> {
        Self::new(RegistryConfig {
            defaults,
            overrides: AHashMap::new(),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Configuration a new breaker for `key` would receive.
    fn resolve(&self, key: &str) -> &CircuitBreakerConfig {
        self.config.overrides.get(key).unwrap_or(&self.config.defaults)
    }

    fn build(&self, name: &str, config: &CircuitBreakerConfig) -> Result<Arc<dyn Breaker>, RegistryError> {
        if !config.enabled {
            tracing::debug!(transport = %name, "Circuit breaking disabled for transport");
            return Ok(Arc::new(AlwaysClosedBreaker::new(name)));
        }

        let breaker = CircuitBreaker::new(name, config.clone())?;
        let listeners = Arc::clone(&self.listeners);
        breaker.subscribe(Arc::new(move |change: &StateChange| {
            for (_, listener) in listeners.read().iter() {
                listener(change);
            }
        }));

        tracing::debug!(
            transport = %name,
            failure_threshold = config.failure_threshold,
            open_duration_ms = config.open_duration_ms,
            "Created circuit breaker"
        );
        Ok(Arc::new(breaker))
    }

    /// Attach `listener` to every breaker this registry has created or will create.
    pub fn subscribe_all(&self, listener: StateChangeListener) -> SubscriptionId {
        let id = SubscriptionId::new(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Returns `true` if the subscription existed.
    pub fn unsubscribe_all(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }
}

impl BreakerRegistry for TransportCircuitBreakerRegistry {
    fn get_or_create(
        &self,
        name: &str,
        config: Option<&CircuitBreakerConfig>,
    ) -> Result<Arc<dyn Breaker>, RegistryError> {
        let key = normalise(name)?;

        match self.breakers.entry(key) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let config = config.unwrap_or_else(|| self.resolve(entry.key()));
                let breaker = self.build(name.trim(), config)?;
                Ok(Arc::clone(entry.insert(breaker).value()))
            }
        }
    }

    fn try_get(&self, name: &str) -> Option<Arc<dyn Breaker>> {
        let key = normalise(name).ok()?;
        self.breakers.get(&key).map(|breaker| Arc::clone(breaker.value()))
    }

    fn remove(&self, name: &str) -> bool {
        normalise(name)
            .ok()
            .and_then(|key| self.breakers.remove(&key))
            .is_some()
    }

    fn reset_all(&self) {
        for breaker in &self.breakers {
            breaker.value().reset();
        }
        tracing::info!(count = self.breakers.len(), "Reset all circuit breakers");
    }

    fn states(&self) -> AHashMap<String, CircuitState> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect()
    }

    fn transport_names(&self) -> Vec<String> {
        self.breakers.iter().map(|entry| entry.key().clone()).collect()
    }

    fn len(&self) -> usize {
        self.breakers.len()
    }
}

/// Registry that hands out always-closed breakers and never stores anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NullBreakerRegistry;

impl BreakerRegistry for NullBreakerRegistry {
    fn get_or_create(
        &self,
        name: &str,
        _config: Option<&CircuitBreakerConfig>,
    ) -> Result<Arc<dyn Breaker>, RegistryError> {
        normalise(name)?;
        Ok(Arc::new(AlwaysClosedBreaker::new(name.trim())))
    }

    fn try_get(&self, _name: &str) -> Option<Arc<dyn Breaker>> {
        None
    }

    fn remove(&self, _name: &str) -> bool {
        false
    }

    fn reset_all(&self) {}

    fn states(&self) -> AHashMap<String, CircuitState> {
        AHashMap::new()
    }

    fn transport_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn len(&self) -> usize {
        0
    }
}
