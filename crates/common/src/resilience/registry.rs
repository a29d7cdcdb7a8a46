//! Named breaker registry
//!
//! One breaker per logical dependency, shared by every caller in the process.
//! Lookups are first-writer-wins: the config passed by the first caller for a
//! name builds the breaker; later configs for the same name are ignored.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::circuit_breaker::{CircuitBreaker, StateChangeListener, StateTransition};
use super::clock::{Clock, SystemClock};
use super::config::CircuitBreakerConfig;
use super::error::{ConfigError, ConfigResult};
use super::metrics::CircuitBreakerMetrics;

/// Process-wide collection of named circuit breakers.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    clock: Arc<dyn Clock>,
    listener: Option<StateChangeListener>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &self.names())
            .field("has_listener", &self.listener.is_some())
            .finish_non_exhaustive()
    }
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::with_shared_clock(Arc::new(SystemClock))
    }

    /// Registry whose breakers all read the given clock.
    pub fn with_clock<C: Clock + 'static>(clock: C) -> Self {
        Self::with_shared_clock(Arc::new(clock))
    }

    pub fn with_shared_clock(clock: Arc<dyn Clock>) -> Self {
        Self { breakers: DashMap::new(), clock, listener: None }
    }

    /// Forward every transition of breakers created by
    /// [`get_or_create`](Self::get_or_create) to `listener`.
    #[must_use]
    pub fn on_state_change<F>(mut self, listener: F) -> Self
    where
        F: Fn(&StateTransition) + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Clock handed to breakers built by this registry.
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Return the breaker registered under `config.name`, creating it from
    /// `config` if the name is unseen.
    ///
    /// Concurrent callers for the same unseen name observe exactly one
    /// instance. An invalid `config` for an unseen name is an error and
    /// registers nothing.
    pub fn get_or_create(&self, config: CircuitBreakerConfig) -> ConfigResult<Arc<CircuitBreaker>> {
        if let Some(existing) = self.breakers.get(&config.name) {
            if existing.config() != &config {
                debug!(breaker = %config.name, "breaker already registered, ignoring new config");
            }
            return Ok(Arc::clone(existing.value()));
        }

        let name = config.name.clone();
        let entry = self.breakers.entry(name).or_try_insert_with(|| {
            let mut builder =
                CircuitBreaker::builder(config).shared_clock(Arc::clone(&self.clock));
            if let Some(listener) = &self.listener {
                builder = builder.listener(Arc::clone(listener));
            }
            builder.build().map(Arc::new)
        })?;

        Ok(Arc::clone(entry.value()))
    }

    /// First-writer-wins registration of a fully customised breaker.
    ///
    /// `build` only runs when `name` is unseen, at most once across
    /// concurrent callers, and must produce a breaker with that same name.
    ///
    /// `build` runs while the map entry for `name` is locked: it may use
    /// [`clock`](Self::clock) but must not call any other method on this
    /// registry, or it deadlocks.
    pub fn get_or_insert_with<F>(&self, name: &str, build: F) -> ConfigResult<Arc<CircuitBreaker>>
    where
        F: FnOnce() -> ConfigResult<CircuitBreaker>,
    {
        if let Some(existing) = self.breakers.get(name) {
            return Ok(Arc::clone(existing.value()));
        }

        let entry = self.breakers.entry(name.to_string()).or_try_insert_with(|| {
            let breaker = build()?;
            if breaker.name() != name {
                return Err(ConfigError::invalid(
                    "name",
                    format!("breaker '{}' cannot be registered as '{name}'", breaker.name()),
                ));
            }
            Ok(Arc::new(breaker))
        })?;

        Ok(Arc::clone(entry.value()))
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.breakers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|entry| entry.key().clone()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Metrics snapshot for every registered breaker, keyed by name.
    pub fn get_all_metrics(&self) -> BTreeMap<String, CircuitBreakerMetrics> {
        self.snapshot()
            .into_iter()
            .map(|breaker| (breaker.name().to_string(), breaker.metrics()))
            .collect()
    }

    /// Reset every registered breaker to CLOSED.
    pub fn reset_all(&self) {
        for breaker in self.snapshot() {
            breaker.reset();
        }
    }

    // Clone the handles out first: listeners fired by `reset` may call back
    // into the registry, which must not find a shard lock held.
    fn snapshot(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers.iter().map(|entry| Arc::clone(entry.value())).collect()
    }
}
