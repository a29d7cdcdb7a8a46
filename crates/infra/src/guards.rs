//! Breakers for the storefront's external dependencies
//!
//! Checkout and catalogue code asks [`DependencyGuards`] for the breaker of a
//! [`Dependency`] and routes every call to that dependency through it:
//!
//! ```
//! use storefront_infra::{Dependency, DependencyGuards, ResilienceSettings};
//!
//! let guards = DependencyGuards::from_settings(&ResilienceSettings::defaults())?;
//! let tax = guards.guard(Dependency::TaxAuthority)?;
//!
//! let rate = tax.call(|| Ok::<_, std::io::Error>(0.2_f64))?;
//! assert!((rate - 0.2).abs() < f64::EPSILON);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use storefront_common::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, Clock, SystemClock,
};

use crate::config::ResilienceSettings;
use crate::error::{InfraError, InfraResult};
use crate::observability::alerts;
use crate::observability::health::BreakerHealthReport;

/// External systems the storefront calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    /// Card authorisation and capture
    PaymentGateway,
    /// Sales tax quotes
    TaxAuthority,
    /// Product search
    SearchIndex,
}

impl Dependency {
    pub const ALL: [Self; 3] = [Self::PaymentGateway, Self::TaxAuthority, Self::SearchIndex];

    /// Stable breaker name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::PaymentGateway => "payment-gateway",
            Self::TaxAuthority => "tax-authority",
            Self::SearchIndex => "search-index",
        }
    }

    /// Built-in breaker tuning.
    ///
    /// Payments trip fast and probe with a single request; search tolerates
    /// noise and probes wide.
    pub fn default_config(self) -> CircuitBreakerConfig {
        let (failures, timeout_secs, successes, trials) = match self {
            Self::PaymentGateway => (3, 30, 2, 1),
            Self::TaxAuthority => (5, 60, 2, 2),
            Self::SearchIndex => (10, 15, 3, 5),
        };

        CircuitBreakerConfig::named(self.name())
            .with_failure_threshold(failures)
            .with_reset_timeout(Duration::from_secs(timeout_secs))
            .with_success_threshold(successes)
            .with_half_open_max_requests(trials)
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dependency {
    type Err = InfraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|dep| dep.name() == s)
            .ok_or_else(|| InfraError::UnknownDependency(s.to_string()))
    }
}

/// Registry of dependency breakers built from settings.
#[derive(Debug)]
pub struct DependencyGuards {
    registry: CircuitBreakerRegistry,
    settings: ResilienceSettings,
}

impl DependencyGuards {
    /// Build a registry on the wall clock and create every configured breaker.
    ///
    /// # Errors
    /// Fails if the settings are invalid.
    pub fn from_settings(settings: &ResilienceSettings) -> InfraResult<Self> {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    /// Same as [`from_settings`](Self::from_settings) with an explicit clock.
    pub fn with_clock(settings: &ResilienceSettings, clock: Arc<dyn Clock>) -> InfraResult<Self> {
        settings.validate()?;

        let registry =
            CircuitBreakerRegistry::with_shared_clock(clock).on_state_change(alerts::log_transition);
        for config in &settings.breakers {
            registry.get_or_create(config.clone())?;
        }

        tracing::info!(breakers = ?registry.names(), "Dependency guards ready");
        Ok(Self { registry, settings: settings.clone() })
    }

    /// Breaker for `dependency`, created with its defaults if the settings
    /// omitted it.
    pub fn guard(&self, dependency: Dependency) -> InfraResult<Arc<CircuitBreaker>> {
        if let Some(existing) = self.registry.get(dependency.name()) {
            return Ok(existing);
        }

        let config = self
            .settings
            .breaker(dependency.name())
            .cloned()
            .unwrap_or_else(|| dependency.default_config());
        Ok(self.registry.get_or_create(config)?)
    }

    /// Breaker registered under an arbitrary settings name.
    pub fn by_name(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.registry.get(name)
    }

    pub const fn registry(&self) -> &CircuitBreakerRegistry {
        &self.registry
    }

    /// Health report over every registered breaker.
    pub fn health(&self) -> BreakerHealthReport {
        BreakerHealthReport::from_registry(&self.registry)
    }
}
