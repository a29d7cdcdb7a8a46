//! Breaker health for diagnostics endpoints
//!
//! A breaker is healthy while CLOSED, degraded while HALF_OPEN (probing a
//! recovering dependency) and unhealthy while OPEN.
//!
//! # Example
//! ```
//! use storefront_common::resilience::{CircuitBreakerConfig, CircuitBreakerRegistry};
//! use storefront_infra::observability::health::{BreakerHealthReport, HealthState};
//!
//! let registry = CircuitBreakerRegistry::new();
//! registry.get_or_create(CircuitBreakerConfig::named("search-index"))?;
//! registry.get_or_create(CircuitBreakerConfig::named("payment-gateway"))?.trip("outage");
//!
//! let report = BreakerHealthReport::from_registry(&registry);
//! assert!(!report.is_healthy);
//! assert_eq!(report.component("payment-gateway").map(|c| c.status), Some(HealthState::Unhealthy));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use storefront_common::resilience::{CircuitBreakerMetrics, CircuitBreakerRegistry, CircuitState};

use crate::error::InfraResult;

/// Health of a single breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl From<CircuitState> for HealthState {
    fn from(state: CircuitState) -> Self {
        match state {
            CircuitState::Closed => Self::Healthy,
            CircuitState::HalfOpen => Self::Degraded,
            CircuitState::Open => Self::Unhealthy,
        }
    }
}

/// Health status of an individual breaker
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    /// Breaker name (e.g., "payment-gateway")
    pub name: String,

    pub status: HealthState,

    /// Optional message describing health state
    pub message: Option<String>,

    /// Counters backing the status
    pub metrics: CircuitBreakerMetrics,
}

impl ComponentHealth {
    pub fn from_metrics(metrics: CircuitBreakerMetrics) -> Self {
        let status = HealthState::from(metrics.state);
        let message = match metrics.state {
            CircuitState::Closed => None,
            CircuitState::HalfOpen => Some(format!(
                "probing recovery, {} trial(s) in flight",
                metrics.half_open_in_flight
            )),
            CircuitState::Open => Some(match metrics.opened_at() {
                Some(opened_at) => format!("circuit open since {}", opened_at.to_rfc3339()),
                None => "circuit open".to_string(),
            }),
        };

        Self { name: metrics.name.clone(), status, message, metrics }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

/// Overall breaker health
#[derive(Debug, Clone, Serialize)]
pub struct BreakerHealthReport {
    /// `false` if any breaker is OPEN
    pub is_healthy: bool,

    /// Health score from 0.0 to 1.0
    ///
    /// Calculated as: (healthy_components / total_components); 1.0 when empty
    pub score: f64,

    /// Per-breaker health, sorted by name
    pub components: Vec<ComponentHealth>,

    pub generated_at: DateTime<Utc>,
}

impl BreakerHealthReport {
    pub fn from_registry(registry: &CircuitBreakerRegistry) -> Self {
        Self::from_metrics(registry.get_all_metrics())
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn from_metrics(metrics: BTreeMap<String, CircuitBreakerMetrics>) -> Self {
        let components: Vec<ComponentHealth> =
            metrics.into_values().map(ComponentHealth::from_metrics).collect();

        let is_healthy = components.iter().all(|c| c.status != HealthState::Unhealthy);
        let score = if components.is_empty() {
            1.0
        } else {
            let healthy = components.iter().filter(|c| c.is_healthy()).count();
            healthy as f64 / components.len() as f64
        };

        Self { is_healthy, score, components, generated_at: Utc::now() }
    }

    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.iter().find(|c| c.name == name)
    }

    /// Components currently not healthy.
    pub fn degraded_or_unhealthy(&self) -> impl Iterator<Item = &ComponentHealth> {
        self.components.iter().filter(|c| !c.is_healthy())
    }

    pub fn to_json(&self) -> InfraResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> InfraResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
