//! Transition alerts
//!
//! Registered as the guard registry's listener. Opening is an alert-worthy
//! event (`warn!`); every other transition is informational.

use storefront_common::resilience::{CircuitState, StateTransition};

/// Target for alert events, for routing in log pipelines.
pub const ALERT_TARGET: &str = "storefront::alerts";

/// Emit one `tracing` event for a breaker transition.
pub fn log_transition(transition: &StateTransition) {
    let at = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(
        i64::try_from(transition.at_millis).unwrap_or(i64::MAX),
    )
    .map(|ts| ts.to_rfc3339());

    match transition.to {
        CircuitState::Open => tracing::warn!(
            target: ALERT_TARGET,
            breaker = %transition.name,
            from = %transition.from,
            to = %transition.to,
            reason = %transition.reason,
            at = ?at,
            "dependency unavailable, circuit opened"
        ),
        CircuitState::HalfOpen => tracing::info!(
            target: ALERT_TARGET,
            breaker = %transition.name,
            from = %transition.from,
            to = %transition.to,
            reason = %transition.reason,
            at = ?at,
            "probing dependency recovery"
        ),
        CircuitState::Closed => tracing::info!(
            target: ALERT_TARGET,
            breaker = %transition.name,
            from = %transition.from,
            to = %transition.to,
            reason = %transition.reason,
            at = ?at,
            "dependency recovered, circuit closed"
        ),
    }
}
