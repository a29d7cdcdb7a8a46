//! Point-in-time breaker counters

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::CircuitState;

/// Immutable snapshot of a breaker's counters.
///
/// Taken under the breaker's lock, so every field reflects the same instant.
/// `successes`/`failures` count completed executions only; rejected attempts
/// are tracked separately in `rejections`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub successes: u64,
    pub failures: u64,
    pub open_count: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub half_open_in_flight: u32,
    pub rejections: u64,
    /// Epoch milliseconds of the most recent entry into OPEN.
    pub opened_at_millis: Option<u64>,
}

impl CircuitBreakerMetrics {
    /// Completed (non-rejected) executions.
    pub const fn completed_calls(&self) -> u64 {
        self.successes.saturating_add(self.failures)
    }

    /// Fraction of completed executions that failed, `0.0` when none ran.
    #[allow(clippy::cast_precision_loss)]
    pub fn failure_rate(&self) -> f64 {
        match self.completed_calls() {
            0 => 0.0,
            total => self.failures as f64 / total as f64,
        }
    }

    /// `opened_at_millis` as a UTC timestamp.
    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at_millis
            .and_then(|millis| i64::try_from(millis).ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis)
    }
}
