//! Circuit breaker configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{ConfigError, ConfigResult};
use crate::utils::serde::duration_millis;

/// Static configuration for one breaker.
///
/// Serialises with the reset timeout in milliseconds so it can be read
/// straight out of TOML/JSON settings files:
///
/// ```toml
/// name = "payment-gateway"
/// failure_threshold = 3
/// reset_timeout_ms = 30000
/// success_threshold = 2
/// half_open_max_requests = 1
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Registry key; one breaker per logical dependency.
    pub name: String,
    /// Consecutive failures while CLOSED that open the breaker.
    pub failure_threshold: u32,
    /// Minimum time spent OPEN before a trial call is admitted.
    #[serde(rename = "reset_timeout_ms", with = "duration_millis")]
    pub reset_timeout: Duration,
    /// Consecutive trial successes while HALF_OPEN that close the breaker.
    pub success_threshold: u32,
    /// Maximum concurrently outstanding trial calls while HALF_OPEN.
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            success_threshold: 2,
            half_open_max_requests: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Default configuration under the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_half_open_max_requests(mut self, max_requests: u32) -> Self {
        self.half_open_max_requests = max_requests;
        self
    }

    /// Reset timeout in whole milliseconds, rounded up and saturating at
    /// `u64::MAX`.
    pub fn reset_timeout_millis(&self) -> u64 {
        let whole = self.reset_timeout.as_millis();
        let millis = if self.reset_timeout.subsec_nanos() % 1_000_000 == 0 { whole } else { whole + 1 };
        u64::try_from(millis).unwrap_or(u64::MAX)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid("name", "must not be empty"));
        }

        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold", "must be greater than 0"));
        }

        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("success_threshold", "must be greater than 0"));
        }

        if self.half_open_max_requests == 0 {
            return Err(ConfigError::invalid("half_open_max_requests", "must be greater than 0"));
        }

        Ok(())
    }
}
