//! Breaker settings for every guarded dependency

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use storefront_common::resilience::CircuitBreakerConfig;

use crate::error::{InfraError, InfraResult};
use crate::guards::Dependency;

/// Breaker configuration for each downstream dependency.
///
/// ```toml
/// [[breakers]]
/// name = "payment-gateway"
/// failure_threshold = 3
/// reset_timeout_ms = 30000
/// success_threshold = 2
/// half_open_max_requests = 1
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResilienceSettings {
    #[serde(default)]
    pub breakers: Vec<CircuitBreakerConfig>,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self::defaults()
    }
}

impl ResilienceSettings {
    /// Built-in settings: one breaker per known [`Dependency`].
    pub fn defaults() -> Self {
        Self { breakers: Dependency::ALL.iter().map(|dep| dep.default_config()).collect() }
    }

    /// Look up a breaker config by name.
    pub fn breaker(&self, name: &str) -> Option<&CircuitBreakerConfig> {
        self.breakers.iter().find(|config| config.name == name)
    }

    /// Every breaker config must be valid and every name unique.
    pub fn validate(&self) -> InfraResult<()> {
        let mut seen = HashSet::new();
        for config in &self.breakers {
            config.validate()?;
            if !seen.insert(config.name.as_str()) {
                return Err(InfraError::DuplicateBreaker(config.name.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    /// Validates the built-in defaults for each dependency.
    ///
    /// Assertions:
    /// - Confirms payment-gateway trips fastest with a single trial slot.
    /// - Confirms search-index tolerates the most failures.
    #[test]
    fn test_defaults() {
        let settings = ResilienceSettings::defaults();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.breakers.len(), 3);

        let payments = settings.breaker("payment-gateway").expect("payments configured");
        assert_eq!(payments.failure_threshold, 3);
        assert_eq!(payments.reset_timeout, Duration::from_secs(30));
        assert_eq!(payments.half_open_max_requests, 1);

        let tax = settings.breaker("tax-authority").expect("tax configured");
        assert_eq!(tax.failure_threshold, 5);
        assert_eq!(tax.reset_timeout, Duration::from_secs(60));

        let search = settings.breaker("search-index").expect("search configured");
        assert_eq!(search.failure_threshold, 10);
        assert_eq!(search.success_threshold, 3);
        assert_eq!(search.half_open_max_requests, 5);
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let settings = ResilienceSettings {
            breakers: vec![
                CircuitBreakerConfig::named("search-index"),
                CircuitBreakerConfig::named("search-index"),
            ],
        };
        assert!(matches!(settings.validate(), Err(InfraError::DuplicateBreaker(name)) if name == "search-index"));
    }

    #[test]
    fn test_validate_rejects_invalid_breaker() {
        let settings = ResilienceSettings {
            breakers: vec![CircuitBreakerConfig::named("tax-authority").with_success_threshold(0)],
        };
        assert!(matches!(settings.validate(), Err(InfraError::Breaker(_))));
    }

    #[test]
    fn test_parse_toml_with_partial_breaker() {
        let settings: ResilienceSettings = toml::from_str(
            r#"
            [[breakers]]
            name = "payment-gateway"
            failure_threshold = 4
            "#,
        )
        .expect("valid toml");

        let payments = settings.breaker("payment-gateway").expect("configured");
        assert_eq!(payments.failure_threshold, 4);
        assert_eq!(payments.reset_timeout, Duration::from_secs(60));
    }
}
