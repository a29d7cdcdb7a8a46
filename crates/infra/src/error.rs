//! Infrastructure error types

use std::path::PathBuf;

use storefront_common::resilience::ConfigError;
use storefront_common::CommonError;
use thiserror::Error;

/// Errors raised while loading settings or wiring dependency guards.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidEnv { key: String, message: String },

    #[error("Config file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid {format} format: {message}")]
    Parse { format: &'static str, message: String },

    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("Duplicate breaker name in settings: {0}")]
    DuplicateBreaker(String),

    #[error("Unknown dependency: {0}")]
    UnknownDependency(String),

    #[error(transparent)]
    Breaker(#[from] ConfigError),

    #[error("Failed to serialize health report: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to initialise tracing: {0}")]
    Tracing(String),
}

/// Result alias for infrastructure operations
pub type InfraResult<T> = Result<T, InfraError>;

impl From<InfraError> for CommonError {
    fn from(err: InfraError) -> Self {
        match err {
            InfraError::Breaker(inner) => inner.into(),
            InfraError::InvalidEnv { key, message } => Self::config_field(key, message),
            InfraError::Serialization(inner) => inner.into(),
            InfraError::UnknownDependency(name) => Self::not_found_with_id("Dependency", name),
            other => Self::config(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use storefront_common::ErrorClassification;

    use super::*;

    #[test]
    fn test_display_messages() {
        let err = InfraError::InvalidEnv {
            key: "STOREFRONT_BREAKER_TAX_AUTHORITY_FAILURE_THRESHOLD".to_string(),
            message: "invalid digit found in string".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid value for STOREFRONT_BREAKER_TAX_AUTHORITY_FAILURE_THRESHOLD: invalid digit \
             found in string"
        );

        let err = InfraError::FileNotFound(PathBuf::from("/etc/storefront/resilience.toml"));
        assert_eq!(err.to_string(), "Config file not found: /etc/storefront/resilience.toml");
    }

    #[test]
    fn test_into_common_error() {
        let common: CommonError = InfraError::DuplicateBreaker("search-index".to_string()).into();
        assert!(matches!(common, CommonError::Config { field: None, .. }));
        assert!(!common.is_retryable());

        let common: CommonError = InfraError::UnknownDependency("shipping".to_string()).into();
        assert_eq!(common.to_string(), "Dependency not found: 'shipping'");
    }
}
