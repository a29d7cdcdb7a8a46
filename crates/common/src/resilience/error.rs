//! Error types for breaker configuration and guarded execution

use std::time::Duration;

use thiserror::Error;

use super::CircuitState;
use crate::error::{CommonError, ErrorClassification, ErrorSeverity};

/// Invalid breaker configuration, raised at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration for '{field}': {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid { field, message: message.into() }
    }
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Admission refused by a breaker.
///
/// Returned by `CircuitBreaker::try_acquire`; converts into
/// [`ResilienceError::CircuitOpen`] so `?` works inside guarded code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circuit breaker '{name}' is {state}, rejecting calls")]
pub struct Rejected {
    pub name: String,
    /// OPEN, or HALF_OPEN with every trial slot taken.
    pub state: CircuitState,
    pub retry_after: Option<Duration>,
}

impl<E> From<Rejected> for ResilienceError<E> {
    fn from(rejected: Rejected) -> Self {
        Self::CircuitOpen {
            name: rejected.name,
            state: rejected.state,
            retry_after: rejected.retry_after,
        }
    }
}

/// Outcome of a guarded call that did not produce a value.
///
/// The two variants are deliberately distinct: `CircuitOpen` is produced by
/// the breaker itself and means the operation never ran, while `Operation`
/// carries the operation's own error exactly as it was returned.
#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    /// The breaker rejected the call without invoking the operation.
    #[error("Circuit breaker '{name}' is {state}, rejecting calls")]
    CircuitOpen {
        name: String,
        state: CircuitState,
        /// Remaining cooldown when the breaker was OPEN at rejection time.
        retry_after: Option<Duration>,
    },

    /// The wrapped operation failed; the error is passed through unchanged.
    #[error(transparent)]
    Operation(E),
}

/// Result type for guarded calls
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

impl<E> ResilienceError<E> {
    /// `true` when the breaker rejected the call.
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Borrow the downstream error, if this is one.
    pub const fn operation_error(&self) -> Option<&E> {
        match self {
            Self::Operation(error) => Some(error),
            Self::CircuitOpen { .. } => None,
        }
    }

    /// Take the downstream error, if this is one.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(error) => Some(error),
            Self::CircuitOpen { .. } => None,
        }
    }

    /// Map the downstream error type, leaving rejections untouched.
    pub fn map_operation<F, O>(self, f: F) -> ResilienceError<O>
    where
        F: FnOnce(E) -> O,
    {
        match self {
            Self::Operation(error) => ResilienceError::Operation(f(error)),
            Self::CircuitOpen { name, state, retry_after } => {
                ResilienceError::CircuitOpen { name, state, retry_after }
            }
        }
    }
}

impl<E> ErrorClassification for ResilienceError<E>
where
    E: ErrorClassification,
{
    fn is_retryable(&self) -> bool {
        match self {
            Self::CircuitOpen { .. } => true,
            Self::Operation(error) => error.is_retryable(),
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::CircuitOpen { .. } => ErrorSeverity::Warning,
            Self::Operation(error) => error.severity(),
        }
    }

    fn is_critical(&self) -> bool {
        match self {
            Self::CircuitOpen { .. } => false,
            Self::Operation(error) => error.is_critical(),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => *retry_after,
            Self::Operation(error) => error.retry_after(),
        }
    }
}

impl<E> From<ResilienceError<E>> for CommonError
where
    E: std::fmt::Display,
{
    fn from(error: ResilienceError<E>) -> Self {
        match error {
            ResilienceError::CircuitOpen { name, retry_after, .. } => {
                Self::CircuitBreakerOpen { service: name, retry_after }
            }
            ResilienceError::Operation(source) => {
                Self::backend("downstream", source.to_string(), false)
            }
        }
    }
}
