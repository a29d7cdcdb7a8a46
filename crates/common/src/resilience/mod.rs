//! Circuit breakers for downstream dependencies
//!
//! This module provides the breaker used in front of every external call the
//! storefront makes (payment gateway, tax authority, search index):
//! - **[`CircuitBreaker`]**: CLOSED / OPEN / HALF_OPEN state machine that stops
//!   calling a failing dependency for a cooldown, then probes recovery with a
//!   bounded number of trial calls
//! - **[`CircuitBreakerRegistry`]**: one shared breaker per dependency name
//! - **[`Clock`]**: injectable time source; [`MockClock`] makes cooldowns
//!   deterministic in tests
//!
//! ## Errors
//!
//! Guarded calls return [`ResilienceResult`]. A rejection by the breaker is
//! [`ResilienceError::CircuitOpen`]; the operation's own error comes back
//! untouched in [`ResilienceError::Operation`], so callers can always tell
//! "dependency unavailable" apart from "dependency said no".
//!
//! ## Example
//!
//! ```
//! use storefront_common::resilience::{CircuitBreakerConfig, CircuitBreakerRegistry};
//!
//! let registry = CircuitBreakerRegistry::new();
//! let gateway = registry.get_or_create(
//!     CircuitBreakerConfig::named("payment-gateway").with_failure_threshold(3),
//! )?;
//!
//! let charge_id = gateway.call(|| Ok::<_, std::io::Error>("ch_123"))?;
//! assert_eq!(charge_id, "ch_123");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod registry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerBuilder, CircuitState, Permit, StateChangeListener,
    StateTransition, TransitionReason,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::CircuitBreakerConfig;
pub use error::{ConfigError, ConfigResult, Rejected, ResilienceError, ResilienceResult};
pub use metrics::CircuitBreakerMetrics;
pub use registry::CircuitBreakerRegistry;
