//! # Storefront Infrastructure
//!
//! Wires the generic breakers from `storefront-common` to the storefront's
//! real downstream dependencies.
//!
//! This crate contains:
//! - Settings loading (environment, TOML/JSON files, built-in defaults)
//! - Dependency guards: one named breaker per external dependency
//! - Observability: tracing setup, transition alerts, health reports

pub mod config;
pub mod error;
pub mod guards;
pub mod observability;

// Re-export commonly used items
pub use config::ResilienceSettings;
pub use error::{InfraError, InfraResult};
pub use guards::{Dependency, DependencyGuards};
pub use observability::health::BreakerHealthReport;
