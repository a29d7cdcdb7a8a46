//! Observability for dependency breakers
//!
//! - [`init_tracing`]: process-wide `tracing` subscriber honouring `RUST_LOG`
//! - [`alerts`]: transition listener for the guard registry
//! - [`health`]: serialisable per-breaker health report

pub mod alerts;
pub mod health;

use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{InfraError, InfraResult};

/// Output format for the global subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines for local development
    #[default]
    Pretty,
    /// One JSON object per event with flattened fields
    Json,
}

/// Install the global `tracing` subscriber.
///
/// The level comes from `RUST_LOG`, defaulting to `info`.
///
/// # Errors
/// Returns `InfraError::Tracing` if a global subscriber is already set.
pub fn init_tracing(format: LogFormat) -> InfraResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(true);

    let result = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
    };

    result.map_err(|e| InfraError::Tracing(e.to_string()))
}
