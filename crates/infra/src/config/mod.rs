//! Resilience settings and how they are loaded
//!
//! [`ResilienceSettings`] lists one breaker config per downstream dependency.
//! [`loader`] fills it from the environment, a settings file, or built-in
//! defaults.

pub mod loader;
pub mod settings;

// Re-export commonly used items
pub use loader::{load, load_from_env, load_from_file, probe_config_paths};
pub use settings::ResilienceSettings;
