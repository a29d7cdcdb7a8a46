//! Configuration loader
//!
//! Loads breaker settings from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If `STOREFRONT_BREAKERS` is not set, falls back to loading from file
//! 3. Probes multiple paths for settings files
//! 4. If no file exists, uses the built-in defaults
//!
//! ## Environment Variables
//! - `STOREFRONT_BREAKERS`: Comma-separated breaker names
//! - `STOREFRONT_BREAKER_<NAME>_FAILURE_THRESHOLD`: Failures that open it
//! - `STOREFRONT_BREAKER_<NAME>_RESET_TIMEOUT_MS`: Cooldown in milliseconds
//! - `STOREFRONT_BREAKER_<NAME>_SUCCESS_THRESHOLD`: Trial successes that close
//!   it
//! - `STOREFRONT_BREAKER_<NAME>_HALF_OPEN_MAX_REQUESTS`: Concurrent trials
//!
//! `<NAME>` is the breaker name upper-cased with `-` replaced by `_`, so
//! `payment-gateway` reads `STOREFRONT_BREAKER_PAYMENT_GATEWAY_*`. Unset
//! per-breaker keys keep the breaker's default.
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./resilience.toml` or `./resilience.json`
//! 2. `./config/resilience.toml` or `./config/resilience.json`

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use storefront_common::resilience::CircuitBreakerConfig;

use super::settings::ResilienceSettings;
use crate::error::{InfraError, InfraResult};
use crate::guards::Dependency;

/// Names the breakers configured through the environment.
pub const BREAKERS_ENV: &str = "STOREFRONT_BREAKERS";

const BREAKER_ENV_PREFIX: &str = "STOREFRONT_BREAKER_";

/// Load settings with automatic fallback strategy
///
/// # Errors
/// Returns an error if the environment or the discovered file holds invalid
/// settings. A missing source is never an error.
pub fn load() -> InfraResult<ResilienceSettings> {
    match load_from_env() {
        Ok(settings) => {
            tracing::info!(breakers = settings.breakers.len(), "Settings loaded from environment");
            Ok(settings)
        }
        Err(InfraError::MissingEnv(key)) => {
            tracing::debug!(%key, "Environment settings absent, trying file");
            match probe_config_paths() {
                Some(path) => load_from_file(Some(path)),
                None => {
                    tracing::info!("No settings file found, using built-in defaults");
                    Ok(ResilienceSettings::defaults())
                }
            }
        }
        Err(e) => Err(e),
    }
}

/// Load settings from environment variables
///
/// # Errors
/// Returns `InfraError::MissingEnv` if `STOREFRONT_BREAKERS` is unset, and
/// `InfraError::InvalidEnv` for unparsable numbers.
pub fn load_from_env() -> InfraResult<ResilienceSettings> {
    load_from_lookup(|key| std::env::var(key).ok())
}

/// Core of [`load_from_env`] over an arbitrary variable source.
fn load_from_lookup<L>(lookup: L) -> InfraResult<ResilienceSettings>
where
    L: Fn(&str) -> Option<String>,
{
    let names = lookup(BREAKERS_ENV).ok_or_else(|| InfraError::MissingEnv(BREAKERS_ENV.into()))?;

    let mut breakers = Vec::new();
    for name in names.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        let mut config = Dependency::from_str(name)
            .map_or_else(|_| CircuitBreakerConfig::named(name), Dependency::default_config);

        let prefix = env_prefix(name);
        if let Some(value) = parse_env::<u32, _>(&lookup, &format!("{prefix}FAILURE_THRESHOLD"))? {
            config.failure_threshold = value;
        }
        if let Some(value) = parse_env::<u64, _>(&lookup, &format!("{prefix}RESET_TIMEOUT_MS"))? {
            config.reset_timeout = Duration::from_millis(value);
        }
        if let Some(value) = parse_env::<u32, _>(&lookup, &format!("{prefix}SUCCESS_THRESHOLD"))? {
            config.success_threshold = value;
        }
        if let Some(value) =
            parse_env::<u32, _>(&lookup, &format!("{prefix}HALF_OPEN_MAX_REQUESTS"))?
        {
            config.half_open_max_requests = value;
        }

        breakers.push(config);
    }

    let settings = ResilienceSettings { breakers };
    settings.validate()?;
    Ok(settings)
}

/// `payment-gateway` → `STOREFRONT_BREAKER_PAYMENT_GATEWAY_`
fn env_prefix(name: &str) -> String {
    let key: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{BREAKER_ENV_PREFIX}{key}_")
}

fn parse_env<T, L>(lookup: &L, key: &str) -> InfraResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    L: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| InfraError::InvalidEnv {
                key: key.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
}

/// Load settings from a file
///
/// If `path` is `None`, probes the standard locations. Supports both JSON and
/// TOML formats (detected by file extension).
///
/// # Errors
/// Returns an error if:
/// - File not found (when path is specified)
/// - No settings file found (when path is `None`)
/// - File format is invalid
/// - A breaker config is invalid or a name repeats
pub fn load_from_file(path: Option<PathBuf>) -> InfraResult<ResilienceSettings> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(InfraError::FileNotFound(p));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| InfraError::FileNotFound("resilience.toml".into()))?,
    };

    tracing::info!(path = %config_path.display(), "Loading settings from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|source| InfraError::Io { path: config_path.clone(), source })?;

    let settings = parse_settings(&contents, &config_path)?;
    settings.validate()?;
    Ok(settings)
}

/// Parse settings, detecting the format from the file extension.
fn parse_settings(contents: &str, path: &Path) -> InfraResult<ResilienceSettings> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| InfraError::Parse { format: "TOML", message: e.to_string() }),
        "json" => serde_json::from_str(contents)
            .map_err(|e| InfraError::Parse { format: "JSON", message: e.to_string() }),
        other => Err(InfraError::UnsupportedFormat(other.to_string())),
    }
}

/// Probe the standard locations under the current working directory.
pub fn probe_config_paths() -> Option<PathBuf> {
    std::env::current_dir().ok().and_then(|cwd| probe_config_paths_in(&cwd))
}

/// Probe the standard locations under `base`.
pub fn probe_config_paths_in(base: &Path) -> Option<PathBuf> {
    [
        base.join("resilience.toml"),
        base.join("resilience.json"),
        base.join("config").join("resilience.toml"),
        base.join("config").join("resilience.json"),
    ]
    .into_iter()
    .find(|path| path.exists())
}
