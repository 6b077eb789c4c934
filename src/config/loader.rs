//! Configuration loading
//!
//! Loads configuration from a JSON file, applies `DBROUTER_*` environment
//! overrides, and validates before anything touches a socket.

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Load configuration from a JSON file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents)
        .map_err(|e| ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}")))?;

    config.validate()?;

    info!("Configuration loaded: {} bind(s)", config.binds.len());

    Ok(config)
}

/// Load configuration from a JSON string.
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides.
///
/// Environment variables:
/// - `DBROUTER_LOG_LEVEL`: Override log level
/// - `DBROUTER_MAX_CONNECTIONS`: Override the process-wide connection cap
///
/// # Errors
///
/// Returns `ConfigError` if loading, parsing, or an override value fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;

    if let Ok(level) = std::env::var("DBROUTER_LOG_LEVEL") {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    if let Ok(max) = std::env::var("DBROUTER_MAX_CONNECTIONS") {
        config.connection.max_connections =
            max.parse().map_err(|_| ConfigError::EnvError {
                name: "DBROUTER_MAX_CONNECTIONS".into(),
                reason: format!("Invalid number: {max}"),
            })?;
        debug!(
            "Max connections overridden to {}",
            config.connection.max_connections
        );
    }

    config.validate()?;

    Ok(config)
}

/// Write a default configuration file at the given path.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}
