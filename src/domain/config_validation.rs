//! Configuration validation.
//!
//! Validates all config fields before a store is opened or an attribution
//! runs.

use crate::domain::error::PlexError;
use crate::domain::explain::{ExplainSettings, DEFAULT_UPDATE_FREQUENCY_SECS};
use crate::domain::attribution::DEFAULT_TOLERANCE;
use crate::ports::config_port::ConfigPort;
use crate::ports::snapshot_store::validate_address;

pub const BACKENDS: [&str; 3] = ["sqlite", "json", "postgres"];

pub fn validate_config(config: &dyn ConfigPort) -> Result<(), PlexError> {
    validate_store_config(config)?;
    validate_explain_config(config)?;
    validate_portfolio_config(config)?;
    Ok(())
}

pub fn validate_store_config(config: &dyn ConfigPort) -> Result<(), PlexError> {
    let backend = store_backend(config)?;
    match backend.as_str() {
        "sqlite" => {
            require(config, "store", "path")?;
            if config.get_int("store", "pool_size", 4) < 1 {
                return Err(PlexError::ConfigInvalid {
                    section: "store".to_string(),
                    key: "pool_size".to_string(),
                    reason: "pool_size must be at least 1".to_string(),
                });
            }
        }
        "json" => require(config, "store", "data_dir")?,
        "postgres" => require(config, "store", "connection_string")?,
        _ => unknown_backend(&backend)?,
    }
    Ok(())
}

pub fn validate_explain_config(config: &dyn ConfigPort) -> Result<(), PlexError> {
    let tolerance = config.get_double("explain", "tolerance", DEFAULT_TOLERANCE);
    if !tolerance.is_finite() || tolerance <= 0.0 {
        return Err(PlexError::ConfigInvalid {
            section: "explain".to_string(),
            key: "tolerance".to_string(),
            reason: "tolerance must be a positive number".to_string(),
        });
    }
    Ok(())
}

pub fn validate_portfolio_config(config: &dyn ConfigPort) -> Result<(), PlexError> {
    if let Some(raw) = config.get_string("portfolio", "addresses") {
        parse_addresses(&raw)?;
    }
    if config.get_int("portfolio", "update_frequency", 60) < 0 {
        return Err(PlexError::ConfigInvalid {
            section: "portfolio".to_string(),
            key: "update_frequency".to_string(),
            reason: "update_frequency must be non-negative".to_string(),
        });
    }
    Ok(())
}

/// Lowercased `[store] backend`, defaulting to sqlite.
pub fn store_backend(config: &dyn ConfigPort) -> Result<String, PlexError> {
    let backend = config
        .get_string("store", "backend")
        .map(|b| b.trim().to_lowercase())
        .unwrap_or_else(|| "sqlite".to_string());
    if !BACKENDS.contains(&backend.as_str()) {
        unknown_backend(&backend)?;
    }
    Ok(backend)
}

fn unknown_backend(backend: &str) -> Result<(), PlexError> {
    Err(PlexError::ConfigInvalid {
        section: "store".to_string(),
        key: "backend".to_string(),
        reason: format!(
            "unknown backend '{}', expected one of: {}",
            backend,
            BACKENDS.join(", ")
        ),
    })
}

fn require(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), PlexError> {
    match config.get_string(section, key) {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err(PlexError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }),
    }
}

/// Parses a comma-separated address list, trimming blanks.
pub fn parse_addresses(raw: &str) -> Result<Vec<String>, PlexError> {
    let addresses: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    for address in &addresses {
        validate_address(address)?;
    }
    Ok(addresses)
}

pub fn build_settings(config: &dyn ConfigPort) -> ExplainSettings {
    ExplainSettings {
        tolerance: config.get_double("explain", "tolerance", DEFAULT_TOLERANCE),
        update_frequency_secs: config.get_int(
            "portfolio",
            "update_frequency",
            DEFAULT_UPDATE_FREQUENCY_SECS / 60,
        ) * 60,
    }
}
