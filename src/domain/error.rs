//! Domain error types.

use std::collections::BTreeSet;

/// Top-level error type for plex.
#[derive(Debug, thiserror::Error)]
pub enum PlexError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("missing underlying category for assets: {}", join_assets(.assets))]
    MissingCategory { assets: BTreeSet<String> },

    #[error(
        "attribution does not reconcile: residual {residual:.6} exceeds tolerance {tolerance} (worst position: {worst})"
    )]
    Reconciliation {
        residual: f64,
        tolerance: f64,
        worst: String,
    },

    #[error("invalid address {address:?}: only ASCII letters, digits and '_' are allowed")]
    InvalidAddress { address: String },

    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    #[error("import error: {reason}")]
    Import { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn join_assets(assets: &BTreeSet<String>) -> String {
    assets.iter().cloned().collect::<Vec<_>>().join(", ")
}

impl From<serde_json::Error> for PlexError {
    fn from(err: serde_json::Error) -> Self {
        PlexError::Serialization {
            reason: err.to_string(),
        }
    }
}

impl From<csv::Error> for PlexError {
    fn from(err: csv::Error) -> Self {
        PlexError::Serialization {
            reason: err.to_string(),
        }
    }
}

impl From<&PlexError> for std::process::ExitCode {
    fn from(err: &PlexError) -> Self {
        let code: u8 = match err {
            PlexError::Io(_) => 1,
            PlexError::ConfigParse { .. }
            | PlexError::ConfigMissing { .. }
            | PlexError::ConfigInvalid { .. }
            | PlexError::InvalidAddress { .. } => 2,
            PlexError::Database { .. } | PlexError::DatabaseQuery { .. } => 3,
            PlexError::MissingCategory { .. } => 4,
            PlexError::Reconciliation { .. } => 5,
            PlexError::Serialization { .. } | PlexError::Import { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}
