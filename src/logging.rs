//! Tracing subscriber setup.
//!
//! Level resolution: `PLEX_LOG` env var, then the `level` argument (usually
//! `[logging] level`), then `info`. Dependencies are held at `warn`. Logs go
//! to stderr so report output on stdout stays clean.

use std::env;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV: &str = "PLEX_LOG";
pub const DEFAULT_LEVEL: &str = "info";

/// Filter directive for the given crate level.
pub fn filter_directive(level: &str) -> String {
    format!("warn,plex={}", level.trim().to_lowercase())
}

fn build_filter(level: Option<&str>) -> EnvFilter {
    let level = env::var(LOG_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| level.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_LEVEL.to_string());

    EnvFilter::try_new(filter_directive(&level))
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(DEFAULT_LEVEL)))
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init_logging(level: Option<&str>) {
    let _ = fmt()
        .with_env_filter(build_filter(level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
