//! INI configuration for plex, read from a file or an inline string.
//!
//! Typed getters fall back to their default when a key is absent. A key that
//! is present but does not parse also falls back, with a warning naming the
//! source so a typo in `[explain] tolerance` does not pass silently.

use crate::domain::error::PlexError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;
use tracing::warn;

/// Source name reported for configs built with [`FileConfigAdapter::from_string`].
pub const INLINE_SOURCE: &str = "<inline>";

pub struct FileConfigAdapter {
    config: Ini,
    source: String,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PlexError> {
        let source = path.as_ref().display().to_string();
        let mut config = Ini::new();
        config
            .load(path)
            .map_err(|reason| PlexError::ConfigParse {
                file: source.clone(),
                reason,
            })?;
        Ok(Self { config, source })
    }

    pub fn from_string(content: &str) -> Result<Self, PlexError> {
        let mut config = Ini::new();
        config
            .read(content.to_string())
            .map_err(|reason| PlexError::ConfigParse {
                file: INLINE_SOURCE.to_string(),
                reason,
            })?;
        Ok(Self {
            config,
            source: INLINE_SOURCE.to_string(),
        })
    }

    /// Path the config was loaded from, or [`INLINE_SOURCE`].
    pub fn source(&self) -> &str {
        &self.source
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.trim().to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        }
    }

    /// Parses a present value, warning and returning `None` when it is malformed.
    fn typed<T>(&self, section: &str, key: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let raw = self.config.get(section, key)?;
        let parsed = parse(raw.trim());
        if parsed.is_none() {
            warn!(
                source = %self.source,
                section,
                key,
                value = %raw,
                "ignoring malformed config value"
            );
        }
        parsed
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config.get(section, key)
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.typed(section, key, |v| v.parse().ok())
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.typed(section, key, |v| v.parse::<f64>().ok().filter(|x| x.is_finite()))
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.typed(section, key, Self::parse_bool)
            .unwrap_or(default)
    }

    fn section_entries(&self, section: &str) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .config
            .get_map_ref()
            .get(&section.to_lowercase())
            .map(|values| {
                values
                    .iter()
                    .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
                    .collect()
            })
            .unwrap_or_default();
        entries.sort();
        entries
    }
}
