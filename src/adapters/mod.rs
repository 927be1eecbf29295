//! Concrete adapter implementations for ports.

#[cfg(feature = "postgres")]
pub mod postgres_adapter;
#[cfg(feature = "sqlite")]
pub mod sqlite_adapter;
pub mod csv_adapter;
pub mod file_config_adapter;
pub mod json_file_adapter;

use crate::domain::config_validation::store_backend;
use crate::domain::error::PlexError;
use crate::ports::config_port::ConfigPort;
use crate::ports::snapshot_store::SnapshotStore;
use tracing::info;

/// Opens the store selected by `[store] backend`.
pub fn open_store(config: &dyn ConfigPort) -> Result<Box<dyn SnapshotStore>, PlexError> {
    let backend = store_backend(config)?;
    info!(%backend, "opening snapshot store");
    match backend.as_str() {
        "json" => Ok(Box::new(json_file_adapter::JsonFileAdapter::from_config(config)?)),
        #[cfg(feature = "sqlite")]
        "sqlite" => Ok(Box::new(sqlite_adapter::SqliteAdapter::from_config(config)?)),
        #[cfg(feature = "postgres")]
        "postgres" => Ok(Box::new(postgres_adapter::PostgresAdapter::from_config(config)?)),
        other => Err(PlexError::ConfigInvalid {
            section: "store".into(),
            key: "backend".into(),
            reason: format!("backend '{other}' is not enabled in this build"),
        }),
    }
}
