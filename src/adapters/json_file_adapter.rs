//! Snapshot store over a directory of JSON files.
//!
//! Layout:
//! - `snapshot_{address}_{timestamp}.json` holds one [`PortfolioSnapshot`].
//! - `transactions_{address}_{start}_{end}.json` holds one [`TransactionBatch`].
//!
//! Writing an existing snapshot or batch file appends to it.

use crate::domain::error::PlexError;
use crate::domain::position::{PortfolioSnapshot, PositionRecord};
use crate::domain::transaction::{TransactionBatch, TransactionLeg};
use crate::ports::config_port::ConfigPort;
use crate::ports::snapshot_store::{validate_address, SnapshotStore, Table};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const SNAPSHOT_PREFIX: &str = "snapshot";
const TRANSACTIONS_PREFIX: &str = "transactions";

pub struct JsonFileAdapter {
    data_dir: PathBuf,
}

impl JsonFileAdapter {
    /// Opens the directory, creating it if needed.
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self, PlexError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, PlexError> {
        let data_dir = config
            .get_string("store", "data_dir")
            .ok_or_else(|| PlexError::ConfigMissing {
                section: "store".into(),
                key: "data_dir".into(),
            })?;
        Self::new(data_dir)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn snapshot_path(&self, address: &str, timestamp: i64) -> PathBuf {
        self.data_dir
            .join(format!("{SNAPSHOT_PREFIX}_{address}_{timestamp}.json"))
    }

    fn batch_path(&self, address: &str, start: i64, end: i64) -> PathBuf {
        self.data_dir
            .join(format!("{TRANSACTIONS_PREFIX}_{address}_{start}_{end}.json"))
    }

    /// File stems `{prefix}_{address}_{rest}` of the address, returned as
    /// `(path, rest)`.
    fn files_for(&self, prefix: &str, address: &str) -> Result<Vec<(PathBuf, String)>, PlexError> {
        validate_address(address)?;
        let head = format!("{prefix}_{address}_");
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(rest) = stem.strip_prefix(&head) {
                let rest = rest.to_string();
                out.push((path, rest));
            }
        }
        Ok(out)
    }

    fn snapshot_files(&self, address: &str) -> Result<Vec<(i64, PathBuf)>, PlexError> {
        let mut files: Vec<(i64, PathBuf)> = self
            .files_for(SNAPSHOT_PREFIX, address)?
            .into_iter()
            .filter_map(|(path, rest)| rest.parse::<i64>().ok().map(|ts| (ts, path)))
            .collect();
        files.sort();
        Ok(files)
    }

    fn batch_files(&self, address: &str) -> Result<Vec<PathBuf>, PlexError> {
        let mut files: Vec<PathBuf> = self
            .files_for(TRANSACTIONS_PREFIX, address)?
            .into_iter()
            .filter(|(_, rest)| {
                rest.split_once('_').is_some_and(|(start, end)| {
                    start.parse::<i64>().is_ok() && end.parse::<i64>().is_ok()
                })
            })
            .map(|(path, _)| path)
            .collect();
        files.sort();
        Ok(files)
    }

    fn read_batches(&self, address: &str) -> Result<Vec<TransactionBatch>, PlexError> {
        self.batch_files(address)?
            .iter()
            .map(|path| read_json(path))
            .collect()
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PlexError> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| PlexError::Serialization {
        reason: format!("{}: {}", path.display(), e),
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PlexError> {
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content)?;
    Ok(())
}

impl SnapshotStore for JsonFileAdapter {
    fn all_timestamps(&self, address: &str, table: Table) -> Result<BTreeSet<i64>, PlexError> {
        match table {
            Table::Snapshots => Ok(self
                .snapshot_files(address)?
                .into_iter()
                .map(|(ts, _)| ts)
                .collect()),
            Table::Transactions => Ok(self
                .read_batches(address)?
                .into_iter()
                .flat_map(|b| b.legs.into_iter().map(|leg| leg.timestamp))
                .collect()),
        }
    }

    fn insert_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<(), PlexError> {
        validate_address(&snapshot.address)?;
        let path = self.snapshot_path(&snapshot.address, snapshot.timestamp);
        let merged = if path.exists() {
            let mut existing: PortfolioSnapshot = read_json(&path)?;
            existing.positions.extend(snapshot.positions.iter().cloned());
            existing
        } else {
            snapshot.clone()
        };
        write_json(&path, &merged)?;
        debug!(path = %path.display(), rows = merged.positions.len(), "wrote snapshot file");
        Ok(())
    }

    fn insert_transactions(&self, batch: &TransactionBatch) -> Result<(), PlexError> {
        validate_address(&batch.address)?;
        let path = self.batch_path(&batch.address, batch.start_timestamp, batch.end_timestamp);
        let merged = if path.exists() {
            let mut existing: TransactionBatch = read_json(&path)?;
            existing.legs.extend(batch.legs.iter().cloned());
            existing
        } else {
            batch.clone()
        };
        write_json(&path, &merged)?;
        debug!(path = %path.display(), legs = merged.legs.len(), "wrote transaction file");
        Ok(())
    }

    fn positions_between(
        &self,
        address: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<PositionRecord>, PlexError> {
        let mut rows = Vec::new();
        for (ts, path) in self.snapshot_files(address)? {
            if ts < start || ts > end {
                continue;
            }
            let snapshot: PortfolioSnapshot = read_json(&path)?;
            rows.extend(snapshot.positions.into_iter().map(|mut p| {
                p.address = address.to_string();
                p.timestamp = ts;
                p
            }));
        }
        Ok(rows)
    }

    fn transactions_between(
        &self,
        address: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<TransactionLeg>, PlexError> {
        let mut legs: Vec<TransactionLeg> = self
            .read_batches(address)?
            .into_iter()
            .flat_map(|b| b.legs)
            .filter(|leg| leg.timestamp >= start && leg.timestamp <= end)
            .collect();
        legs.sort_by_key(|leg| leg.timestamp);
        Ok(legs)
    }
}
