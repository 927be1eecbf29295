//! Snapshot store port trait.
//!
//! Backends implement the storage primitives; interval and nearest-time
//! queries are provided on top of them so every backend answers them the
//! same way.

use crate::domain::error::PlexError;
use crate::domain::position::{PortfolioSnapshot, PositionRecord};
use crate::domain::timeline;
use crate::domain::transaction::{TransactionBatch, TransactionLeg};
use std::collections::BTreeSet;
use std::fmt;

/// Logical table inside the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Snapshots,
    Transactions,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Snapshots => "snapshots",
            Table::Transactions => "transactions",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rows read back from one logical table.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredRows {
    Positions(Vec<PositionRecord>),
    Legs(Vec<TransactionLeg>),
}

impl StoredRows {
    fn empty(table: Table) -> Self {
        match table {
            Table::Snapshots => StoredRows::Positions(Vec::new()),
            Table::Transactions => StoredRows::Legs(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            StoredRows::Positions(rows) => rows.len(),
            StoredRows::Legs(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Epoch-zero timestamp returned by [`SnapshotStore::last_updated`] for a
/// table that was never written for an address.
pub const NEVER_UPDATED: i64 = 0;

/// Rejects addresses that cannot be embedded in a table or file name.
pub fn validate_address(address: &str) -> Result<(), PlexError> {
    if address.is_empty()
        || !address
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(PlexError::InvalidAddress {
            address: address.to_string(),
        });
    }
    Ok(())
}

/// Append-only, timestamp-keyed store of snapshots and transaction legs.
///
/// Inserts never replace: writing again at an existing timestamp appends
/// rows. Concurrent inserts for the same address must be serialised by the
/// caller.
pub trait SnapshotStore {
    /// Distinct stored timestamps for the address, empty if nothing stored.
    fn all_timestamps(&self, address: &str, table: Table) -> Result<BTreeSet<i64>, PlexError>;

    fn insert_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<(), PlexError>;

    fn insert_transactions(&self, batch: &TransactionBatch) -> Result<(), PlexError>;

    /// Position rows with `start <= timestamp <= end`, ordered by timestamp.
    fn positions_between(
        &self,
        address: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<PositionRecord>, PlexError>;

    /// Transaction legs with `start <= timestamp <= end`, ordered by timestamp.
    fn transactions_between(
        &self,
        address: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<TransactionLeg>, PlexError>;

    /// Exact-timestamp lookup, concatenated across addresses. Addresses with
    /// no row at `timestamp` contribute nothing.
    fn query_at(&self, addresses: &[String], timestamp: i64) -> Result<Vec<PositionRecord>, PlexError> {
        self.query_between(addresses, timestamp, timestamp)
    }

    /// Inclusive range scan, concatenated across addresses.
    fn query_between(
        &self,
        addresses: &[String],
        start: i64,
        end: i64,
    ) -> Result<Vec<PositionRecord>, PlexError> {
        let mut rows = Vec::new();
        for address in addresses {
            rows.extend(self.positions_between(address, start, end)?);
        }
        Ok(rows)
    }

    fn transactions_at(
        &self,
        addresses: &[String],
        timestamp: i64,
    ) -> Result<Vec<TransactionLeg>, PlexError> {
        self.query_transactions_between(addresses, timestamp, timestamp)
    }

    fn query_transactions_between(
        &self,
        addresses: &[String],
        start: i64,
        end: i64,
    ) -> Result<Vec<TransactionLeg>, PlexError> {
        let mut legs = Vec::new();
        for address in addresses {
            legs.extend(self.transactions_between(address, start, end)?);
        }
        Ok(legs)
    }

    /// The snapshot of one address at an exact timestamp, empty if absent.
    fn snapshot_at(&self, address: &str, timestamp: i64) -> Result<PortfolioSnapshot, PlexError> {
        let positions = self.positions_between(address, timestamp, timestamp)?;
        Ok(PortfolioSnapshot::new(address, timestamp, positions))
    }

    /// Greatest stored timestamp `<= target`, else the oldest one.
    fn nearest_at_or_before(
        &self,
        address: &str,
        table: Table,
        target: i64,
    ) -> Result<Option<i64>, PlexError> {
        let timestamps = self.all_timestamps(address, table)?;
        Ok(timeline::nearest_at_or_before(&timestamps, target))
    }

    /// Least stored timestamp `>= target`, else the newest one.
    fn nearest_at_or_after(
        &self,
        address: &str,
        table: Table,
        target: i64,
    ) -> Result<Option<i64>, PlexError> {
        let timestamps = self.all_timestamps(address, table)?;
        Ok(timeline::nearest_at_or_after(&timestamps, target))
    }

    /// Newest stored timestamp of a table with the rows stored there, or
    /// [`NEVER_UPDATED`] with no rows.
    fn last_updated(&self, address: &str, table: Table) -> Result<(i64, StoredRows), PlexError> {
        let latest = self.all_timestamps(address, table)?.last().copied();
        let Some(timestamp) = latest else {
            return Ok((NEVER_UPDATED, StoredRows::empty(table)));
        };
        let rows = match table {
            Table::Snapshots => {
                StoredRows::Positions(self.positions_between(address, timestamp, timestamp)?)
            }
            Table::Transactions => {
                StoredRows::Legs(self.transactions_between(address, timestamp, timestamp)?)
            }
        };
        Ok((timestamp, rows))
    }

    /// Most recent snapshot, or [`NEVER_UPDATED`] with an empty snapshot.
    fn latest_snapshot(&self, address: &str) -> Result<(i64, PortfolioSnapshot), PlexError> {
        let (timestamp, rows) = self.last_updated(address, Table::Snapshots)?;
        let positions = match rows {
            StoredRows::Positions(positions) => positions,
            StoredRows::Legs(_) => Vec::new(),
        };
        Ok((timestamp, PortfolioSnapshot::new(address, timestamp, positions)))
    }

    /// True when the newest snapshot is older than `update_frequency_secs`
    /// relative to `now`, or when the address was never stored.
    fn is_stale(&self, address: &str, now: i64, update_frequency_secs: i64) -> Result<bool, PlexError> {
        match self.all_timestamps(address, Table::Snapshots)?.last() {
            Some(&latest) => Ok(latest < now - update_frequency_secs),
            None => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names() {
        assert_eq!(Table::Snapshots.to_string(), "snapshots");
        assert_eq!(Table::Transactions.name(), "transactions");
    }

    #[test]
    fn address_validation() {
        assert!(validate_address("0xAbC123").is_ok());
        assert!(validate_address("cold_wallet").is_ok());
        assert!(validate_address("").is_err());
        assert!(validate_address("0xabc; DROP TABLE x").is_err());
        assert!(validate_address("../etc").is_err());
    }
}
