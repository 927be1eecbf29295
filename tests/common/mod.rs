#![allow(dead_code)]

use plex::domain::category::CategoryMap;
use plex::domain::error::PlexError;
use plex::domain::explain::{ExplainSettings, PlexContext};
use plex::domain::position::{PortfolioSnapshot, PositionKey, PositionRecord};
use plex::domain::transaction::{TransactionBatch, TransactionLeg};
use plex::ports::snapshot_store::{SnapshotStore, Table};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// In-memory store keyed by address then timestamp.
#[derive(Default)]
pub struct MockStore {
    pub snapshots: RefCell<BTreeMap<String, BTreeMap<i64, Vec<PositionRecord>>>>,
    pub transactions: RefCell<BTreeMap<String, Vec<TransactionLeg>>>,
    pub errors: BTreeMap<String, String>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(self, snapshot: PortfolioSnapshot) -> Self {
        self.insert_snapshot(&snapshot).unwrap();
        self
    }

    pub fn with_transactions(self, batch: TransactionBatch) -> Self {
        self.insert_transactions(&batch).unwrap();
        self
    }

    pub fn with_error(mut self, address: &str, reason: &str) -> Self {
        self.errors.insert(address.to_string(), reason.to_string());
        self
    }

    fn check(&self, address: &str) -> Result<(), PlexError> {
        match self.errors.get(address) {
            Some(reason) => Err(PlexError::Database {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl SnapshotStore for MockStore {
    fn all_timestamps(&self, address: &str, table: Table) -> Result<BTreeSet<i64>, PlexError> {
        self.check(address)?;
        Ok(match table {
            Table::Snapshots => self
                .snapshots
                .borrow()
                .get(address)
                .map(|by_ts| by_ts.keys().copied().collect())
                .unwrap_or_default(),
            Table::Transactions => self
                .transactions
                .borrow()
                .get(address)
                .map(|legs| legs.iter().map(|l| l.timestamp).collect())
                .unwrap_or_default(),
        })
    }

    fn insert_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<(), PlexError> {
        self.check(&snapshot.address)?;
        self.snapshots
            .borrow_mut()
            .entry(snapshot.address.clone())
            .or_default()
            .entry(snapshot.timestamp)
            .or_default()
            .extend(snapshot.positions.iter().cloned());
        Ok(())
    }

    fn insert_transactions(&self, batch: &TransactionBatch) -> Result<(), PlexError> {
        self.check(&batch.address)?;
        self.transactions
            .borrow_mut()
            .entry(batch.address.clone())
            .or_default()
            .extend(batch.legs.iter().cloned());
        Ok(())
    }

    fn positions_between(
        &self,
        address: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<PositionRecord>, PlexError> {
        self.check(address)?;
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .snapshots
            .borrow()
            .get(address)
            .map(|by_ts| {
                by_ts
                    .range(start..=end)
                    .flat_map(|(_, rows)| rows.iter().cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn transactions_between(
        &self,
        address: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<TransactionLeg>, PlexError> {
        self.check(address)?;
        let mut legs: Vec<TransactionLeg> = self
            .transactions
            .borrow()
            .get(address)
            .map(|legs| {
                legs.iter()
                    .filter(|l| l.timestamp >= start && l.timestamp <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        legs.sort_by_key(|l| l.timestamp);
        Ok(legs)
    }
}

pub fn key(asset: &str) -> PositionKey {
    PositionKey::new("eth", "wallet", "cash", "cash", asset)
}

pub fn staked(asset: &str) -> PositionKey {
    PositionKey::new("eth", "lido", "stake", "stake", asset)
}

pub fn record(key: PositionKey, amount: f64, price: f64, address: &str, timestamp: i64) -> PositionRecord {
    PositionRecord::new(key, amount, price, address, timestamp)
}

/// Snapshot from `(key, amount, price)` triples.
pub fn snapshot(address: &str, timestamp: i64, holdings: &[(PositionKey, f64, f64)]) -> PortfolioSnapshot {
    let positions = holdings
        .iter()
        .map(|(k, amount, price)| record(k.clone(), *amount, *price, address, timestamp))
        .collect();
    PortfolioSnapshot::new(address, timestamp, positions)
}

pub fn leg(id: &str, timestamp: i64, asset: &str, amount: f64, price: Option<f64>, gas: f64) -> TransactionLeg {
    TransactionLeg {
        id: id.to_string(),
        timestamp,
        chain: "eth".to_string(),
        protocol: "uniswap".to_string(),
        gas,
        kind: "swap".to_string(),
        asset: asset.to_string(),
        amount,
        price,
        pnl: None,
    }
}

pub fn categories() -> CategoryMap {
    CategoryMap::new([
        ("ETH", "ETH"),
        ("stETH", "ETH"),
        ("WETH", "ETH"),
        ("USDC", "USD"),
        ("DAI", "USD"),
    ])
}

pub fn context<S: SnapshotStore + 'static>(store: S) -> PlexContext {
    PlexContext::new(Box::new(store), Arc::new(categories()), ExplainSettings::default())
}

pub fn addresses(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}
