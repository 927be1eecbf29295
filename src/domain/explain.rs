//! Interval attribution over a snapshot store.
//!
//! [`PlexContext`] is built once per process and owns the store, the current
//! category map and the attribution settings. Replacing the category map
//! swaps the `Arc`; computations already holding the previous map keep it.

use crate::domain::attribution::{Attribution, AttributionEngine, AttributionRow, DEFAULT_TOLERANCE};
use crate::domain::category::CategoryMap;
use crate::domain::error::PlexError;
use crate::domain::position::PositionRecord;
use crate::domain::risk::RiskView;
use crate::domain::timeline;
use crate::domain::tx_attribution::{attribute_transactions, TxPnlRow};
use crate::ports::snapshot_store::{SnapshotStore, Table};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default minimum age, in seconds, before a snapshot is considered stale.
pub const DEFAULT_UPDATE_FREQUENCY_SECS: i64 = 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExplainSettings {
    pub tolerance: f64,
    pub update_frequency_secs: i64,
}

impl Default for ExplainSettings {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            update_frequency_secs: DEFAULT_UPDATE_FREQUENCY_SECS,
        }
    }
}

/// Stored snapshot timestamps chosen for one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressBounds {
    pub address: String,
    pub start: i64,
    pub end: i64,
}

/// Holdings attribution plus realized transaction PnL for one interval.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Explanation {
    pub holdings: Attribution,
    pub transactions: Vec<TxPnlRow>,
    pub bounds: Vec<AddressBounds>,
}

impl Explanation {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty() && self.transactions.is_empty()
    }

    /// Unified table: holding rows first, then `tx_pnl` rows.
    pub fn rows(&self) -> Vec<AttributionRow> {
        let mut rows = self.holdings.rows.clone();
        rows.extend(self.transactions.iter().map(TxPnlRow::to_attribution_row));
        rows
    }

    pub fn total(&self) -> f64 {
        self.holdings.total() + self.transactions.iter().map(TxPnlRow::net_pnl).sum::<f64>()
    }
}

pub struct PlexContext {
    store: Box<dyn SnapshotStore>,
    categories: Arc<CategoryMap>,
    settings: ExplainSettings,
}

impl PlexContext {
    pub fn new(store: Box<dyn SnapshotStore>, categories: Arc<CategoryMap>, settings: ExplainSettings) -> Self {
        Self {
            store,
            categories,
            settings,
        }
    }

    pub fn store(&self) -> &dyn SnapshotStore {
        self.store.as_ref()
    }

    pub fn categories(&self) -> Arc<CategoryMap> {
        Arc::clone(&self.categories)
    }

    pub fn set_categories(&mut self, categories: Arc<CategoryMap>) {
        self.categories = categories;
    }

    pub fn settings(&self) -> ExplainSettings {
        self.settings
    }

    pub fn engine(&self) -> AttributionEngine {
        AttributionEngine::new(self.settings.tolerance)
    }

    /// Per-address bounds: start is the nearest snapshot at or before
    /// `start_time`, end the nearest at or after `end_time`. Addresses with
    /// no snapshots, or whose bounds collapse onto one timestamp, are left
    /// out.
    pub fn resolve_interval(
        &self,
        addresses: &[String],
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<AddressBounds>, PlexError> {
        let mut bounds = Vec::with_capacity(addresses.len());
        for address in addresses {
            let timestamps = self.store.all_timestamps(address, Table::Snapshots)?;
            match timeline::resolve_bounds(&timestamps, start_time, end_time) {
                Some((start, end)) if start < end => {
                    debug!(%address, start, end, "resolved interval");
                    bounds.push(AddressBounds {
                        address: address.clone(),
                        start,
                        end,
                    });
                }
                Some((start, end)) => {
                    debug!(%address, start, end, "interval collapses, skipping address");
                }
                None => debug!(%address, "no snapshots stored"),
            }
        }
        Ok(bounds)
    }

    pub fn explain_interval(
        &self,
        addresses: &[String],
        start_time: i64,
        end_time: i64,
    ) -> Result<Explanation, PlexError> {
        let bounds = self.resolve_interval(addresses, start_time, end_time)?;
        if bounds.is_empty() {
            info!(start_time, end_time, "no snapshot data for interval");
            return Ok(Explanation::empty());
        }

        let mut start_rows = Vec::new();
        let mut end_rows = Vec::new();
        let mut legs = Vec::new();
        for b in &bounds {
            start_rows.extend(self.store.positions_between(&b.address, b.start, b.start)?);
            end_rows.extend(self.store.positions_between(&b.address, b.end, b.end)?);
            // (start, end]: a leg at the start timestamp is already in the start snapshot
            legs.extend(
                self.store
                    .transactions_between(&b.address, b.start, b.end)?
                    .into_iter()
                    .filter(|leg| leg.timestamp > b.start),
            );
        }

        let categories = self.categories();
        let holdings = self.engine().explain(&start_rows, &end_rows, &categories)?;

        let ts_start = holdings
            .timestamp_start
            .unwrap_or_else(|| bounds.iter().map(|b| b.start).min().unwrap_or_default());
        let ts_end = holdings
            .timestamp_end
            .unwrap_or_else(|| bounds.iter().map(|b| b.end).max().unwrap_or_default());
        let transactions = attribute_transactions(&legs, &categories, ts_start, ts_end);

        info!(
            addresses = bounds.len(),
            holding_rows = holdings.rows.len(),
            tx_rows = transactions.len(),
            "explained interval"
        );

        Ok(Explanation {
            holdings,
            transactions,
            bounds,
        })
    }

    /// Explains every consecutive pair of stored snapshots of one address
    /// inside the resolved interval.
    pub fn explain_history(
        &self,
        address: &str,
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<Explanation>, PlexError> {
        let addresses = [address.to_string()];
        let stamps = self.timestamps_within(address, start_time, end_time)?;
        let mut out = Vec::with_capacity(stamps.len().saturating_sub(1));
        for pair in stamps.windows(2) {
            out.push(self.explain_interval(&addresses, pair[0], pair[1])?);
        }
        Ok(out)
    }

    /// Total portfolio value at each stored timestamp inside the interval.
    pub fn value_history(
        &self,
        address: &str,
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<(i64, f64)>, PlexError> {
        self.timestamps_within(address, start_time, end_time)?
            .into_iter()
            .map(|ts| Ok((ts, self.store.snapshot_at(address, ts)?.total_value())))
            .collect()
    }

    /// Exposure of the latest snapshot of each address.
    pub fn risk(&self, addresses: &[String]) -> Result<RiskView, PlexError> {
        let positions = self.latest_positions(addresses)?;
        let view = RiskView::from_positions(&positions, &self.categories);
        if !view.uncategorized.is_empty() {
            warn!(assets = ?view.uncategorized, "assets without underlying category");
        }
        Ok(view)
    }

    /// Assets of the latest snapshots that have no category yet.
    pub fn missing_categories(&self, addresses: &[String]) -> Result<BTreeSet<String>, PlexError> {
        let positions = self.latest_positions(addresses)?;
        Ok(self
            .categories
            .missing(positions.iter().map(|p| p.key.asset.as_str())))
    }

    fn latest_positions(
        &self,
        addresses: &[String],
    ) -> Result<Vec<PositionRecord>, PlexError> {
        let mut positions = Vec::new();
        for address in addresses {
            let (_, snapshot) = self.store.latest_snapshot(address)?;
            positions.extend(snapshot.positions);
        }
        Ok(positions)
    }

    fn timestamps_within(&self, address: &str, start_time: i64, end_time: i64) -> Result<Vec<i64>, PlexError> {
        let timestamps = self.store.all_timestamps(address, Table::Snapshots)?;
        Ok(match timeline::resolve_bounds(&timestamps, start_time, end_time) {
            Some((start, end)) if start <= end => timestamps.range(start..=end).copied().collect(),
            _ => Vec::new(),
        })
    }
}
