//! Realized PnL from transaction legs.

use crate::domain::attribution::{AttributionRow, PnlBucket};
use crate::domain::category::CategoryMap;
use crate::domain::position::PositionKey;
use crate::domain::transaction::TransactionLeg;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Realized PnL of one asset within one transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TxPnlRow {
    pub id: String,
    pub chain: String,
    pub protocol: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub asset: String,
    pub underlying: String,
    /// Sum of `amount * price` over the priced legs.
    pub pnl: f64,
    /// Gas of the whole transaction; only the first row of an id carries it.
    pub gas: f64,
    pub legs: usize,
    pub priced_legs: usize,
    /// Sum of absolute leg amounts, priced or not.
    pub volume: f64,
    pub timestamp_start: i64,
    pub timestamp_end: i64,
}

impl TxPnlRow {
    pub fn net_pnl(&self) -> f64 {
        self.pnl - self.gas
    }

    pub fn to_attribution_row(&self) -> AttributionRow {
        AttributionRow {
            key: PositionKey {
                chain: self.chain.clone(),
                protocol: self.protocol.clone(),
                // transactions have no hold mode; the type stands in for it
                hold_mode: self.kind.clone(),
                kind: self.kind.clone(),
                asset: self.asset.clone(),
            },
            underlying: self.underlying.clone(),
            pnl_bucket: PnlBucket::TxPnl,
            pnl: self.net_pnl(),
            timestamp_start: self.timestamp_start,
            timestamp_end: self.timestamp_end,
        }
    }
}

/// Drops legs seen before, e.g. a transaction fetched by two overlapping
/// windows. The first copy wins, even when a later fetch quoted another
/// price. Distinct legs of one transaction are kept.
pub fn dedup_legs(legs: &[TransactionLeg]) -> Vec<&TransactionLeg> {
    let mut by_id: HashMap<&str, Vec<&TransactionLeg>> = HashMap::new();
    let mut out = Vec::with_capacity(legs.len());
    for leg in legs {
        let seen = by_id.entry(leg.id.as_str()).or_default();
        if seen.iter().any(|s| s.same_leg(leg)) {
            continue;
        }
        seen.push(leg);
        out.push(leg);
    }
    out
}

type GroupKey<'a> = (&'a str, &'a str, &'a str, &'a str, &'a str);

/// Aggregates legs into one row per (id, chain, protocol, type, asset).
/// Gas is charged once per transaction id. Rows are ordered by id then asset.
pub fn attribute_transactions(
    legs: &[TransactionLeg],
    categories: &CategoryMap,
    timestamp_start: i64,
    timestamp_end: i64,
) -> Vec<TxPnlRow> {
    let unique = dedup_legs(legs);
    if unique.len() < legs.len() {
        debug!(
            dropped = legs.len() - unique.len(),
            "dropped duplicate transaction legs"
        );
    }

    let mut gas_by_id: HashMap<&str, f64> = HashMap::new();
    let mut groups: BTreeMap<GroupKey<'_>, TxPnlRow> = BTreeMap::new();

    for leg in unique {
        gas_by_id.entry(leg.id.as_str()).or_insert(leg.gas);
        let key = (
            leg.id.as_str(),
            leg.chain.as_str(),
            leg.protocol.as_str(),
            leg.kind.as_str(),
            leg.asset.as_str(),
        );
        let row = groups.entry(key).or_insert_with(|| TxPnlRow {
            id: leg.id.clone(),
            chain: leg.chain.clone(),
            protocol: leg.protocol.clone(),
            kind: leg.kind.clone(),
            asset: leg.asset.clone(),
            underlying: categories.resolve_or_self(&leg.asset),
            pnl: 0.0,
            gas: 0.0,
            legs: 0,
            priced_legs: 0,
            volume: 0.0,
            timestamp_start,
            timestamp_end,
        });
        row.legs += 1;
        row.volume += leg.amount.abs();
        if let Some(pnl) = leg.priced_pnl() {
            row.pnl += pnl;
            row.priced_legs += 1;
        }
    }

    let mut rows: Vec<TxPnlRow> = groups.into_values().collect();
    for row in rows.iter_mut() {
        if let Some(gas) = gas_by_id.remove(row.id.as_str()) {
            row.gas = gas;
        }
    }
    rows
}

/// Totals over a set of transaction rows.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TxTotals {
    pub transactions: usize,
    pub pnl: f64,
    pub gas: f64,
}

impl TxTotals {
    pub fn from_rows(rows: &[TxPnlRow]) -> Self {
        let mut ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        Self {
            transactions: ids.len(),
            pnl: rows.iter().map(|r| r.pnl).sum(),
            gas: rows.iter().map(|r| r.gas).sum(),
        }
    }

    pub fn net(&self) -> f64 {
        self.pnl - self.gas
    }
}
