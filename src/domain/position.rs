//! Holdings: position identity, records and point-in-time snapshots.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a holding, excluding quantity fields. Comparison is exact
/// and case-sensitive on all five fields.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub chain: String,
    pub protocol: String,
    pub hold_mode: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub asset: String,
}

impl PositionKey {
    pub fn new(chain: &str, protocol: &str, hold_mode: &str, kind: &str, asset: &str) -> Self {
        Self {
            chain: chain.to_string(),
            protocol: protocol.to_string(),
            hold_mode: hold_mode.to_string(),
            kind: kind.to_string(),
            asset: asset.to_string(),
        }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.chain, self.protocol, self.hold_mode, self.kind, self.asset
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    #[serde(flatten)]
    pub key: PositionKey,
    pub amount: f64,
    /// Quote currency per unit. Zero for unpriced entries such as NFTs.
    pub price: f64,
    pub value: f64,
    pub address: String,
    pub timestamp: i64,
}

impl PositionRecord {
    /// Builds a record whose value is `amount * price`.
    pub fn new(key: PositionKey, amount: f64, price: f64, address: &str, timestamp: i64) -> Self {
        Self {
            key,
            amount,
            price,
            value: amount * price,
            address: address.to_string(),
            timestamp,
        }
    }
}

/// All holdings of one address at one timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub address: String,
    pub timestamp: i64,
    pub positions: Vec<PositionRecord>,
}

impl PortfolioSnapshot {
    pub fn new(address: &str, timestamp: i64, positions: Vec<PositionRecord>) -> Self {
        Self {
            address: address.to_string(),
            timestamp,
            positions,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn total_value(&self) -> f64 {
        self.positions.iter().map(|p| p.value).sum()
    }
}

/// Aggregated view of one side of a comparison, one entry per key.
#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub amount: f64,
    pub price: f64,
    pub value: f64,
}

/// Collapses rows that share a [`PositionKey`] (e.g. the same holding seen
/// across several addresses). Amounts and values are summed and the price
/// becomes the value-weighted price; a zero net amount keeps the first price.
pub fn aggregate_by_key(records: &[PositionRecord]) -> BTreeMap<PositionKey, Holding> {
    let mut out: BTreeMap<PositionKey, Holding> = BTreeMap::new();
    for record in records {
        out.entry(record.key.clone())
            .and_modify(|h| {
                h.amount += record.amount;
                h.value += record.value;
            })
            .or_insert(Holding {
                amount: record.amount,
                price: record.price,
                value: record.value,
            });
    }
    for holding in out.values_mut() {
        if holding.amount != 0.0 {
            let weighted = holding.value / holding.amount;
            if weighted.is_finite() {
                holding.price = weighted;
            }
        }
    }
    out
}
