//! PnL attribution between two snapshots.
//!
//! Positions are matched by [`PositionKey`]. A position held at both ends is
//! split into three buckets:
//!
//! - `delta = (P_u_end - P_u_start) * amount_start * price_start / P_u_start`
//! - `basis = amount_start * (price_end - price_start) - delta`
//! - `amt_chng = (amount_end - amount_start) * price_end`
//!
//! where `P_u` is the mean price of all common positions sharing the same
//! underlying. A position present on one side only gets a single `amt_chng`
//! row for its full entry or unwind.

use crate::domain::category::CategoryMap;
use crate::domain::error::PlexError;
use crate::domain::position::{aggregate_by_key, Holding, PositionKey, PositionRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

/// Default reconciliation tolerance, in quote currency, summed over all rows.
pub const DEFAULT_TOLERANCE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PnlBucket {
    Delta,
    Basis,
    AmtChng,
    TxPnl,
}

impl PnlBucket {
    pub fn as_str(self) -> &'static str {
        match self {
            PnlBucket::Delta => "delta",
            PnlBucket::Basis => "basis",
            PnlBucket::AmtChng => "amt_chng",
            PnlBucket::TxPnl => "tx_pnl",
        }
    }
}

impl fmt::Display for PnlBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionRow {
    #[serde(flatten)]
    pub key: PositionKey,
    pub underlying: String,
    pub pnl_bucket: PnlBucket,
    pub pnl: f64,
    pub timestamp_start: i64,
    pub timestamp_end: i64,
}

/// Attribution rows for one interval. Empty when either side had no data.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Attribution {
    pub rows: Vec<AttributionRow>,
    pub timestamp_start: Option<i64>,
    pub timestamp_end: Option<i64>,
}

impl Attribution {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.rows.iter().map(|r| r.pnl).sum()
    }

    pub fn total_by_bucket(&self) -> BTreeMap<PnlBucket, f64> {
        let mut out = BTreeMap::new();
        for row in &self.rows {
            *out.entry(row.pnl_bucket).or_insert(0.0) += row.pnl;
        }
        out
    }

    /// Underlying x bucket totals.
    pub fn pivot(&self) -> BTreeMap<String, BTreeMap<PnlBucket, f64>> {
        let mut out: BTreeMap<String, BTreeMap<PnlBucket, f64>> = BTreeMap::new();
        for row in &self.rows {
            *out.entry(row.underlying.clone())
                .or_default()
                .entry(row.pnl_bucket)
                .or_insert(0.0) += row.pnl;
        }
        out
    }

    pub fn rows_for(&self, key: &PositionKey) -> impl Iterator<Item = &AttributionRow> {
        self.rows.iter().filter(move |r| &r.key == key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributionEngine {
    pub tolerance: f64,
}

impl Default for AttributionEngine {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

#[derive(Default)]
struct PriceSums {
    start: f64,
    end: f64,
    count: usize,
}

impl PriceSums {
    fn means(&self) -> (f64, f64) {
        let n = self.count as f64;
        (self.start / n, self.end / n)
    }
}

struct Buckets {
    delta: f64,
    basis: f64,
    amt_chng: f64,
}

impl AttributionEngine {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// Decomposes the change from `start` to `end`. Either slice may hold
    /// rows of several addresses; rows sharing a key are aggregated first.
    pub fn explain(
        &self,
        start: &[PositionRecord],
        end: &[PositionRecord],
        categories: &CategoryMap,
    ) -> Result<Attribution, PlexError> {
        if start.is_empty() || end.is_empty() {
            debug!(
                start_rows = start.len(),
                end_rows = end.len(),
                "empty snapshot, nothing to attribute"
            );
            return Ok(Attribution::empty());
        }

        let start_holdings = aggregate_by_key(start);
        let end_holdings = aggregate_by_key(end);

        let common: Vec<&PositionKey> = start_holdings
            .keys()
            .filter(|k| end_holdings.contains_key(*k))
            .collect();

        let missing = categories.missing(common.iter().map(|k| k.asset.as_str()));
        if !missing.is_empty() {
            return Err(PlexError::MissingCategory { assets: missing });
        }

        let mut sums: BTreeMap<&str, PriceSums> = BTreeMap::new();
        for key in &common {
            let underlying = categories.underlying(&key.asset).unwrap_or(&key.asset);
            let entry = sums.entry(underlying).or_default();
            entry.start += start_holdings[*key].price;
            entry.end += end_holdings[*key].price;
            entry.count += 1;
        }

        let timestamp_start = start.iter().map(|r| r.timestamp).min().unwrap_or_default();
        let timestamp_end = end.iter().map(|r| r.timestamp).max().unwrap_or_default();

        let keys: BTreeSet<&PositionKey> = start_holdings.keys().chain(end_holdings.keys()).collect();
        let mut rows = Vec::with_capacity(keys.len() * 3);
        let mut residual = 0.0_f64;
        let mut worst: Option<(f64, &PositionKey)> = None;

        let row = |key: &PositionKey, underlying: &str, bucket: PnlBucket, pnl: f64| AttributionRow {
            key: key.clone(),
            underlying: underlying.to_string(),
            pnl_bucket: bucket,
            pnl,
            timestamp_start,
            timestamp_end,
        };

        for key in keys {
            match (start_holdings.get(key), end_holdings.get(key)) {
                (Some(s), Some(e)) => {
                    let underlying = categories.underlying(&key.asset).unwrap_or(&key.asset);
                    let (p_start, p_end) = sums[underlying].means();
                    let b = split_common(s, e, p_start, p_end);

                    let gap = (e.value - s.value - (b.delta + b.basis + b.amt_chng)).abs();
                    residual += gap;
                    if worst.is_none_or(|(w, _)| gap > w) {
                        worst = Some((gap, key));
                    }

                    rows.push(row(key, underlying, PnlBucket::Delta, b.delta));
                    rows.push(row(key, underlying, PnlBucket::Basis, b.basis));
                    rows.push(row(key, underlying, PnlBucket::AmtChng, b.amt_chng));
                }
                (Some(s), None) => {
                    let underlying = categories.resolve_or_self(&key.asset);
                    rows.push(row(key, &underlying, PnlBucket::AmtChng, -s.amount * s.price));
                }
                (None, Some(e)) => {
                    let underlying = categories.resolve_or_self(&key.asset);
                    rows.push(row(key, &underlying, PnlBucket::AmtChng, e.amount * e.price));
                }
                (None, None) => {}
            }
        }

        if residual.is_nan() || residual > self.tolerance {
            return Err(PlexError::Reconciliation {
                residual,
                tolerance: self.tolerance,
                worst: worst.map(|(_, k)| k.to_string()).unwrap_or_default(),
            });
        }

        debug!(
            rows = rows.len(),
            common = common.len(),
            residual,
            "attribution computed"
        );

        Ok(Attribution {
            rows,
            timestamp_start: Some(timestamp_start),
            timestamp_end: Some(timestamp_end),
        })
    }
}

fn split_common(start: &Holding, end: &Holding, p_start: f64, p_end: f64) -> Buckets {
    let own_move = start.amount * (end.price - start.price);
    let delta = if p_start == 0.0 {
        0.0
    } else {
        (p_end - p_start) * start.amount * start.price / p_start
    };
    let delta = if delta.is_finite() { delta } else { 0.0 };
    Buckets {
        delta,
        basis: own_move - delta,
        amt_chng: (end.amount - start.amount) * end.price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    fn key(asset: &str) -> PositionKey {
        PositionKey::new("eth", "wallet", "cash", "cash", asset)
    }

    fn rec(asset: &str, amount: f64, price: f64, ts: i64) -> PositionRecord {
        PositionRecord::new(key(asset), amount, price, "0xabc", ts)
    }

    fn categories() -> CategoryMap {
        CategoryMap::new([("ETH", "ETH"), ("stETH", "ETH"), ("USDC", "USD")])
    }

    fn bucket(attr: &Attribution, asset: &str, bucket: PnlBucket) -> Vec<f64> {
        attr.rows
            .iter()
            .filter(|r| r.key.asset == asset && r.pnl_bucket == bucket)
            .map(|r| r.pnl)
            .collect()
    }

    #[test]
    fn single_asset_price_move_is_all_delta() {
        let start = vec![rec("ETH", 10.0, 2000.0, 100)];
        let end = vec![rec("ETH", 10.0, 2200.0, 200)];
        let attr = AttributionEngine::default()
            .explain(&start, &end, &categories())
            .unwrap();

        assert_eq!(attr.rows.len(), 3);
        assert_abs_diff_eq!(bucket(&attr, "ETH", PnlBucket::Delta)[0], 2000.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bucket(&attr, "ETH", PnlBucket::Basis)[0], 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bucket(&attr, "ETH", PnlBucket::AmtChng)[0], 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(attr.total(), 22_000.0 - 20_000.0, epsilon = 1e-9);
        assert!(attr.rows.iter().all(|r| r.underlying == "ETH"));
    }

    #[test]
    fn removed_position_is_full_unwind_at_start_price() {
        let start = vec![rec("ETH", 1.0, 2000.0, 100), rec("USDC", 5.0, 100.0, 100)];
        let end = vec![rec("ETH", 1.0, 2000.0, 200)];
        let attr = AttributionEngine::default()
            .explain(&start, &end, &categories())
            .unwrap();

        let usdc: Vec<&AttributionRow> = attr.rows_for(&key("USDC")).collect();
        assert_eq!(usdc.len(), 1);
        assert_eq!(usdc[0].pnl_bucket, PnlBucket::AmtChng);
        assert_abs_diff_eq!(usdc[0].pnl, -500.0, epsilon = 1e-12);
    }

    #[test]
    fn added_position_is_full_entry_at_end_price() {
        let start = vec![rec("ETH", 1.0, 2000.0, 100)];
        let end = vec![rec("ETH", 1.0, 2000.0, 200), rec("PENDLE", 20.0, 4.0, 200)];
        let attr = AttributionEngine::default()
            .explain(&start, &end, &categories())
            .unwrap();

        let pendle: Vec<&AttributionRow> = attr.rows_for(&key("PENDLE")).collect();
        assert_eq!(pendle.len(), 1);
        assert_eq!(pendle[0].pnl_bucket, PnlBucket::AmtChng);
        assert_abs_diff_eq!(pendle[0].pnl, 80.0, epsilon = 1e-12);
        // unmapped one-sided assets are their own underlying
        assert_eq!(pendle[0].underlying, "PENDLE");
    }

    #[test]
    fn missing_category_fails_before_any_row() {
        let start = vec![rec("ETH", 1.0, 2000.0, 100), rec("GMX", 3.0, 40.0, 100)];
        let end = vec![rec("ETH", 1.0, 2100.0, 200), rec("GMX", 3.0, 42.0, 200)];
        let err = AttributionEngine::default()
            .explain(&start, &end, &categories())
            .unwrap_err();
        match err {
            PlexError::MissingCategory { assets } => {
                assert_eq!(assets, BTreeSet::from(["GMX".to_string()]));
            }
            other => panic!("expected MissingCategory, got: {other}"),
        }
    }

    #[test]
    fn derivative_divergence_lands_in_basis() {
        // ETH +10%, stETH +5%: underlying mean moves 2000 -> 2150
        let start = vec![rec("ETH", 1.0, 2000.0, 100), rec("stETH", 1.0, 2000.0, 100)];
        let end = vec![rec("ETH", 1.0, 2200.0, 200), rec("stETH", 1.0, 2100.0, 200)];
        let attr = AttributionEngine::default()
            .explain(&start, &end, &categories())
            .unwrap();

        assert_abs_diff_eq!(bucket(&attr, "ETH", PnlBucket::Delta)[0], 150.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bucket(&attr, "ETH", PnlBucket::Basis)[0], 50.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bucket(&attr, "stETH", PnlBucket::Delta)[0], 150.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bucket(&attr, "stETH", PnlBucket::Basis)[0], -50.0, epsilon = 1e-9);
        assert_abs_diff_eq!(attr.total(), 300.0, epsilon = 1e-9);
    }

    #[test]
    fn amount_change_is_valued_at_end_price() {
        let start = vec![rec("ETH", 10.0, 2000.0, 100)];
        let end = vec![rec("ETH", 12.0, 2200.0, 200)];
        let attr = AttributionEngine::default()
            .explain(&start, &end, &categories())
            .unwrap();
        assert_abs_diff_eq!(bucket(&attr, "ETH", PnlBucket::AmtChng)[0], 4400.0, epsilon = 1e-9);
        assert_abs_diff_eq!(attr.total(), 26_400.0 - 20_000.0, epsilon = 1e-9);
    }

    #[test]
    fn zero_underlying_start_price_moves_everything_to_basis() {
        let start = vec![rec("USDC", 100.0, 0.0, 100)];
        let end = vec![rec("USDC", 100.0, 1.0, 200)];
        let attr = AttributionEngine::default()
            .explain(&start, &end, &categories())
            .unwrap();
        assert_eq!(bucket(&attr, "USDC", PnlBucket::Delta)[0], 0.0);
        assert_abs_diff_eq!(bucket(&attr, "USDC", PnlBucket::Basis)[0], 100.0, epsilon = 1e-12);
        assert!(attr.rows.iter().all(|r| r.pnl.is_finite()));
    }

    #[test]
    fn empty_side_returns_empty_result() {
        let engine = AttributionEngine::default();
        let side = vec![rec("ETH", 1.0, 2000.0, 100)];
        assert!(engine.explain(&[], &side, &categories()).unwrap().is_empty());
        assert!(engine.explain(&side, &[], &categories()).unwrap().is_empty());
        assert!(engine.explain(&[], &[], &CategoryMap::default()).unwrap().is_empty());
    }

    #[test]
    fn inconsistent_values_fail_reconciliation() {
        let mut bad = rec("ETH", 10.0, 2000.0, 100);
        bad.value = 19_990.0;
        let end = vec![rec("ETH", 10.0, 2200.0, 200)];
        let err = AttributionEngine::default()
            .explain(&[bad], &end, &categories())
            .unwrap_err();
        match err {
            PlexError::Reconciliation { residual, worst, .. } => {
                assert_abs_diff_eq!(residual, 10.0, epsilon = 1e-9);
                assert_eq!(worst, "eth/wallet/cash/cash/ETH");
            }
            other => panic!("expected Reconciliation, got: {other}"),
        }
    }

    #[test]
    fn tolerance_is_configurable() {
        let mut bad = rec("ETH", 10.0, 2000.0, 100);
        bad.value = 19_990.0;
        let end = vec![rec("ETH", 10.0, 2200.0, 200)];
        let attr = AttributionEngine::new(50.0).explain(&[bad], &end, &categories());
        assert!(attr.is_ok());
    }

    #[test]
    fn timestamps_span_observed_bounds() {
        let start = vec![
            PositionRecord::new(key("ETH"), 1.0, 2000.0, "0xa", 120),
            PositionRecord::new(key("USDC"), 1.0, 1.0, "0xb", 100),
        ];
        let end = vec![
            PositionRecord::new(key("ETH"), 1.0, 2000.0, "0xa", 300),
            PositionRecord::new(key("USDC"), 1.0, 1.0, "0xb", 280),
        ];
        let attr = AttributionEngine::default()
            .explain(&start, &end, &categories())
            .unwrap();
        assert_eq!(attr.timestamp_start, Some(100));
        assert_eq!(attr.timestamp_end, Some(300));
        assert!(attr
            .rows
            .iter()
            .all(|r| r.timestamp_start == 100 && r.timestamp_end == 300));
    }

    #[test]
    fn same_key_across_addresses_is_attributed_once() {
        let start = vec![
            PositionRecord::new(key("ETH"), 1.0, 2000.0, "0xa", 100),
            PositionRecord::new(key("ETH"), 2.0, 2000.0, "0xb", 100),
        ];
        let end = vec![
            PositionRecord::new(key("ETH"), 1.0, 2100.0, "0xa", 200),
            PositionRecord::new(key("ETH"), 2.0, 2100.0, "0xb", 200),
        ];
        let attr = AttributionEngine::default()
            .explain(&start, &end, &categories())
            .unwrap();
        assert_eq!(attr.rows.len(), 3);
        assert_abs_diff_eq!(bucket(&attr, "ETH", PnlBucket::Delta)[0], 300.0, epsilon = 1e-9);
    }

    #[test]
    fn pivot_and_bucket_totals() {
        let start = vec![rec("ETH", 1.0, 2000.0, 100), rec("USDC", 100.0, 1.0, 100)];
        let end = vec![rec("ETH", 1.0, 2100.0, 200), rec("USDC", 150.0, 1.0, 200)];
        let attr = AttributionEngine::default()
            .explain(&start, &end, &categories())
            .unwrap();

        let pivot = attr.pivot();
        assert_abs_diff_eq!(pivot["ETH"][&PnlBucket::Delta], 100.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pivot["USD"][&PnlBucket::AmtChng], 50.0, epsilon = 1e-9);

        let totals = attr.total_by_bucket();
        assert_abs_diff_eq!(totals[&PnlBucket::Delta], 100.0, epsilon = 1e-9);
        assert_abs_diff_eq!(totals[&PnlBucket::AmtChng], 50.0, epsilon = 1e-9);
        assert!(!totals.contains_key(&PnlBucket::TxPnl));
    }

    #[test]
    fn bucket_names_serialize_snake_case() {
        assert_eq!(serde_json::to_value(PnlBucket::AmtChng).unwrap(), "amt_chng");
        assert_eq!(PnlBucket::TxPnl.to_string(), "tx_pnl");
    }

    fn arb_side() -> impl Strategy<Value = Vec<(usize, f64, f64)>> {
        proptest::collection::vec((0usize..6, 0.0f64..1_000.0, 0.01f64..5_000.0), 0..8)
    }

    const ASSETS: [&str; 6] = ["ETH", "stETH", "USDC", "WBTC", "tBTC", "DAI"];

    fn build(side: &[(usize, f64, f64)], ts: i64) -> Vec<PositionRecord> {
        let mut seen = BTreeSet::new();
        side.iter()
            .filter(|(i, _, _)| seen.insert(*i))
            .map(|(i, amount, price)| rec(ASSETS[*i], *amount, *price, ts))
            .collect()
    }

    fn full_categories() -> CategoryMap {
        CategoryMap::new([
            ("ETH", "ETH"),
            ("stETH", "ETH"),
            ("USDC", "USD"),
            ("DAI", "USD"),
            ("WBTC", "BTC"),
            ("tBTC", "BTC"),
        ])
    }

    proptest! {
        #[test]
        fn common_positions_reconcile(start in arb_side(), end in arb_side()) {
            let start = build(&start, 100);
            let end = build(&end, 200);
            let attr = AttributionEngine::default()
                .explain(&start, &end, &full_categories())
                .unwrap();

            for s in &start {
                if let Some(e) = end.iter().find(|e| e.key == s.key) {
                    let sum: f64 = attr.rows_for(&s.key).map(|r| r.pnl).sum();
                    prop_assert!((sum - (e.value - s.value)).abs() < 1e-6);
                } else if !end.is_empty() {
                    let rows: Vec<_> = attr.rows_for(&s.key).collect();
                    prop_assert_eq!(rows.len(), 1);
                    prop_assert_eq!(rows[0].pnl_bucket, PnlBucket::AmtChng);
                }
            }
        }

        #[test]
        fn explain_is_idempotent(start in arb_side(), end in arb_side()) {
            let start = build(&start, 100);
            let end = build(&end, 200);
            let engine = AttributionEngine::default();
            let first = engine.explain(&start, &end, &full_categories()).unwrap();
            let second = engine.explain(&start, &end, &full_categories()).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
