//! Exposure grouped by underlying.

use crate::domain::category::CategoryMap;
use crate::domain::position::PositionRecord;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExposureRow {
    pub underlying: String,
    pub asset: String,
    pub chain: String,
    pub protocol: String,
    pub address: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RiskView {
    /// Sorted by underlying, then by descending value.
    pub rows: Vec<ExposureRow>,
    /// Assets with no category; they are grouped under their own name.
    pub uncategorized: BTreeSet<String>,
}

impl RiskView {
    pub fn from_positions(positions: &[PositionRecord], categories: &CategoryMap) -> Self {
        let uncategorized = categories.missing(positions.iter().map(|p| p.key.asset.as_str()));

        let mut grouped: BTreeMap<(String, &str, &str, &str, &str), f64> = BTreeMap::new();
        for p in positions {
            let key = (
                categories.resolve_or_self(&p.key.asset),
                p.key.asset.as_str(),
                p.key.chain.as_str(),
                p.key.protocol.as_str(),
                p.address.as_str(),
            );
            *grouped.entry(key).or_insert(0.0) += p.value;
        }

        let mut rows: Vec<ExposureRow> = grouped
            .into_iter()
            .map(|((underlying, asset, chain, protocol, address), value)| ExposureRow {
                underlying,
                asset: asset.to_string(),
                chain: chain.to_string(),
                protocol: protocol.to_string(),
                address: address.to_string(),
                value,
            })
            .collect();
        rows.sort_by(|a, b| {
            a.underlying
                .cmp(&b.underlying)
                .then_with(|| b.value.total_cmp(&a.value))
        });

        Self {
            rows,
            uncategorized,
        }
    }

    pub fn total(&self) -> f64 {
        self.rows.iter().map(|r| r.value).sum()
    }

    pub fn totals_by_underlying(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        for row in &self.rows {
            *out.entry(row.underlying.clone()).or_insert(0.0) += row.value;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::PositionKey;

    fn rec(protocol: &str, asset: &str, value: f64, address: &str) -> PositionRecord {
        PositionRecord::new(
            PositionKey::new("eth", protocol, "cash", "cash", asset),
            value,
            1.0,
            address,
            1,
        )
    }

    #[test]
    fn groups_wrapped_assets_under_underlying() {
        let categories = CategoryMap::new([("ETH", "ETH"), ("stETH", "ETH"), ("USDC", "USD")]);
        let positions = vec![
            rec("wallet", "ETH", 1000.0, "0xa"),
            rec("lido", "stETH", 3000.0, "0xa"),
            rec("wallet", "USDC", 500.0, "0xb"),
        ];
        let view = RiskView::from_positions(&positions, &categories);

        assert!(view.uncategorized.is_empty());
        assert_eq!(view.rows.len(), 3);
        assert_eq!(view.rows[0].underlying, "ETH");
        assert_eq!(view.rows[0].asset, "stETH");
        let totals = view.totals_by_underlying();
        assert_eq!(totals["ETH"], 4000.0);
        assert_eq!(totals["USD"], 500.0);
        assert_eq!(view.total(), 4500.0);
    }

    #[test]
    fn same_position_in_one_address_is_summed() {
        let categories = CategoryMap::new([("ETH", "ETH")]);
        let positions = vec![
            rec("wallet", "ETH", 1000.0, "0xa"),
            rec("wallet", "ETH", 250.0, "0xa"),
            rec("wallet", "ETH", 10.0, "0xb"),
        ];
        let view = RiskView::from_positions(&positions, &categories);
        assert_eq!(view.rows.len(), 2);
        assert_eq!(view.rows[0].value, 1250.0);
        assert_eq!(view.rows[0].address, "0xa");
    }

    #[test]
    fn uncategorized_assets_are_reported_not_dropped() {
        let categories = CategoryMap::new([("ETH", "ETH")]);
        let positions = vec![rec("wallet", "ETH", 1.0, "0xa"), rec("gmx", "GLP", 2.0, "0xa")];
        let view = RiskView::from_positions(&positions, &categories);
        assert_eq!(view.uncategorized, BTreeSet::from(["GLP".to_string()]));
        assert_eq!(view.totals_by_underlying()["GLP"], 2.0);
    }
}
