//! Asset to underlying mapping used to group correlated exposures.
//!
//! A [`CategoryMap`] is an immutable value. Editing produces a new map, so
//! an attribution that already holds an `Arc<CategoryMap>` keeps reading the
//! version it started with.

use crate::ports::config_port::ConfigPort;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryMap {
    entries: BTreeMap<String, String>,
}

impl CategoryMap {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_lowercase(), v.into()))
                .collect(),
        }
    }

    /// Reads every `asset = underlying` pair of the `[categories]` section.
    pub fn from_config(config: &dyn ConfigPort) -> Self {
        Self::new(
            config
                .section_entries("categories")
                .into_iter()
                .filter(|(_, v)| !v.trim().is_empty())
                .map(|(k, v)| (k, v.trim().to_string())),
        )
    }

    /// Case-insensitive lookup.
    pub fn underlying(&self, asset: &str) -> Option<&str> {
        self.entries.get(&asset.to_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, asset: &str) -> bool {
        self.entries.contains_key(&asset.to_lowercase())
    }

    /// The mapped underlying, or the asset itself when unmapped.
    pub fn resolve_or_self(&self, asset: &str) -> String {
        self.underlying(asset)
            .map(str::to_string)
            .unwrap_or_else(|| asset.to_string())
    }

    pub fn known_assets(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    /// Assets from `assets` that have no mapping, as given (not lowercased).
    pub fn missing<'a, I>(&self, assets: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        assets
            .into_iter()
            .filter(|a| !self.contains(a))
            .map(str::to_string)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// New map with one mapping added or replaced.
    pub fn with_mapping(&self, asset: &str, underlying: &str) -> Self {
        let mut entries = self.entries.clone();
        entries.insert(asset.to_lowercase(), underlying.to_string());
        Self { entries }
    }

    /// New map with several mappings added or replaced.
    pub fn with_mappings<I, K, V>(&self, mappings: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut entries = self.entries.clone();
        entries.extend(
            mappings
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_lowercase(), v.into())),
        );
        Self { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn sample() -> CategoryMap {
        CategoryMap::new([("ETH", "ETH"), ("stETH", "ETH"), ("USDC", "USD")])
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let map = sample();
        assert_eq!(map.underlying("steth"), Some("ETH"));
        assert_eq!(map.underlying("STETH"), Some("ETH"));
        assert_eq!(map.underlying("usdc"), Some("USD"));
        assert_eq!(map.underlying("BTC"), None);
    }

    #[test]
    fn known_assets_are_lowercase() {
        let known = sample().known_assets();
        assert!(known.contains("steth"));
        assert_eq!(known.len(), 3);
    }

    #[test]
    fn missing_returns_only_unmapped_assets() {
        let map = sample();
        let missing = map.missing(["ETH", "WBTC", "stETH", "GMX"]);
        let expected: BTreeSet<String> = ["GMX".to_string(), "WBTC".to_string()].into();
        assert_eq!(missing, expected);
    }

    #[test]
    fn resolve_or_self_falls_back_to_asset() {
        let map = sample();
        assert_eq!(map.resolve_or_self("stETH"), "ETH");
        assert_eq!(map.resolve_or_self("PENDLE"), "PENDLE");
    }

    #[test]
    fn with_mapping_leaves_original_untouched() {
        let original = sample();
        let updated = original.with_mapping("WBTC", "BTC");
        assert!(!original.contains("wbtc"));
        assert_eq!(updated.underlying("wbtc"), Some("BTC"));
        assert_eq!(updated.len(), original.len() + 1);
    }

    #[test]
    fn with_mappings_overrides_existing_entries() {
        let updated = sample().with_mappings([("USDC", "USDC"), ("DAI", "USD")]);
        assert_eq!(updated.underlying("usdc"), Some("USDC"));
        assert_eq!(updated.underlying("dai"), Some("USD"));
    }

    #[test]
    fn from_config_reads_categories_section() {
        let config = FileConfigAdapter::from_string(
            "[categories]\nETH = ETH\nwstETH = ETH\nUSDC = USD\n\n[store]\nbackend = sqlite\n",
        )
        .unwrap();
        let map = CategoryMap::from_config(&config);
        assert_eq!(map.len(), 3);
        assert_eq!(map.underlying("WSTETH"), Some("ETH"));
    }
}
