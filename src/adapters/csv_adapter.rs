//! CSV import of snapshots and transactions, CSV export of reports.
//!
//! Position files carry one row per holding:
//! `address,timestamp,chain,protocol,hold_mode,type,asset,amount,price[,value]`.
//! Transaction files carry one row per leg:
//! `address,id,timestamp,chain,protocol,gas,type,asset,amount,price,pnl`,
//! where `price` and `pnl` may be empty.

use crate::domain::attribution::AttributionRow;
use crate::domain::error::PlexError;
use crate::domain::position::{PortfolioSnapshot, PositionKey, PositionRecord};
use crate::domain::risk::RiskView;
use crate::domain::transaction::{TransactionBatch, TransactionLeg};
use crate::domain::tx_attribution::TxPnlRow;
use crate::ports::report_port::ReportPort;
use crate::ports::snapshot_store::validate_address;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

#[derive(Debug, Deserialize)]
struct PositionCsvRow {
    address: String,
    timestamp: i64,
    chain: String,
    protocol: String,
    hold_mode: String,
    #[serde(rename = "type")]
    kind: String,
    asset: String,
    amount: f64,
    price: f64,
    #[serde(default)]
    value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TransactionCsvRow {
    address: String,
    id: String,
    timestamp: i64,
    chain: String,
    protocol: String,
    gas: f64,
    #[serde(rename = "type")]
    kind: String,
    asset: String,
    amount: f64,
    price: Option<f64>,
    #[serde(default)]
    pnl: Option<f64>,
}

#[derive(Debug, Serialize)]
struct AttributionCsvRow<'a> {
    chain: &'a str,
    protocol: &'a str,
    hold_mode: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    asset: &'a str,
    underlying: &'a str,
    pnl_bucket: &'static str,
    pnl: f64,
    timestamp_start: String,
    timestamp_end: String,
}

#[derive(Debug, Serialize)]
struct TxCsvRow<'a> {
    id: &'a str,
    chain: &'a str,
    protocol: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    asset: &'a str,
    underlying: &'a str,
    pnl: f64,
    gas: f64,
    net_pnl: f64,
    legs: usize,
    priced_legs: usize,
    volume: f64,
    timestamp_start: String,
    timestamp_end: String,
}

/// RFC 3339 in UTC, or the raw number when out of chrono's range.
pub fn format_timestamp(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| timestamp.to_string())
}

fn import_error(source: &str, e: impl std::fmt::Display) -> PlexError {
    PlexError::Import {
        reason: format!("{source}: {e}"),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CsvAdapter;

impl CsvAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Reads a position file into snapshots ordered by address then timestamp.
    pub fn read_positions(&self, path: &Path) -> Result<Vec<PortfolioSnapshot>, PlexError> {
        let file = File::open(path)?;
        self.read_positions_from(file, &path.display().to_string())
    }

    pub fn read_positions_from<R: Read>(
        &self,
        reader: R,
        source: &str,
    ) -> Result<Vec<PortfolioSnapshot>, PlexError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut grouped: BTreeMap<(String, i64), Vec<PositionRecord>> = BTreeMap::new();

        for result in rdr.deserialize::<PositionCsvRow>() {
            let row = result.map_err(|e| import_error(source, e))?;
            validate_address(&row.address)?;
            let key = PositionKey {
                chain: row.chain,
                protocol: row.protocol,
                hold_mode: row.hold_mode,
                kind: row.kind,
                asset: row.asset,
            };
            let mut record = PositionRecord::new(key, row.amount, row.price, &row.address, row.timestamp);
            if let Some(value) = row.value {
                record.value = value;
            }
            grouped
                .entry((row.address, row.timestamp))
                .or_default()
                .push(record);
        }

        Ok(grouped
            .into_iter()
            .map(|((address, timestamp), positions)| PortfolioSnapshot::new(&address, timestamp, positions))
            .collect())
    }

    /// Reads a transaction file into one batch per address, spanning the
    /// earliest to the latest leg of that address.
    pub fn read_transactions(&self, path: &Path) -> Result<Vec<TransactionBatch>, PlexError> {
        let file = File::open(path)?;
        self.read_transactions_from(file, &path.display().to_string())
    }

    pub fn read_transactions_from<R: Read>(
        &self,
        reader: R,
        source: &str,
    ) -> Result<Vec<TransactionBatch>, PlexError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut grouped: BTreeMap<String, Vec<TransactionLeg>> = BTreeMap::new();

        for result in rdr.deserialize::<TransactionCsvRow>() {
            let row = result.map_err(|e| import_error(source, e))?;
            validate_address(&row.address)?;
            grouped.entry(row.address).or_default().push(TransactionLeg {
                id: row.id,
                timestamp: row.timestamp,
                chain: row.chain,
                protocol: row.protocol,
                gas: row.gas,
                kind: row.kind,
                asset: row.asset,
                amount: row.amount,
                price: row.price,
                pnl: row.pnl,
            });
        }

        Ok(grouped
            .into_iter()
            .map(|(address, legs)| {
                let start = legs.iter().map(|l| l.timestamp).min().unwrap_or_default();
                let end = legs.iter().map(|l| l.timestamp).max().unwrap_or_default();
                TransactionBatch::new(&address, start, end, legs)
            })
            .collect())
    }

    pub fn attribution_to_writer<W: Write>(&self, rows: &[AttributionRow], writer: W) -> Result<(), PlexError> {
        let mut wtr = csv::Writer::from_writer(writer);
        for row in rows {
            wtr.serialize(AttributionCsvRow {
                chain: &row.key.chain,
                protocol: &row.key.protocol,
                hold_mode: &row.key.hold_mode,
                kind: &row.key.kind,
                asset: &row.key.asset,
                underlying: &row.underlying,
                pnl_bucket: row.pnl_bucket.as_str(),
                pnl: row.pnl,
                timestamp_start: format_timestamp(row.timestamp_start),
                timestamp_end: format_timestamp(row.timestamp_end),
            })?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn transactions_to_writer<W: Write>(&self, rows: &[TxPnlRow], writer: W) -> Result<(), PlexError> {
        let mut wtr = csv::Writer::from_writer(writer);
        for row in rows {
            wtr.serialize(TxCsvRow {
                id: &row.id,
                chain: &row.chain,
                protocol: &row.protocol,
                kind: &row.kind,
                asset: &row.asset,
                underlying: &row.underlying,
                pnl: row.pnl,
                gas: row.gas,
                net_pnl: row.net_pnl(),
                legs: row.legs,
                priced_legs: row.priced_legs,
                volume: row.volume,
                timestamp_start: format_timestamp(row.timestamp_start),
                timestamp_end: format_timestamp(row.timestamp_end),
            })?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn exposure_to_writer<W: Write>(&self, view: &RiskView, writer: W) -> Result<(), PlexError> {
        let mut wtr = csv::Writer::from_writer(writer);
        for row in &view.rows {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

impl ReportPort for CsvAdapter {
    fn write_attribution(&self, rows: &[AttributionRow], output_path: &str) -> Result<(), PlexError> {
        self.attribution_to_writer(rows, File::create(output_path)?)
    }

    fn write_transactions(&self, rows: &[TxPnlRow], output_path: &str) -> Result<(), PlexError> {
        self.transactions_to_writer(rows, File::create(output_path)?)
    }

    fn write_exposure(&self, view: &RiskView, output_path: &str) -> Result<(), PlexError> {
        self.exposure_to_writer(view, File::create(output_path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::attribution::PnlBucket;
    use crate::domain::category::CategoryMap;
    use std::fs;
    use tempfile::TempDir;

    const POSITIONS: &str = "\
address,timestamp,chain,protocol,hold_mode,type,asset,amount,price
0xabc,100,eth,wallet,cash,cash,ETH,1.0,2000.0
0xabc,100,eth,lido,stake,stake,stETH,2.0,1990.0
0xabc,200,eth,wallet,cash,cash,ETH,1.0,2200.0
0xdef,100,arb,wallet,cash,cash,USDC,500,1.0
";

    const TRANSACTIONS: &str = "\
address,id,timestamp,chain,protocol,gas,type,asset,amount,price,pnl
0xabc,0x1,150,eth,uniswap,2.5,swap,ETH,-0.5,2100.0,
0xabc,0x1,150,eth,uniswap,2.5,swap,USDC,1050,1.0,
0xabc,0x2,180,eth,uniswap,1.0,swap,SCAM,100,,
";

    #[test]
    fn positions_are_grouped_into_snapshots() {
        let snapshots = CsvAdapter::new()
            .read_positions_from(POSITIONS.as_bytes(), "positions.csv")
            .unwrap();
        assert_eq!(snapshots.len(), 3);
        assert_eq!((snapshots[0].address.as_str(), snapshots[0].timestamp), ("0xabc", 100));
        assert_eq!(snapshots[0].positions.len(), 2);
        assert_eq!(snapshots[0].positions[1].key.kind, "stake");
        assert_eq!(snapshots[0].positions[1].value, 3980.0);
        assert_eq!(snapshots[2].address, "0xdef");
    }

    #[test]
    fn explicit_value_column_is_kept() {
        let csv = "address,timestamp,chain,protocol,hold_mode,type,asset,amount,price,value\n\
                   0xabc,1,eth,wallet,cash,cash,NFT,1,0,150\n";
        let snapshots = CsvAdapter::new().read_positions_from(csv.as_bytes(), "x").unwrap();
        assert_eq!(snapshots[0].positions[0].value, 150.0);
    }

    #[test]
    fn malformed_row_is_an_import_error() {
        let csv = "address,timestamp,chain,protocol,hold_mode,type,asset,amount,price\n\
                   0xabc,notatime,eth,wallet,cash,cash,ETH,1,1\n";
        let err = CsvAdapter::new().read_positions_from(csv.as_bytes(), "bad.csv").unwrap_err();
        match err {
            PlexError::Import { reason } => assert!(reason.starts_with("bad.csv")),
            other => panic!("expected Import, got: {other:?}"),
        }
    }

    #[test]
    fn transactions_form_one_batch_per_address() {
        let batches = CsvAdapter::new()
            .read_transactions_from(TRANSACTIONS.as_bytes(), "tx.csv")
            .unwrap();
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!((batch.start_timestamp, batch.end_timestamp), (150, 180));
        assert_eq!(batch.legs.len(), 3);
        assert_eq!(batch.legs[0].price, Some(2100.0));
        assert_eq!(batch.legs[2].price, None);
        assert_eq!(batch.legs[2].pnl, None);
    }

    #[test]
    fn attribution_csv_has_header_and_rfc3339_times() {
        let row = AttributionRow {
            key: PositionKey::new("eth", "wallet", "cash", "cash", "ETH"),
            underlying: "ETH".into(),
            pnl_bucket: PnlBucket::Delta,
            pnl: 200.0,
            timestamp_start: 0,
            timestamp_end: 86_400,
        };
        let mut out = Vec::new();
        CsvAdapter::new().attribution_to_writer(&[row], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "chain,protocol,hold_mode,type,asset,underlying,pnl_bucket,pnl,timestamp_start,timestamp_end"
        );
        assert_eq!(
            lines.next().unwrap(),
            "eth,wallet,cash,cash,ETH,ETH,delta,200.0,1970-01-01T00:00:00+00:00,1970-01-02T00:00:00+00:00"
        );
    }

    #[test]
    fn exposure_written_to_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("risk.csv");
        let snapshots = CsvAdapter::new()
            .read_positions_from(POSITIONS.as_bytes(), "positions.csv")
            .unwrap();
        let view = RiskView::from_positions(
            &snapshots[0].positions,
            &CategoryMap::new([("ETH", "ETH"), ("stETH", "ETH")]),
        );
        CsvAdapter::new()
            .write_exposure(&view, path.to_str().unwrap())
            .unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("underlying,asset,chain,protocol,address,value\n"));
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn format_timestamp_falls_back_to_number() {
        assert_eq!(format_timestamp(0), "1970-01-01T00:00:00+00:00");
        assert_eq!(format_timestamp(i64::MAX), i64::MAX.to_string());
    }
}
