//! CLI definition and dispatch.

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::debug;

use crate::adapters::csv_adapter::{format_timestamp, CsvAdapter};
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::open_store;
use crate::domain::attribution::PnlBucket;
use crate::domain::category::CategoryMap;
use crate::domain::config_validation::{build_settings, parse_addresses, validate_config};
use crate::domain::error::PlexError;
use crate::domain::explain::{Explanation, PlexContext};
use crate::domain::tx_attribution::TxTotals;
use crate::logging::init_logging;
use crate::ports::config_port::ConfigPort;
use crate::ports::report_port::ReportPort;
use crate::ports::snapshot_store::Table;

#[derive(Parser, Debug)]
#[command(name = "plex", about = "Portfolio PnL explain over stored snapshots")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TableArg {
    Snapshots,
    Transactions,
}

impl From<TableArg> for Table {
    fn from(arg: TableArg) -> Self {
        match arg {
            TableArg::Snapshots => Table::Snapshots,
            TableArg::Transactions => Table::Transactions,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import position rows from CSV as snapshots
    ImportSnapshots {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Import transaction legs from CSV
    ImportTransactions {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        file: PathBuf,
        /// Batch start; defaults to the earliest leg
        #[arg(long, value_parser = parse_time)]
        start: Option<i64>,
        /// Batch end; defaults to the latest leg
        #[arg(long, value_parser = parse_time)]
        end: Option<i64>,
    },
    /// List stored timestamps of an address
    Timestamps {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        address: String,
        #[arg(long, value_enum, default_value = "snapshots")]
        table: TableArg,
    },
    /// Attribute the PnL between two times
    Explain {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        address: Vec<String>,
        #[arg(long, value_parser = parse_time)]
        start: i64,
        #[arg(long, value_parser = parse_time)]
        end: i64,
        /// Attribution CSV; stdout when absent
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Per-transaction CSV
        #[arg(long)]
        tx_output: Option<PathBuf>,
    },
    /// Attribute each consecutive pair of snapshots of one address
    History {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        address: String,
        #[arg(long, value_parser = parse_time)]
        start: i64,
        #[arg(long, value_parser = parse_time)]
        end: i64,
        /// Print total value per snapshot instead
        #[arg(long)]
        values: bool,
    },
    /// Exposure of the latest snapshots by underlying
    Risk {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        address: Vec<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List assets of the latest snapshots without an underlying
    Categories {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        address: Vec<String>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::ImportSnapshots { config, file } => run_import_snapshots(&config, &file),
        Command::ImportTransactions {
            config,
            file,
            start,
            end,
        } => run_import_transactions(&config, &file, start, end),
        Command::Timestamps {
            config,
            address,
            table,
        } => run_timestamps(&config, &address, table.into()),
        Command::Explain {
            config,
            address,
            start,
            end,
            output,
            tx_output,
        } => run_explain(
            &config,
            &address,
            start,
            end,
            output.as_deref(),
            tx_output.as_deref(),
        ),
        Command::History {
            config,
            address,
            start,
            end,
            values,
        } => run_history(&config, &address, start, end, values),
        Command::Risk {
            config,
            address,
            output,
        } => run_risk(&config, &address, output.as_deref()),
        Command::Categories { config, address } => run_categories(&config, &address),
        Command::Validate { config } => run_validate(&config),
    }
}

/// Accepts epoch seconds, RFC 3339, or `YYYY-MM-DD` (midnight UTC).
pub fn parse_time(s: &str) -> Result<i64, String> {
    let s = s.trim();
    if let Ok(ts) = s.parse::<i64>() {
        return Ok(ts);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::MIN).and_utc().timestamp());
    }
    Err(format!(
        "invalid time '{s}' (expected epoch seconds, RFC 3339 or YYYY-MM-DD)"
    ))
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    let adapter = FileConfigAdapter::from_file(path).map_err(fail)?;
    init_logging(adapter.get_string("logging", "level").as_deref());
    debug!(source = adapter.source(), "loaded config");
    Ok(adapter)
}

/// Validates config, opens the store and loads categories.
pub fn build_context(config: &dyn ConfigPort) -> Result<PlexContext, PlexError> {
    validate_config(config)?;
    let store = open_store(config)?;
    let categories = Arc::new(CategoryMap::from_config(config));
    Ok(PlexContext::new(store, categories, build_settings(config)))
}

/// `--address` values, else `[portfolio] addresses`.
pub fn resolve_addresses(cli: &[String], config: &dyn ConfigPort) -> Result<Vec<String>, PlexError> {
    if !cli.is_empty() {
        return parse_addresses(&cli.join(","));
    }
    let addresses = parse_addresses(&config.get_string("portfolio", "addresses").unwrap_or_default())?;
    if addresses.is_empty() {
        return Err(PlexError::ConfigMissing {
            section: "portfolio".into(),
            key: "addresses".into(),
        });
    }
    Ok(addresses)
}

fn fail(e: PlexError) -> ExitCode {
    eprintln!("error: {e}");
    (&e).into()
}

fn setup(config_path: &Path) -> Result<(FileConfigAdapter, PlexContext), ExitCode> {
    let config = load_config(config_path)?;
    let ctx = build_context(&config).map_err(fail)?;
    Ok((config, ctx))
}

fn run_import_snapshots(config_path: &Path, file: &Path) -> ExitCode {
    let (_, ctx) = match setup(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };

    eprintln!("Reading positions from {}", file.display());
    let snapshots = match CsvAdapter::new().read_positions(file) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };

    let mut rows = 0;
    for snapshot in &snapshots {
        if let Err(e) = ctx.store().insert_snapshot(snapshot) {
            return fail(e);
        }
        rows += snapshot.positions.len();
    }
    eprintln!("Imported {} snapshots ({} rows)", snapshots.len(), rows);
    ExitCode::SUCCESS
}

fn run_import_transactions(
    config_path: &Path,
    file: &Path,
    start: Option<i64>,
    end: Option<i64>,
) -> ExitCode {
    let (_, ctx) = match setup(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };

    eprintln!("Reading transactions from {}", file.display());
    let batches = match CsvAdapter::new().read_transactions(file) {
        Ok(b) => b,
        Err(e) => return fail(e),
    };

    let mut legs = 0;
    for mut batch in batches {
        if let Some(start) = start {
            batch.start_timestamp = start;
        }
        if let Some(end) = end {
            batch.end_timestamp = end;
        }
        if let Err(e) = ctx.store().insert_transactions(&batch) {
            return fail(e);
        }
        legs += batch.legs.len();
    }
    eprintln!("Imported {legs} transaction legs");
    ExitCode::SUCCESS
}

fn run_timestamps(config_path: &Path, address: &str, table: Table) -> ExitCode {
    let (_, ctx) = match setup(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };

    let timestamps = match ctx.store().all_timestamps(address, table) {
        Ok(t) => t,
        Err(e) => return fail(e),
    };
    for ts in &timestamps {
        println!("{ts}\t{}", format_timestamp(*ts));
    }

    if table == Table::Snapshots {
        let now = Utc::now().timestamp();
        match ctx
            .store()
            .is_stale(address, now, ctx.settings().update_frequency_secs)
        {
            Ok(true) => eprintln!("{address}: snapshot data is stale"),
            Ok(false) => eprintln!("{address}: snapshot data is current"),
            Err(e) => return fail(e),
        }
    }
    ExitCode::SUCCESS
}

fn run_explain(
    config_path: &Path,
    cli_addresses: &[String],
    start: i64,
    end: i64,
    output: Option<&Path>,
    tx_output: Option<&Path>,
) -> ExitCode {
    let (config, ctx) = match setup(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let addresses = match resolve_addresses(cli_addresses, &config) {
        Ok(a) => a,
        Err(e) => return fail(e),
    };

    eprintln!(
        "Explaining {} address(es) from {} to {}",
        addresses.len(),
        format_timestamp(start),
        format_timestamp(end)
    );
    let explanation = match ctx.explain_interval(&addresses, start, end) {
        Ok(x) => x,
        Err(e) => return fail(e),
    };
    if explanation.is_empty() {
        eprintln!("No snapshot data for this interval");
    }
    print_summary(&explanation);

    let csv = CsvAdapter::new();
    let rows = explanation.rows();
    let written = match output {
        Some(path) => csv.write_attribution(&rows, &path.display().to_string()),
        None => csv.attribution_to_writer(&rows, io::stdout().lock()),
    };
    if let Err(e) = written {
        return fail(e);
    }
    if let Some(path) = tx_output {
        if let Err(e) = csv.write_transactions(&explanation.transactions, &path.display().to_string()) {
            return fail(e);
        }
    }
    ExitCode::SUCCESS
}

fn print_summary(explanation: &Explanation) {
    for b in &explanation.bounds {
        eprintln!(
            "  {}: {} -> {}",
            b.address,
            format_timestamp(b.start),
            format_timestamp(b.end)
        );
    }
    for (underlying, buckets) in explanation.holdings.pivot() {
        let parts: Vec<String> = buckets
            .iter()
            .map(|(bucket, pnl)| format!("{bucket}={pnl:.2}"))
            .collect();
        eprintln!("  {underlying}: {}", parts.join(" "));
    }
    let tx = TxTotals::from_rows(&explanation.transactions);
    if tx.transactions > 0 {
        eprintln!(
            "  {} transactions: pnl={:.2} gas={:.2} net={:.2}",
            tx.transactions,
            tx.pnl,
            tx.gas,
            tx.net()
        );
    }
    eprintln!("  total: {:.2}", explanation.total());
}

fn run_history(config_path: &Path, address: &str, start: i64, end: i64, values: bool) -> ExitCode {
    let (_, ctx) = match setup(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };

    if values {
        let history = match ctx.value_history(address, start, end) {
            Ok(h) => h,
            Err(e) => return fail(e),
        };
        println!("timestamp,value");
        for (ts, value) in history {
            println!("{},{value:.2}", format_timestamp(ts));
        }
        return ExitCode::SUCCESS;
    }

    let history = match ctx.explain_history(address, start, end) {
        Ok(h) => h,
        Err(e) => return fail(e),
    };
    println!("timestamp_start,timestamp_end,delta,basis,amt_chng,tx_pnl,total");
    for explanation in &history {
        let Some(bounds) = explanation.bounds.first() else {
            continue;
        };
        let mut by_bucket = explanation.holdings.total_by_bucket();
        let tx = TxTotals::from_rows(&explanation.transactions).net();
        *by_bucket.entry(PnlBucket::TxPnl).or_insert(0.0) += tx;
        let bucket = |b: PnlBucket| by_bucket.get(&b).copied().unwrap_or(0.0);
        println!(
            "{},{},{:.2},{:.2},{:.2},{:.2},{:.2}",
            format_timestamp(bounds.start),
            format_timestamp(bounds.end),
            bucket(PnlBucket::Delta),
            bucket(PnlBucket::Basis),
            bucket(PnlBucket::AmtChng),
            bucket(PnlBucket::TxPnl),
            explanation.total()
        );
    }
    ExitCode::SUCCESS
}

fn run_risk(config_path: &Path, cli_addresses: &[String], output: Option<&Path>) -> ExitCode {
    let (config, ctx) = match setup(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let addresses = match resolve_addresses(cli_addresses, &config) {
        Ok(a) => a,
        Err(e) => return fail(e),
    };

    let view = match ctx.risk(&addresses) {
        Ok(v) => v,
        Err(e) => return fail(e),
    };
    for (underlying, value) in view.totals_by_underlying() {
        eprintln!("  {underlying}: {value:.2}");
    }
    eprintln!("  total: {:.2}", view.total());
    if !view.uncategorized.is_empty() {
        let assets: Vec<&str> = view.uncategorized.iter().map(String::as_str).collect();
        eprintln!("warning: no underlying for {}", assets.join(", "));
    }

    let csv = CsvAdapter::new();
    let written = match output {
        Some(path) => csv.write_exposure(&view, &path.display().to_string()),
        None => csv.exposure_to_writer(&view, io::stdout().lock()),
    };
    match written {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(e),
    }
}

fn run_categories(config_path: &Path, cli_addresses: &[String]) -> ExitCode {
    let (config, ctx) = match setup(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let addresses = match resolve_addresses(cli_addresses, &config) {
        Ok(a) => a,
        Err(e) => return fail(e),
    };

    eprintln!("{} assets mapped", ctx.categories().len());
    match ctx.missing_categories(&addresses) {
        Ok(missing) if missing.is_empty() => {
            eprintln!("All assets have an underlying");
            ExitCode::SUCCESS
        }
        Ok(missing) => {
            for asset in &missing {
                println!("{asset}");
            }
            fail(PlexError::MissingCategory { assets: missing })
        }
        Err(e) => fail(e),
    }
}

fn run_validate(config_path: &Path) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    match validate_config(&config) {
        Ok(()) => {
            eprintln!("Config OK");
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}
