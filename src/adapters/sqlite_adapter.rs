//! SQLite snapshot store: one table per address per logical table.

use crate::domain::error::PlexError;
use crate::domain::position::{PortfolioSnapshot, PositionKey, PositionRecord};
use crate::domain::transaction::{TransactionBatch, TransactionLeg};
use crate::ports::config_port::ConfigPort;
use crate::ports::snapshot_store::{validate_address, SnapshotStore, Table};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::collections::BTreeSet;
use tracing::debug;

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn pool_error(e: r2d2::Error) -> PlexError {
    PlexError::Database {
        reason: e.to_string(),
    }
}

fn query_error(e: rusqlite::Error) -> PlexError {
    PlexError::DatabaseQuery {
        reason: e.to_string(),
    }
}

/// Unquoted table name, e.g. `snapshots_0xabc`. SQLite matches table names
/// without regard to case, so the address is lowercased to keep
/// `sqlite_master` lookups in step with `CREATE TABLE IF NOT EXISTS`.
fn raw_table_name(table: Table, address: &str) -> Result<String, PlexError> {
    validate_address(address)?;
    Ok(format!("{}_{}", table.name(), address.to_ascii_lowercase()))
}

/// Quoted table name, e.g. `"snapshots_0xabc"`.
fn table_name(table: Table, address: &str) -> Result<String, PlexError> {
    Ok(format!("\"{}\"", raw_table_name(table, address)?))
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, PlexError> {
        let db_path = config
            .get_string("store", "path")
            .ok_or_else(|| PlexError::ConfigMissing {
                section: "store".into(),
                key: "path".into(),
            })?;

        let pool_size = config.get_int("store", "pool_size", 4).max(1) as u32;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(pool_error)?;

        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, PlexError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(pool_error)?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, PlexError> {
        self.pool.get().map_err(pool_error)
    }

    fn table_exists(conn: &rusqlite::Connection, table: Table, address: &str) -> Result<bool, PlexError> {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![raw_table_name(table, address)?],
                |row| row.get(0),
            )
            .map_err(query_error)?;
        Ok(count > 0)
    }

    fn ensure_tables(conn: &rusqlite::Connection, address: &str) -> Result<(), PlexError> {
        let snapshots = table_name(Table::Snapshots, address)?;
        let transactions = table_name(Table::Transactions, address)?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {snapshots} (
                chain TEXT NOT NULL,
                protocol TEXT NOT NULL,
                hold_mode TEXT NOT NULL,
                type TEXT NOT NULL,
                asset TEXT NOT NULL,
                amount REAL NOT NULL,
                price REAL NOT NULL,
                value REAL NOT NULL,
                timestamp INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {transactions} (
                id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                chain TEXT NOT NULL,
                protocol TEXT NOT NULL,
                gas REAL NOT NULL,
                type TEXT NOT NULL,
                asset TEXT NOT NULL,
                amount REAL NOT NULL,
                price REAL,
                pnl REAL,
                batch_start INTEGER NOT NULL,
                batch_end INTEGER NOT NULL
            );"
        ))
        .map_err(query_error)
    }
}

impl SnapshotStore for SqliteAdapter {
    fn all_timestamps(&self, address: &str, table: Table) -> Result<BTreeSet<i64>, PlexError> {
        let conn = self.conn()?;
        if !Self::table_exists(&conn, table, address)? {
            return Ok(BTreeSet::new());
        }

        let query = format!("SELECT DISTINCT timestamp FROM {}", table_name(table, address)?);
        let mut stmt = conn.prepare(&query).map_err(query_error)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, i64>(0))
            .map_err(query_error)?;

        let mut timestamps = BTreeSet::new();
        for row in rows {
            timestamps.insert(row.map_err(query_error)?);
        }
        Ok(timestamps)
    }

    fn insert_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<(), PlexError> {
        let mut conn = self.conn()?;
        Self::ensure_tables(&conn, &snapshot.address)?;
        let table = table_name(Table::Snapshots, &snapshot.address)?;

        let tx = conn.transaction().map_err(query_error)?;
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO {table} (chain, protocol, hold_mode, type, asset, amount, price, value, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ))
                .map_err(query_error)?;
            for p in &snapshot.positions {
                stmt.execute(params![
                    p.key.chain,
                    p.key.protocol,
                    p.key.hold_mode,
                    p.key.kind,
                    p.key.asset,
                    p.amount,
                    p.price,
                    p.value,
                    snapshot.timestamp
                ])
                .map_err(query_error)?;
            }
        }
        tx.commit().map_err(query_error)?;

        debug!(
            address = %snapshot.address,
            timestamp = snapshot.timestamp,
            rows = snapshot.positions.len(),
            "inserted snapshot"
        );
        Ok(())
    }

    fn insert_transactions(&self, batch: &TransactionBatch) -> Result<(), PlexError> {
        let mut conn = self.conn()?;
        Self::ensure_tables(&conn, &batch.address)?;
        let table = table_name(Table::Transactions, &batch.address)?;

        let tx = conn.transaction().map_err(query_error)?;
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO {table} (id, timestamp, chain, protocol, gas, type, asset, amount, price, pnl, batch_start, batch_end)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ))
                .map_err(query_error)?;
            for leg in &batch.legs {
                stmt.execute(params![
                    leg.id,
                    leg.timestamp,
                    leg.chain,
                    leg.protocol,
                    leg.gas,
                    leg.kind,
                    leg.asset,
                    leg.amount,
                    leg.price,
                    leg.pnl,
                    batch.start_timestamp,
                    batch.end_timestamp
                ])
                .map_err(query_error)?;
            }
        }
        tx.commit().map_err(query_error)?;

        debug!(
            address = %batch.address,
            start = batch.start_timestamp,
            end = batch.end_timestamp,
            legs = batch.legs.len(),
            "inserted transactions"
        );
        Ok(())
    }

    fn positions_between(
        &self,
        address: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<PositionRecord>, PlexError> {
        let conn = self.conn()?;
        if !Self::table_exists(&conn, Table::Snapshots, address)? {
            return Ok(Vec::new());
        }

        let query = format!(
            "SELECT chain, protocol, hold_mode, type, asset, amount, price, value, timestamp
             FROM {}
             WHERE timestamp >= ?1 AND timestamp <= ?2
             ORDER BY timestamp ASC, rowid ASC",
            table_name(Table::Snapshots, address)?
        );
        let mut stmt = conn.prepare(&query).map_err(query_error)?;
        let rows = stmt
            .query_map(params![start, end], |row| {
                Ok(PositionRecord {
                    key: PositionKey {
                        chain: row.get(0)?,
                        protocol: row.get(1)?,
                        hold_mode: row.get(2)?,
                        kind: row.get(3)?,
                        asset: row.get(4)?,
                    },
                    amount: row.get(5)?,
                    price: row.get(6)?,
                    value: row.get(7)?,
                    address: address.to_string(),
                    timestamp: row.get(8)?,
                })
            })
            .map_err(query_error)?;

        let mut positions = Vec::new();
        for row in rows {
            positions.push(row.map_err(query_error)?);
        }
        Ok(positions)
    }

    fn transactions_between(
        &self,
        address: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<TransactionLeg>, PlexError> {
        let conn = self.conn()?;
        if !Self::table_exists(&conn, Table::Transactions, address)? {
            return Ok(Vec::new());
        }

        let query = format!(
            "SELECT id, timestamp, chain, protocol, gas, type, asset, amount, price, pnl
             FROM {}
             WHERE timestamp >= ?1 AND timestamp <= ?2
             ORDER BY timestamp ASC, rowid ASC",
            table_name(Table::Transactions, address)?
        );
        let mut stmt = conn.prepare(&query).map_err(query_error)?;
        let rows = stmt
            .query_map(params![start, end], |row| {
                Ok(TransactionLeg {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    chain: row.get(2)?,
                    protocol: row.get(3)?,
                    gas: row.get(4)?,
                    kind: row.get(5)?,
                    asset: row.get(6)?,
                    amount: row.get(7)?,
                    price: row.get(8)?,
                    pnl: row.get(9)?,
                })
            })
            .map_err(query_error)?;

        let mut legs = Vec::new();
        for row in rows {
            legs.push(row.map_err(query_error)?);
        }
        Ok(legs)
    }
}
