//! PostgreSQL snapshot store.

use crate::domain::error::PlexError;
use crate::domain::position::{PortfolioSnapshot, PositionKey, PositionRecord};
use crate::domain::transaction::{TransactionBatch, TransactionLeg};
use crate::ports::config_port::ConfigPort;
use crate::ports::snapshot_store::{validate_address, SnapshotStore, Table};
use postgres::types::ToSql;
use postgres::{Client, NoTls};
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;
use std::collections::BTreeSet;
use tracing::debug;

type Manager = PostgresConnectionManager<NoTls>;

pub struct PostgresAdapter {
    pool: Pool<Manager>,
}

fn query_error(e: postgres::Error) -> PlexError {
    PlexError::DatabaseQuery {
        reason: e.to_string(),
    }
}

/// Addresses are lowercased so `0xABC` and `0xabc` share one table, as they
/// do under SQLite.
fn raw_table_name(table: Table, address: &str) -> Result<String, PlexError> {
    validate_address(address)?;
    Ok(format!("{}_{}", table.name(), address.to_ascii_lowercase()))
}

fn table_name(table: Table, address: &str) -> Result<String, PlexError> {
    Ok(format!("\"{}\"", raw_table_name(table, address)?))
}

impl PostgresAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, PlexError> {
        let connection_string = config
            .get_string("store", "connection_string")
            .ok_or_else(|| PlexError::ConfigMissing {
                section: "store".into(),
                key: "connection_string".into(),
            })?;

        let pg_config = connection_string
            .parse::<postgres::Config>()
            .map_err(|e| PlexError::ConfigInvalid {
                section: "store".into(),
                key: "connection_string".into(),
                reason: e.to_string(),
            })?;

        let pool_size = config.get_int("store", "pool_size", 4).max(1) as u32;
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(PostgresConnectionManager::new(pg_config, NoTls))
            .map_err(|e: r2d2::Error| PlexError::Database {
                reason: e.to_string(),
            })?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<Manager>, PlexError> {
        self.pool.get().map_err(|e| PlexError::Database {
            reason: e.to_string(),
        })
    }

    fn table_exists(client: &mut Client, table: Table, address: &str) -> Result<bool, PlexError> {
        let name = raw_table_name(table, address)?;
        let row = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = $1)",
                &[&name],
            )
            .map_err(query_error)?;
        Ok(row.get(0))
    }

    fn ensure_tables(client: &mut Client, address: &str) -> Result<(), PlexError> {
        let snapshots = table_name(Table::Snapshots, address)?;
        let transactions = table_name(Table::Transactions, address)?;
        client
            .batch_execute(&format!(
                "CREATE TABLE IF NOT EXISTS {snapshots} (
                    chain TEXT NOT NULL,
                    protocol TEXT NOT NULL,
                    hold_mode TEXT NOT NULL,
                    \"type\" TEXT NOT NULL,
                    asset TEXT NOT NULL,
                    amount DOUBLE PRECISION NOT NULL,
                    price DOUBLE PRECISION NOT NULL,
                    value DOUBLE PRECISION NOT NULL,
                    \"timestamp\" BIGINT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS {transactions} (
                    id TEXT NOT NULL,
                    \"timestamp\" BIGINT NOT NULL,
                    chain TEXT NOT NULL,
                    protocol TEXT NOT NULL,
                    gas DOUBLE PRECISION NOT NULL,
                    \"type\" TEXT NOT NULL,
                    asset TEXT NOT NULL,
                    amount DOUBLE PRECISION NOT NULL,
                    price DOUBLE PRECISION,
                    pnl DOUBLE PRECISION,
                    batch_start BIGINT NOT NULL,
                    batch_end BIGINT NOT NULL
                );"
            ))
            .map_err(query_error)
    }
}

impl SnapshotStore for PostgresAdapter {
    fn all_timestamps(&self, address: &str, table: Table) -> Result<BTreeSet<i64>, PlexError> {
        let mut client = self.conn()?;
        if !Self::table_exists(&mut client, table, address)? {
            return Ok(BTreeSet::new());
        }

        let query = format!(
            "SELECT DISTINCT \"timestamp\" FROM {}",
            table_name(table, address)?
        );
        let rows = client.query(query.as_str(), &[]).map_err(query_error)?;
        Ok(rows.into_iter().map(|row| row.get::<_, i64>(0)).collect())
    }

    fn insert_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<(), PlexError> {
        let mut client = self.conn()?;
        Self::ensure_tables(&mut client, &snapshot.address)?;
        let table = table_name(Table::Snapshots, &snapshot.address)?;
        let query = format!(
            "INSERT INTO {table} (chain, protocol, hold_mode, \"type\", asset, amount, price, value, \"timestamp\") \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        );

        let mut tx = client.transaction().map_err(query_error)?;
        let stmt = tx.prepare(&query).map_err(query_error)?;
        for p in &snapshot.positions {
            let params: &[&(dyn ToSql + Sync)] = &[
                &p.key.chain,
                &p.key.protocol,
                &p.key.hold_mode,
                &p.key.kind,
                &p.key.asset,
                &p.amount,
                &p.price,
                &p.value,
                &snapshot.timestamp,
            ];
            tx.execute(&stmt, params).map_err(query_error)?;
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
        let mut client = self.conn()?;
        Self::ensure_tables(&mut client, &batch.address)?;
        let table = table_name(Table::Transactions, &batch.address)?;
        let query = format!(
            "INSERT INTO {table} (id, \"timestamp\", chain, protocol, gas, \"type\", asset, amount, price, pnl, batch_start, batch_end) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        );

        let mut tx = client.transaction().map_err(query_error)?;
        let stmt = tx.prepare(&query).map_err(query_error)?;
        for leg in &batch.legs {
            let params: &[&(dyn ToSql + Sync)] = &[
                &leg.id,
                &leg.timestamp,
                &leg.chain,
                &leg.protocol,
                &leg.gas,
                &leg.kind,
                &leg.asset,
                &leg.amount,
                &leg.price,
                &leg.pnl,
                &batch.start_timestamp,
                &batch.end_timestamp,
            ];
            tx.execute(&stmt, params).map_err(query_error)?;
        }
        tx.commit().map_err(query_error)?;

        debug!(
            address = %batch.address,
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
        let mut client = self.conn()?;
        if !Self::table_exists(&mut client, Table::Snapshots, address)? {
            return Ok(Vec::new());
        }

        let query = format!(
            "SELECT chain, protocol, hold_mode, \"type\", asset, amount, price, value, \"timestamp\" \
             FROM {} \
             WHERE \"timestamp\" >= $1 AND \"timestamp\" <= $2 \
             ORDER BY \"timestamp\" ASC",
            table_name(Table::Snapshots, address)?
        );
        let rows = client
            .query(query.as_str(), &[&start, &end])
            .map_err(query_error)?;

        Ok(rows
            .into_iter()
            .map(|row| PositionRecord {
                key: PositionKey {
                    chain: row.get(0),
                    protocol: row.get(1),
                    hold_mode: row.get(2),
                    kind: row.get(3),
                    asset: row.get(4),
                },
                amount: row.get(5),
                price: row.get(6),
                value: row.get(7),
                address: address.to_string(),
                timestamp: row.get(8),
            })
            .collect())
    }

    fn transactions_between(
        &self,
        address: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<TransactionLeg>, PlexError> {
        let mut client = self.conn()?;
        if !Self::table_exists(&mut client, Table::Transactions, address)? {
            return Ok(Vec::new());
        }

        let query = format!(
            "SELECT id, \"timestamp\", chain, protocol, gas, \"type\", asset, amount, price, pnl \
             FROM {} \
             WHERE \"timestamp\" >= $1 AND \"timestamp\" <= $2 \
             ORDER BY \"timestamp\" ASC",
            table_name(Table::Transactions, address)?
        );
        let rows = client
            .query(query.as_str(), &[&start, &end])
            .map_err(query_error)?;

        Ok(rows
            .into_iter()
            .map(|row| TransactionLeg {
                id: row.get(0),
                timestamp: row.get(1),
                chain: row.get(2),
                protocol: row.get(3),
                gas: row.get(4),
                kind: row.get(5),
                asset: row.get(6),
                amount: row.get(7),
                price: row.get(8),
                pnl: row.get(9),
            })
            .collect())
    }
}
