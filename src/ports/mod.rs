//! Port traits: the seams between domain logic and backends.

pub mod config_port;
pub mod report_port;
pub mod snapshot_store;
