//! Core domain types and logic.

pub mod attribution;
pub mod category;
pub mod config_validation;
pub mod error;
pub mod explain;
pub mod position;
pub mod risk;
pub mod timeline;
pub mod transaction;
pub mod tx_attribution;
