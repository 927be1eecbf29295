//! On-chain transaction legs.

use serde::{Deserialize, Serialize};

/// One leg of a transaction. `amount` is signed: positive for receives,
/// negative for sends. Every leg of a transaction shares its `id` and `gas`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionLeg {
    pub id: String,
    pub timestamp: i64,
    pub chain: String,
    pub protocol: String,
    /// Gas paid for the whole transaction, in quote currency.
    pub gas: f64,
    #[serde(rename = "type")]
    pub kind: String,
    pub asset: String,
    pub amount: f64,
    pub price: Option<f64>,
    pub pnl: Option<f64>,
}

impl TransactionLeg {
    pub fn is_priced(&self) -> bool {
        self.price.is_some_and(f64::is_finite)
    }

    /// `amount * price`, or `None` for unpriced legs.
    pub fn priced_pnl(&self) -> Option<f64> {
        self.price
            .filter(|p| p.is_finite())
            .map(|price| self.pnl.unwrap_or(self.amount * price))
    }

    /// True when both legs describe the same movement of the same transaction.
    /// Price, pnl and gas are quotes taken at fetch time and may differ
    /// between two fetches of one leg.
    pub fn same_leg(&self, other: &TransactionLeg) -> bool {
        self.id == other.id
            && self.chain == other.chain
            && self.protocol == other.protocol
            && self.kind == other.kind
            && self.asset == other.asset
            && self.amount.to_bits() == other.amount.to_bits()
    }
}

/// Legs fetched for one address over one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionBatch {
    pub address: String,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub legs: Vec<TransactionLeg>,
}

impl TransactionBatch {
    pub fn new(address: &str, start_timestamp: i64, end_timestamp: i64, legs: Vec<TransactionLeg>) -> Self {
        Self {
            address: address.to_string(),
            start_timestamp,
            end_timestamp,
            legs,
        }
    }
}
