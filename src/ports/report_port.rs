//! Report output port trait.

use crate::domain::attribution::AttributionRow;
use crate::domain::error::PlexError;
use crate::domain::risk::RiskView;
use crate::domain::tx_attribution::TxPnlRow;

/// Port for writing attribution results.
pub trait ReportPort {
    fn write_attribution(&self, rows: &[AttributionRow], output_path: &str) -> Result<(), PlexError>;

    fn write_transactions(&self, rows: &[TxPnlRow], output_path: &str) -> Result<(), PlexError>;

    fn write_exposure(&self, view: &RiskView, output_path: &str) -> Result<(), PlexError>;
}
