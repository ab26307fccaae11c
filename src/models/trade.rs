//! Completed trade record kept in the in-memory trade history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PositionSide;

/// Record of a closed position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    pub exit_price: f64,

    /// Contracts closed
    pub size: u64,

    pub leverage: u32,

    /// Realized P&L
    pub pnl: f64,

    /// Strategy that opened the position
    pub strategy_name: String,

    /// When the position was closed
    pub closed_at: DateTime<Utc>,
}

impl TradeRecord {
    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}
