//! Position model: a point-in-time copy of an exchange-owned position.

use serde::{Deserialize, Serialize};

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }

    /// Side from a signed exchange quantity.
    pub fn from_qty(qty: f64) -> Self {
        if qty > 0.0 {
            PositionSide::Long
        } else {
            PositionSide::Short
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Open futures position as reported by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,

    /// Number of contracts held
    pub size: u64,

    /// Average entry price
    pub entry_price: f64,

    pub leverage: u32,

    /// Unrealized P&L in settlement currency
    pub unrealized_pnl: f64,

    /// Margin posted for this position
    pub margin: f64,
}

impl Position {
    /// Directional return of `exit_price` against the entry price.
    pub fn return_pct(&self, exit_price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        match self.side {
            PositionSide::Long => (exit_price - self.entry_price) / self.entry_price,
            PositionSide::Short => (self.entry_price - exit_price) / self.entry_price,
        }
    }

    /// Realized P&L if closed at `exit_price`: return x size x leverage.
    pub fn realized_pnl(&self, exit_price: f64) -> f64 {
        self.return_pct(exit_price) * self.size as f64 * self.leverage as f64
    }
}
