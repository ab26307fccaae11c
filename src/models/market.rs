//! Market data models: contracts, tickers, klines, and per-symbol snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A futures contract listed on the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    /// Contract symbol (e.g., "XBTUSDTM")
    pub symbol: String,

    /// Listing status, "Open" when tradeable
    pub status: String,
}

impl Contract {
    /// Whether the contract is currently open for trading.
    pub fn is_open(&self) -> bool {
        self.status == "Open"
    }
}

/// Latest ticker for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,

    /// Last traded price
    pub price: f64,

    /// 24h turnover in quote-currency units
    pub volume_24h: f64,

    /// Exchange timestamp (raw exchange units)
    pub timestamp: i64,
}

/// One candlestick row.
///
/// The exchange delivers rows as `[time, open, close, high, low, volume]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub time: i64,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
}

/// Normalized market state for one symbol.
///
/// Overwritten on every refresh; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub price: f64,

    /// 24h volume in quote-currency units
    pub volume_24h: f64,

    pub high_24h: f64,
    pub low_24h: f64,

    /// (high - low) / price, 0 when price is not positive
    pub volatility: f64,

    /// Normalized close-price trend in [-1, 1]
    #[serde(default)]
    pub trend_strength: f64,

    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Build a snapshot, deriving volatility from the 24h range.
    pub fn new(symbol: impl Into<String>, price: f64, volume_24h: f64, high_24h: f64, low_24h: f64) -> Self {
        let volatility = if price > 0.0 {
            (high_24h - low_24h) / price
        } else {
            0.0
        };

        Self {
            symbol: symbol.into(),
            price,
            volume_24h,
            high_24h,
            low_24h,
            volatility,
            trend_strength: 0.0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_trend(mut self, trend_strength: f64) -> Self {
        self.trend_strength = trend_strength.clamp(-1.0, 1.0);
        self
    }
}
