//! Trading signal proposed by a strategy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a signal asks the bot to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalType {
    Long,
    Short,
    Close,
    Hold,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Long => "LONG",
            SignalType::Short => "SHORT",
            SignalType::Close => "CLOSE",
            SignalType::Hold => "HOLD",
        }
    }

    /// Whether this signal opens a position.
    pub fn is_entry(&self) -> bool {
        matches!(self, SignalType::Long | SignalType::Short)
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Proposed trade.
///
/// Signals are treated as immutable once emitted: the risk layer derives an
/// adjusted copy instead of editing the original.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub signal_type: SignalType,
    pub symbol: String,

    /// Strategy confidence in [0, 1]
    pub confidence: f64,

    /// Reference entry price
    pub price: f64,

    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,

    /// Requested leverage, at least 1
    pub leverage: u32,

    pub reason: String,

    /// Name of the strategy that produced this signal
    pub strategy_name: String,

    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn new(signal_type: SignalType, symbol: impl Into<String>, confidence: f64, price: f64) -> Self {
        Self {
            signal_type,
            symbol: symbol.into(),
            confidence: confidence.clamp(0.0, 1.0),
            price,
            stop_loss: None,
            take_profit: None,
            leverage: 1,
            reason: String::new(),
            strategy_name: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_stops(mut self, stop_loss: Option<f64>, take_profit: Option<f64>) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }

    pub fn with_leverage(mut self, leverage: u32) -> Self {
        self.leverage = leverage.max(1);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Attribute the signal to the strategy that produced it.
    pub fn from_strategy(mut self, name: impl Into<String>) -> Self {
        self.strategy_name = name.into();
        self
    }
}
