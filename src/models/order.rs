//! Order models for placement requests and exchange acknowledgements.

use serde::{Deserialize, Serialize};

/// Order side on the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }

    /// Stop trigger for this side: buy stops fire on a rise, sell stops on a fall.
    pub fn stop_direction(&self) -> StopDirection {
        match self {
            OrderSide::Buy => StopDirection::Up,
            OrderSide::Sell => StopDirection::Down,
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
        }
    }
}

/// Trigger direction for stop orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopDirection {
    /// Triggers when price rises to the stop price
    Up,
    /// Triggers when price falls to the stop price
    Down,
}

/// Parameters for placing an order.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub size: u64,
    pub leverage: u32,
    pub order_type: OrderType,

    /// Limit price, only sent for limit orders
    pub price: Option<f64>,

    /// Optional stop trigger
    pub stop: Option<(StopDirection, f64)>,
}

impl OrderRequest {
    /// Market order with no stop.
    pub fn market(symbol: impl Into<String>, side: OrderSide, size: u64, leverage: u32) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            size,
            leverage: leverage.max(1),
            order_type: OrderType::Market,
            price: None,
            stop: None,
        }
    }

    /// Limit order at `price`.
    pub fn limit(symbol: impl Into<String>, side: OrderSide, size: u64, leverage: u32, price: f64) -> Self {
        Self {
            order_type: OrderType::Limit,
            price: Some(price),
            ..Self::market(symbol, side, size, leverage)
        }
    }

    pub fn with_stop(mut self, direction: StopDirection, stop_price: f64) -> Self {
        self.stop = Some((direction, stop_price));
        self
    }
}

/// Order acknowledged by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub client_oid: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub size: u64,
    pub price: Option<f64>,
    pub leverage: u32,
    pub status: String,
}
