//! Data models for market snapshots, positions, orders, signals, and trades.

mod market;
mod order;
mod position;
mod signal;
mod trade;

pub use market::{Contract, Kline, MarketSnapshot, Ticker};
pub use order::{Order, OrderRequest, OrderSide, OrderType, StopDirection};
pub use position::{Position, PositionSide};
pub use signal::{Signal, SignalType};
pub use trade::TradeRecord;
