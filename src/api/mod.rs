//! Exchange access: the futures exchange interface and its KuCoin implementation.

mod client;
#[cfg(test)]
pub mod mock;
mod types;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Contract, Kline, Order, OrderRequest, Position, Ticker};

pub use client::KucoinClient;
pub use types::AccountOverview;

/// Operations the trading core needs from a perpetual-futures exchange.
///
/// Every call is a single request with no retry; callers decide how to
/// degrade on failure.
#[async_trait]
pub trait FuturesExchange: Send + Sync {
    /// All listed contracts with their status.
    async fn get_contracts(&self) -> Result<Vec<Contract>>;

    /// Latest ticker, `None` when the exchange returns no data.
    async fn get_ticker(&self, symbol: &str) -> Result<Option<Ticker>>;

    /// Candles at `granularity` minutes, oldest first.
    async fn get_klines(
        &self,
        symbol: &str,
        granularity: u32,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<Kline>>;

    async fn get_account_overview(&self, currency: &str) -> Result<AccountOverview>;

    /// Open positions only.
    async fn get_positions(&self) -> Result<Vec<Position>>;

    async fn place_order(&self, request: &OrderRequest) -> Result<Order>;

    async fn close_position(&self, symbol: &str) -> Result<bool>;

    async fn cancel_order(&self, order_id: &str) -> Result<bool>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<bool>;
}
