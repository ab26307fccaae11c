//! In-memory exchange for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Contract, Kline, Order, OrderRequest, Position, Ticker};

use super::{AccountOverview, FuturesExchange};

#[derive(Default)]
struct State {
    contracts: Vec<Contract>,
    tickers: HashMap<String, Ticker>,
    klines: HashMap<String, Vec<Kline>>,
    account: AccountOverview,
    positions: Vec<Position>,
    orders: Vec<OrderRequest>,
    closed: Vec<String>,
    leverage_calls: Vec<(String, u32)>,
    cancelled: Vec<String>,
    fail_account: bool,
    fail_klines: bool,
    fail_cancel: bool,
}

/// Exchange double with scripted responses and recorded calls.
#[derive(Default)]
pub struct MockExchange {
    state: Mutex<State>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(self, equity: f64, available: f64) -> Self {
        self.state.lock().unwrap().account = AccountOverview {
            account_equity: equity,
            available_balance: available,
            currency: "USDT".to_string(),
        };
        self
    }

    pub fn with_contract(self, symbol: &str, status: &str) -> Self {
        self.state.lock().unwrap().contracts.push(Contract {
            symbol: symbol.to_string(),
            status: status.to_string(),
        });
        self
    }

    pub fn with_ticker(self, symbol: &str, price: f64, volume: f64) -> Self {
        self.state.lock().unwrap().tickers.insert(
            symbol.to_string(),
            Ticker {
                symbol: symbol.to_string(),
                price,
                volume_24h: volume,
                timestamp: 0,
            },
        );
        self
    }

    pub fn with_klines(self, symbol: &str, klines: Vec<Kline>) -> Self {
        self.state
            .lock()
            .unwrap()
            .klines
            .insert(symbol.to_string(), klines);
        self
    }

    pub fn with_position(self, position: Position) -> Self {
        self.state.lock().unwrap().positions.push(position);
        self
    }

    pub fn failing_account(self) -> Self {
        self.state.lock().unwrap().fail_account = true;
        self
    }

    pub fn failing_klines(self) -> Self {
        self.state.lock().unwrap().fail_klines = true;
        self
    }

    pub fn failing_cancel(self) -> Self {
        self.state.lock().unwrap().fail_cancel = true;
        self
    }

    pub fn set_positions(&self, positions: Vec<Position>) {
        self.state.lock().unwrap().positions = positions;
    }

    pub fn placed_orders(&self) -> Vec<OrderRequest> {
        self.state.lock().unwrap().orders.clone()
    }

    pub fn closed_symbols(&self) -> Vec<String> {
        self.state.lock().unwrap().closed.clone()
    }

    pub fn leverage_calls(&self) -> Vec<(String, u32)> {
        self.state.lock().unwrap().leverage_calls.clone()
    }

    pub fn cancelled_orders(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled.clone()
    }
}

/// Candles with the given closes, a 1% range around each close, and constant volume.
pub fn klines_from_closes(closes: &[f64], volume: f64) -> Vec<Kline> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Kline {
            time: i as i64 * 60_000,
            open: close,
            close,
            high: close * 1.005,
            low: close * 0.995,
            volume,
        })
        .collect()
}

#[async_trait]
impl FuturesExchange for MockExchange {
    async fn get_contracts(&self) -> Result<Vec<Contract>> {
        Ok(self.state.lock().unwrap().contracts.clone())
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Option<Ticker>> {
        Ok(self.state.lock().unwrap().tickers.get(symbol).cloned())
    }

    async fn get_klines(
        &self,
        symbol: &str,
        _granularity: u32,
        _start: Option<i64>,
        _end: Option<i64>,
    ) -> Result<Vec<Kline>> {
        let state = self.state.lock().unwrap();
        if state.fail_klines {
            anyhow::bail!("Kline request failed: 503 Service Unavailable - ");
        }
        Ok(state.klines.get(symbol).cloned().unwrap_or_default())
    }

    async fn get_account_overview(&self, _currency: &str) -> Result<AccountOverview> {
        let state = self.state.lock().unwrap();
        if state.fail_account {
            anyhow::bail!("Account overview request failed: 500 Internal Server Error - ");
        }
        Ok(state.account.clone())
    }

    async fn get_positions(&self) -> Result<Vec<Position>> {
        Ok(self.state.lock().unwrap().positions.clone())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<Order> {
        let mut state = self.state.lock().unwrap();
        state.orders.push(request.clone());
        Ok(Order {
            order_id: format!("order-{}", state.orders.len()),
            client_oid: format!("client-{}", state.orders.len()),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            size: request.size,
            price: request.price,
            leverage: request.leverage,
            status: "pending".to_string(),
        })
    }

    async fn close_position(&self, symbol: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.closed.push(symbol.to_string());
        state.positions.retain(|p| p.symbol != symbol);
        Ok(true)
    }

    /// Succeeds once for each order ID handed out by `place_order`.
    async fn cancel_order(&self, order_id: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        if state.fail_cancel {
            anyhow::bail!("Cancel order request failed: 500 Internal Server Error - ");
        }
        let known = (1..=state.orders.len()).any(|n| format!("order-{}", n) == order_id);
        if !known || state.cancelled.iter().any(|id| id == order_id) {
            return Ok(false);
        }
        state.cancelled.push(order_id.to_string());
        Ok(true)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<bool> {
        self.state
            .lock()
            .unwrap()
            .leverage_calls
            .push((symbol.to_string(), leverage));
        Ok(true)
    }
}
