//! Portfolio queries, position sizing, and order execution.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::api::FuturesExchange;
use crate::config::{validate_currency, RiskConfig};
use crate::models::{OrderRequest, OrderSide, Position, PositionSide, Signal, SignalType, TradeRecord};

use super::adaptive::AdaptiveRiskParameters;

/// Share of available balance usable as margin for one position.
const AVAILABLE_BALANCE_USAGE: f64 = 0.9;

/// Account state rebuilt from the exchange on every query.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PortfolioState {
    pub total_balance: f64,
    pub available_balance: f64,

    /// Sum over open positions
    pub unrealized_pnl: f64,

    pub positions: Vec<Position>,

    /// Realized P&L since the last daily reset
    pub daily_pnl: f64,

    /// Positions opened since the last daily reset
    pub trade_count: u32,
}

impl PortfolioState {
    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }
}

/// Why an open position should be exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of the trade history.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceStats {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub total_pnl: f64,
    pub win_rate: f64,
    pub average_pnl: f64,
}

impl std::fmt::Display for PerformanceStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Total Trades:      {}", self.total_trades)?;
        writeln!(f, "Winning:           {}", self.winning_trades)?;
        writeln!(f, "Losing:            {}", self.losing_trades)?;
        writeln!(f, "Win Rate:          {:.1}%", self.win_rate * 100.0)?;
        writeln!(f, "Total P&L:         {:.2}", self.total_pnl)?;
        writeln!(f, "Average P&L:       {:.2}", self.average_pnl)?;
        Ok(())
    }
}

/// Manages positions against the exchange and keeps the trade history.
pub struct PositionManager {
    exchange: Arc<dyn FuturesExchange>,
    config: RiskConfig,
    currency: String,
    trade_history: Vec<TradeRecord>,
    daily_pnl: f64,
    daily_trades: u32,
}

impl PositionManager {
    /// Create a manager settling in `currency`. Fails on an invalid currency code.
    pub fn new(exchange: Arc<dyn FuturesExchange>, config: RiskConfig, currency: &str) -> Result<Self> {
        Ok(Self {
            exchange,
            config,
            currency: validate_currency(currency)?,
            trade_history: Vec::new(),
            daily_pnl: 0.0,
            daily_trades: 0,
        })
    }

    #[cfg(test)]
    pub fn currency(&self) -> &str {
        &self.currency
    }

    #[cfg(test)]
    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn daily_pnl(&self) -> f64 {
        self.daily_pnl
    }

    /// Adopt adaptive bounds for sizing and leverage caps.
    pub fn apply_adaptive_parameters(&mut self, params: &AdaptiveRiskParameters) {
        params.apply_to(&mut self.config);
    }

    /// Fetch account and positions. Degrades to a zeroed portfolio on error.
    pub async fn get_portfolio_state(&self) -> PortfolioState {
        match self.fetch_portfolio().await {
            Ok(state) => state,
            Err(e) => {
                error!(error = %e, "Failed to get portfolio state");
                PortfolioState {
                    daily_pnl: self.daily_pnl,
                    trade_count: self.daily_trades,
                    ..PortfolioState::default()
                }
            }
        }
    }

    async fn fetch_portfolio(&self) -> Result<PortfolioState> {
        let account = self.exchange.get_account_overview(&self.currency).await?;
        let positions = self.exchange.get_positions().await?;
        let unrealized_pnl = positions.iter().map(|p| p.unrealized_pnl).sum();

        Ok(PortfolioState {
            total_balance: account.account_equity,
            available_balance: account.available_balance,
            unrealized_pnl,
            positions,
            daily_pnl: self.daily_pnl,
            trade_count: self.daily_trades,
        })
    }

    fn effective_leverage(&self, signal: &Signal) -> u32 {
        signal.leverage.min(self.config.max_leverage).max(1)
    }

    /// Contracts to trade for a signal. Zero when no balance is available,
    /// otherwise at least one.
    pub fn calculate_position_size(&self, signal: &Signal, portfolio: &PortfolioState) -> u64 {
        if portfolio.available_balance <= 0.0 || signal.price <= 0.0 {
            return 0;
        }

        let leverage = self.effective_leverage(signal) as f64;
        let max_position_value = portfolio.total_balance * self.config.max_position_size_percent / 100.0;
        let margin = (max_position_value / leverage)
            .min(portfolio.available_balance * AVAILABLE_BALANCE_USAGE);

        let size = (margin * leverage / signal.price).floor();
        if size.is_finite() && size >= 1.0 {
            size as u64
        } else {
            1
        }
    }

    /// Admission check for a new position.
    pub fn can_open_position(&self, signal: &Signal, portfolio: &PortfolioState) -> (bool, String) {
        if portfolio.positions.len() >= self.config.max_open_positions {
            return (false, "Maximum open positions reached".to_string());
        }

        if portfolio.position(&signal.symbol).is_some() {
            return (false, format!("Already in position for {}", signal.symbol));
        }

        let daily_loss_limit = portfolio.total_balance * self.config.max_daily_loss_percent / 100.0;
        if self.daily_pnl < -daily_loss_limit {
            return (false, "Daily loss limit reached".to_string());
        }

        if self.calculate_position_size(signal, portfolio) == 0 {
            return (false, "Insufficient balance for position".to_string());
        }

        (true, "OK".to_string())
    }

    /// Open a market position for an entry signal. Returns the order ID.
    pub async fn open_position(&mut self, signal: &Signal, strategy_name: &str) -> Option<String> {
        let side = match signal.signal_type {
            SignalType::Long => OrderSide::Buy,
            SignalType::Short => OrderSide::Sell,
            SignalType::Close | SignalType::Hold => return None,
        };

        let portfolio = self.get_portfolio_state().await;
        let (allowed, reason) = self.can_open_position(signal, &portfolio);
        if !allowed {
            warn!(symbol = %signal.symbol, reason = %reason, "Cannot open position");
            return None;
        }

        let size = self.calculate_position_size(signal, &portfolio);
        let leverage = self.effective_leverage(signal);

        match self.exchange.set_leverage(&signal.symbol, leverage).await {
            Ok(true) => {}
            Ok(false) => warn!(symbol = %signal.symbol, leverage = leverage, "Leverage change rejected"),
            Err(e) => warn!(symbol = %signal.symbol, error = %e, "Failed to set leverage"),
        }

        let request = OrderRequest::market(&signal.symbol, side, size, leverage);
        match self.exchange.place_order(&request).await {
            Ok(order) => {
                self.daily_trades += 1;
                info!(
                    symbol = %signal.symbol,
                    side = side.as_str(),
                    size = size,
                    leverage = leverage,
                    strategy = %strategy_name,
                    order_id = %order.order_id,
                    "Opened position"
                );
                Some(order.order_id)
            }
            Err(e) => {
                error!(symbol = %signal.symbol, error = %e, "Failed to open position");
                None
            }
        }
    }

    /// Close the position for `symbol` and record the realized P&L.
    pub async fn close_position(
        &mut self,
        symbol: &str,
        strategy_name: &str,
        exit_price: f64,
    ) -> Option<TradeRecord> {
        let portfolio = self.get_portfolio_state().await;
        let Some(position) = portfolio.position(symbol).cloned() else {
            warn!(symbol = %symbol, "No position found");
            return None;
        };

        match self.exchange.close_position(symbol).await {
            Ok(true) => {
                let pnl = position.realized_pnl(exit_price);
                let record = TradeRecord {
                    symbol: symbol.to_string(),
                    side: position.side,
                    entry_price: position.entry_price,
                    exit_price,
                    size: position.size,
                    leverage: position.leverage,
                    pnl,
                    strategy_name: strategy_name.to_string(),
                    closed_at: Utc::now(),
                };

                self.trade_history.push(record.clone());
                self.daily_pnl += pnl;

                info!(symbol = %symbol, pnl = pnl, "Closed position");
                Some(record)
            }
            Ok(false) => {
                warn!(symbol = %symbol, "Close position rejected by exchange");
                None
            }
            Err(e) => {
                error!(symbol = %symbol, error = %e, "Failed to close position");
                None
            }
        }
    }

    /// Stop or target hit for an open position at `current_price`.
    pub fn exit_trigger(
        position: &Position,
        current_price: f64,
        stop_loss: f64,
        take_profit: f64,
    ) -> Option<ExitReason> {
        match position.side {
            PositionSide::Long => {
                if current_price <= stop_loss {
                    Some(ExitReason::StopLoss)
                } else if current_price >= take_profit {
                    Some(ExitReason::TakeProfit)
                } else {
                    None
                }
            }
            PositionSide::Short => {
                if current_price >= stop_loss {
                    Some(ExitReason::StopLoss)
                } else if current_price <= take_profit {
                    Some(ExitReason::TakeProfit)
                } else {
                    None
                }
            }
        }
    }

    /// Check the live position for `symbol` against its stop and target.
    pub async fn check_stop_loss_take_profit(
        &self,
        symbol: &str,
        current_price: f64,
        stop_loss: f64,
        take_profit: f64,
    ) -> Option<ExitReason> {
        let portfolio = self.get_portfolio_state().await;
        portfolio
            .position(symbol)
            .and_then(|p| Self::exit_trigger(p, current_price, stop_loss, take_profit))
    }

    /// Cancel an open order. Failures are logged and reported as `false`.
    pub async fn cancel_order(&self, order_id: &str) -> bool {
        match self.exchange.cancel_order(order_id).await {
            Ok(cancelled) => cancelled,
            Err(e) => {
                error!(order_id = %order_id, error = %e, "Failed to cancel order");
                false
            }
        }
    }

    /// Most recent `limit` trades, oldest first.
    pub fn get_trade_history(&self, limit: usize) -> &[TradeRecord] {
        let start = self.trade_history.len().saturating_sub(limit);
        &self.trade_history[start..]
    }

    /// Drop all but the most recent `keep` trades.
    pub fn trim_trade_history(&mut self, keep: usize) {
        let excess = self.trade_history.len().saturating_sub(keep);
        self.trade_history.drain(..excess);
    }

    pub fn get_performance_stats(&self) -> PerformanceStats {
        let total_trades = self.trade_history.len();
        if total_trades == 0 {
            return PerformanceStats::default();
        }

        let winning_trades = self.trade_history.iter().filter(|t| t.is_win()).count();
        let total_pnl: f64 = self.trade_history.iter().map(|t| t.pnl).sum();

        PerformanceStats {
            total_trades,
            winning_trades,
            losing_trades: total_trades - winning_trades,
            total_pnl,
            win_rate: winning_trades as f64 / total_trades as f64,
            average_pnl: total_pnl / total_trades as f64,
        }
    }

    /// Start a new trading day.
    pub fn reset_daily_stats(&mut self) {
        self.daily_pnl = 0.0;
        self.daily_trades = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockExchange;

    fn position(symbol: &str, side: PositionSide, entry: f64) -> Position {
        Position {
            symbol: symbol.to_string(),
            side,
            size: 10,
            entry_price: entry,
            leverage: 5,
            unrealized_pnl: 0.0,
            margin: 100.0,
        }
    }

    fn manager(exchange: MockExchange) -> (Arc<MockExchange>, PositionManager) {
        let exchange = Arc::new(exchange);
        let pm = PositionManager::new(exchange.clone(), RiskConfig::default(), "usdt").unwrap();
        (exchange, pm)
    }

    fn signal(symbol: &str) -> Signal {
        Signal::new(SignalType::Long, symbol, 0.8, 100.0).with_leverage(5)
    }

    #[test]
    fn test_rejects_invalid_currency() {
        let exchange: Arc<dyn FuturesExchange> = Arc::new(MockExchange::new());
        assert!(PositionManager::new(exchange, RiskConfig::default(), "US$").is_err());
    }

    #[tokio::test]
    async fn test_portfolio_state() {
        let (_, pm) = manager(
            MockExchange::new()
                .with_account(10_000.0, 8_000.0)
                .with_position(Position {
                    unrealized_pnl: -25.0,
                    ..position("XBTUSDTM", PositionSide::Long, 100.0)
                }),
        );
        assert_eq!(pm.currency(), "USDT");

        let state = pm.get_portfolio_state().await;
        assert_eq!(state.total_balance, 10_000.0);
        assert_eq!(state.available_balance, 8_000.0);
        assert_eq!(state.unrealized_pnl, -25.0);
        assert_eq!(state.positions.len(), 1);
    }

    #[tokio::test]
    async fn test_portfolio_state_degrades_on_error() {
        let (_, pm) = manager(MockExchange::new().failing_account());
        let state = pm.get_portfolio_state().await;
        assert_eq!(state.total_balance, 0.0);
        assert!(state.positions.is_empty());
    }

    #[test]
    fn test_position_size() {
        let (_, pm) = manager(MockExchange::new());
        let state = PortfolioState {
            total_balance: 10_000.0,
            available_balance: 10_000.0,
            ..PortfolioState::default()
        };
        // 500 margin budget / 5x = 100 margin, 100 * 5 / 100 = 5 contracts
        assert_eq!(pm.calculate_position_size(&signal("XBTUSDTM"), &state), 5);

        let poor = PortfolioState {
            available_balance: 0.0,
            ..state.clone()
        };
        assert_eq!(pm.calculate_position_size(&signal("XBTUSDTM"), &poor), 0);

        let pricey = Signal::new(SignalType::Long, "XBTUSDTM", 0.8, 1_000_000.0);
        assert_eq!(pm.calculate_position_size(&pricey, &state), 1);
    }

    #[test]
    fn test_can_open_position() {
        let (_, pm) = manager(MockExchange::new());
        let mut state = PortfolioState {
            total_balance: 10_000.0,
            available_balance: 10_000.0,
            positions: vec![position("XBTUSDTM", PositionSide::Long, 100.0)],
            ..PortfolioState::default()
        };

        let (allowed, reason) = pm.can_open_position(&signal("XBTUSDTM"), &state);
        assert!(!allowed);
        assert!(reason.contains("Already in position"));

        assert!(pm.can_open_position(&signal("ETHUSDTM"), &state).0);

        state.positions = (0..5)
            .map(|i| position(&format!("SYM{}USDTM", i), PositionSide::Long, 100.0))
            .collect();
        let (allowed, reason) = pm.can_open_position(&signal("ETHUSDTM"), &state);
        assert!(!allowed);
        assert_eq!(reason, "Maximum open positions reached");
    }

    #[test]
    fn test_exit_triggers() {
        let long = position("XBTUSDTM", PositionSide::Long, 100.0);
        assert_eq!(PositionManager::exit_trigger(&long, 94.0, 95.0, 110.0), Some(ExitReason::StopLoss));
        assert_eq!(PositionManager::exit_trigger(&long, 111.0, 95.0, 110.0), Some(ExitReason::TakeProfit));
        assert_eq!(PositionManager::exit_trigger(&long, 100.0, 95.0, 110.0), None);

        let short = position("XBTUSDTM", PositionSide::Short, 100.0);
        assert_eq!(PositionManager::exit_trigger(&short, 106.0, 105.0, 90.0), Some(ExitReason::StopLoss));
        assert_eq!(PositionManager::exit_trigger(&short, 89.0, 105.0, 90.0), Some(ExitReason::TakeProfit));
    }

    #[tokio::test]
    async fn test_open_position_places_market_order() {
        let (exchange, mut pm) = manager(MockExchange::new().with_account(10_000.0, 10_000.0));

        let order_id = pm.open_position(&signal("XBTUSDTM").with_leverage(50), "TrendFollowing").await;
        assert!(order_id.is_some());

        let orders = exchange.placed_orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, OrderSide::Buy);
        assert_eq!(orders[0].leverage, 10);
        assert_eq!(exchange.leverage_calls(), vec![("XBTUSDTM".to_string(), 10)]);
        assert_eq!(pm.get_portfolio_state().await.trade_count, 1);
    }

    #[tokio::test]
    async fn test_cancel_order() {
        let (exchange, mut pm) = manager(MockExchange::new().with_account(10_000.0, 10_000.0));
        let order_id = pm.open_position(&signal("XBTUSDTM"), "Scalping").await.unwrap();

        assert!(pm.cancel_order(&order_id).await);
        assert_eq!(exchange.cancelled_orders(), vec![order_id.clone()]);

        // already cancelled, and never placed
        assert!(!pm.cancel_order(&order_id).await);
        assert!(!pm.cancel_order("missing").await);
    }

    #[tokio::test]
    async fn test_cancel_order_error_reports_false() {
        let (exchange, mut pm) = manager(
            MockExchange::new()
                .with_account(10_000.0, 10_000.0)
                .failing_cancel(),
        );
        let order_id = pm.open_position(&signal("XBTUSDTM"), "Scalping").await.unwrap();

        assert!(!pm.cancel_order(&order_id).await);
        assert!(exchange.cancelled_orders().is_empty());
    }

    #[tokio::test]
    async fn test_close_position_records_trade() {
        let (exchange, mut pm) = manager(
            MockExchange::new()
                .with_account(10_000.0, 10_000.0)
                .with_position(position("XBTUSDTM", PositionSide::Short, 100.0)),
        );

        let record = pm.close_position("XBTUSDTM", "Scalping", 90.0).await.unwrap();
        // 10% return x 10 contracts x 5x
        assert!((record.pnl - 5.0).abs() < 1e-9);
        assert_eq!(record.strategy_name, "Scalping");
        assert_eq!(exchange.closed_symbols(), vec!["XBTUSDTM".to_string()]);
        assert!((pm.daily_pnl() - 5.0).abs() < 1e-9);

        assert!(pm.close_position("XBTUSDTM", "Scalping", 90.0).await.is_none());

        let stats = pm.get_performance_stats();
        assert_eq!(stats.total_trades, 1);
        assert_eq!(stats.win_rate, 1.0);

        pm.reset_daily_stats();
        assert_eq!(pm.daily_pnl(), 0.0);
        assert_eq!(pm.get_trade_history(10).len(), 1);
    }

    #[tokio::test]
    async fn test_trade_history_trim() {
        let (exchange, mut pm) = manager(MockExchange::new().with_account(10_000.0, 10_000.0));
        for (i, exit) in [110.0, 95.0, 120.0].into_iter().enumerate() {
            let symbol = format!("SYM{}USDTM", i);
            exchange.set_positions(vec![position(&symbol, PositionSide::Long, 100.0)]);
            pm.close_position(&symbol, "Arbitrage", exit).await.unwrap();
        }

        assert_eq!(pm.get_trade_history(2).len(), 2);
        assert_eq!(pm.get_trade_history(2)[1].exit_price, 120.0);

        let stats = pm.get_performance_stats();
        assert_eq!(stats.winning_trades, 2);
        assert_eq!(stats.losing_trades, 1);

        pm.trim_trade_history(1);
        assert_eq!(pm.get_trade_history(10).len(), 1);
        assert_eq!(pm.get_trade_history(10)[0].symbol, "SYM2USDTM");
    }
}
