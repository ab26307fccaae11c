//! Bot runner: the single-owner trading loop.
//!
//! Each cycle:
//! - Rolls daily statistics over at the UTC date boundary
//! - Checks pause conditions against the live portfolio
//! - Refreshes active pairs and adaptive risk bounds on a timer
//! - Exits positions at their stop or target, or on a CLOSE signal
//! - Opens positions for approved entry signals

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::api::FuturesExchange;
use crate::config::BotConfig;
use crate::market::{MarketAnalyzer, PairScore, PriceHistory};
use crate::metrics::{MarketConditions, MetricsCalculator};
use crate::models::{Signal, SignalType, TradeRecord};
use crate::risk::{
    AdaptiveRiskParameters, PerformanceStats, PortfolioState, PositionManager, RiskController,
};
use crate::strategies::{StrategyManager, StrategyStats};

/// Prices needed before a pair is analyzed.
const MIN_ANALYSIS_HISTORY: usize = 50;

/// Closed trades kept in memory across daily rollovers.
const MAX_TRADE_HISTORY: usize = 10_000;

/// Closed trades shown in the status report.
const STATUS_RECENT_TRADES: usize = 10;

/// The signal behind an open position and the strategy credited with it.
#[derive(Debug, Clone)]
pub struct PendingSignal {
    pub signal: Signal,
    pub strategy_name: String,
}

/// Main bot runner.
pub struct Bot {
    config: BotConfig,
    market_analyzer: MarketAnalyzer,
    strategy_manager: StrategyManager,
    position_manager: PositionManager,
    risk_controller: RiskController,

    // Loop state
    active_pairs: Vec<PairScore>,
    history: HashMap<String, PriceHistory>,
    pending_signals: HashMap<String, PendingSignal>,
    last_refresh: Option<Instant>,
    trading_day: NaiveDate,

    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl Bot {
    pub fn new(config: BotConfig, exchange: Arc<dyn FuturesExchange>) -> Result<Self> {
        let market_analyzer = MarketAnalyzer::new(exchange.clone(), config.trading.clone());
        let position_manager =
            PositionManager::new(exchange, config.risk.clone(), &config.api.default_currency)?;
        let risk_controller = RiskController::new(config.risk.clone());

        Ok(Self {
            config,
            market_analyzer,
            strategy_manager: StrategyManager::default(),
            position_manager,
            risk_controller,
            active_pairs: Vec::new(),
            history: HashMap::new(),
            pending_signals: HashMap::new(),
            last_refresh: None,
            trading_day: Utc::now().date_naive(),
            running: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run until stopped or interrupted.
    pub async fn start(&mut self) -> Result<()> {
        info!(
            sandbox = self.config.api.sandbox,
            interval = self.config.trading.update_interval_seconds,
            adaptive = self.risk_controller.is_adaptive_mode(),
            "Starting trading bot"
        );
        self.running.store(true, Ordering::SeqCst);

        self.initialize().await;

        let running = self.running.clone();
        let wake = self.wake.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            running.store(false, Ordering::SeqCst);
            wake.notify_one();
        });

        let mut ticker = interval(Duration::from_secs(self.config.trading.update_interval_seconds));
        while self.is_running() {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
            }
            if !self.is_running() {
                break;
            }

            if let Err(e) = self.run_cycle().await {
                error!(error = %e, "Trading cycle error");
            }
        }

        self.stop();
        info!("Bot stopped");
        Ok(())
    }

    /// Request the loop to stop after the current cycle.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Stopping trading bot");
        }
        self.wake.notify_one();
    }

    async fn initialize(&mut self) {
        info!("Initializing bot...");
        self.risk_controller.reset_state();
        let portfolio = self.position_manager.get_portfolio_state().await;
        info!(
            balance = portfolio.total_balance,
            available = portfolio.available_balance,
            positions = portfolio.positions.len(),
            "Account loaded"
        );

        self.update_trading_pairs().await;
        self.last_refresh = Some(Instant::now());
    }

    fn refresh_due(&self) -> bool {
        let period = Duration::from_secs(self.config.trading.strategy_switch_interval);
        self.last_refresh.map_or(true, |at| at.elapsed() >= period)
    }

    /// Reset daily statistics when `today` differs from the current trading day,
    /// and bound the trade history.
    fn roll_daily(&mut self, today: NaiveDate) -> bool {
        if today == self.trading_day {
            return false;
        }
        info!(
            previous = %self.trading_day,
            daily_pnl = self.position_manager.daily_pnl(),
            "New trading day, resetting daily stats"
        );
        self.position_manager.reset_daily_stats();
        self.position_manager.trim_trade_history(MAX_TRADE_HISTORY);
        self.trading_day = today;
        true
    }

    /// One pass of the trading loop. While paused, stop and target exits are
    /// suspended along with new entries.
    pub async fn run_cycle(&mut self) -> Result<()> {
        debug!("Trading cycle");
        self.roll_daily(Utc::now().date_naive());

        let portfolio = self.position_manager.get_portfolio_state().await;
        if portfolio.total_balance <= 0.0 {
            warn!("No account balance available, skipping cycle");
            return Ok(());
        }

        // Positions closed outside the bot drop their entry levels.
        self.pending_signals
            .retain(|symbol, _| portfolio.position(symbol).is_some());

        let (should_pause, reason) = self.risk_controller.should_pause_trading(&portfolio);
        if should_pause {
            warn!(reason = %reason, "Trading paused");
            return Ok(());
        }

        let refresh = self.refresh_due();
        if refresh {
            self.update_trading_pairs().await;
        }

        let mut closed = self.check_positions(&portfolio).await;

        let symbols: Vec<String> = self.active_pairs.iter().map(|p| p.symbol.clone()).collect();
        for symbol in symbols {
            let Some(history) = self.market_analyzer.get_price_history(&symbol).await else {
                continue;
            };
            let enough = history.len() >= MIN_ANALYSIS_HISTORY;
            self.history.insert(symbol.clone(), history);
            if !enough {
                debug!(symbol = %symbol, "Not enough history to analyze");
                continue;
            }

            let Some(history) = self.history.get(&symbol) else {
                continue;
            };
            let Some(signal) =
                self.strategy_manager
                    .get_best_signal(&symbol, &history.prices, &history.volumes)
            else {
                continue;
            };

            if closed.contains(&symbol) {
                continue;
            }
            if signal.signal_type.is_entry() {
                self.process_signal(&signal, &portfolio).await;
            } else if signal.signal_type == SignalType::Close && portfolio.position(&symbol).is_some() {
                let strategy_name = self
                    .pending_signals
                    .get(&symbol)
                    .map(|p| p.strategy_name.clone())
                    .unwrap_or_else(|| signal.strategy_name.clone());
                if self
                    .close_and_record(&symbol, &strategy_name, signal.price, "signal")
                    .await
                {
                    closed.insert(symbol.clone());
                }
            }
        }

        for symbol in &closed {
            self.pending_signals.remove(symbol);
        }

        self.strategy_manager.auto_adjust_strategies();

        if refresh {
            self.update_adaptive_parameters();
            self.last_refresh = Some(Instant::now());
        }

        Ok(())
    }

    async fn update_trading_pairs(&mut self) {
        let pairs = self
            .market_analyzer
            .select_best_pairs(self.config.risk.max_open_positions)
            .await;

        for pair in &pairs {
            info!(symbol = %pair.symbol, score = pair.total_score, "Active pair");
        }
        self.history.retain(|symbol, _| pairs.iter().any(|p| &p.symbol == symbol));
        self.active_pairs = pairs;
    }

    /// Exit positions whose stop or target has been hit. Returns the closed symbols.
    async fn check_positions(&mut self, portfolio: &PortfolioState) -> HashSet<String> {
        let mut closed = HashSet::new();

        for position in &portfolio.positions {
            let symbol = &position.symbol;
            let Some(pending) = self.pending_signals.get(symbol) else {
                continue;
            };
            let (Some(stop_loss), Some(take_profit)) =
                (pending.signal.stop_loss, pending.signal.take_profit)
            else {
                continue;
            };
            let strategy_name = pending.strategy_name.clone();

            let Some(snapshot) = self.market_analyzer.get_market_data(symbol).await else {
                continue;
            };

            let Some(exit) = self
                .position_manager
                .check_stop_loss_take_profit(symbol, snapshot.price, stop_loss, take_profit)
                .await
            else {
                continue;
            };

            if self
                .close_and_record(symbol, &strategy_name, snapshot.price, exit.as_str())
                .await
            {
                closed.insert(symbol.clone());
            }
        }

        closed
    }

    /// Close a position and feed the result back into risk and strategy tracking.
    async fn close_and_record(
        &mut self,
        symbol: &str,
        strategy_name: &str,
        price: f64,
        reason: &str,
    ) -> bool {
        let Some(trade) = self
            .position_manager
            .close_position(symbol, strategy_name, price)
            .await
        else {
            return false;
        };

        info!(
            symbol = %symbol,
            reason = %reason,
            strategy = %strategy_name,
            pnl = trade.pnl,
            "Position exited"
        );
        self.risk_controller.on_trade_result(trade.pnl);
        self.strategy_manager
            .update_strategy_performance(strategy_name, trade.pnl);
        true
    }

    async fn process_signal(&mut self, signal: &Signal, portfolio: &PortfolioState) {
        let assessment = self.risk_controller.assess_signal(signal, portfolio);
        if !assessment.approved {
            info!(symbol = %signal.symbol, reason = %assessment.reason, "Signal rejected");
            return;
        }
        for warning in &assessment.warnings {
            warn!(symbol = %signal.symbol, warning = %warning, "Risk warning");
        }
        let Some(adjusted) = assessment.adjusted_signal else {
            return;
        };

        let (can_open, reason) = self.position_manager.can_open_position(&adjusted, portfolio);
        if !can_open {
            info!(symbol = %adjusted.symbol, reason = %reason, "Cannot open position");
            return;
        }

        let strategy_name = adjusted.strategy_name.clone();
        if let Some(order_id) = self.position_manager.open_position(&adjusted, &strategy_name).await {
            info!(
                symbol = %adjusted.symbol,
                side = %adjusted.signal_type,
                price = adjusted.price,
                order_id = %order_id,
                "Opened position"
            );
            self.pending_signals.insert(
                adjusted.symbol.clone(),
                PendingSignal {
                    signal: adjusted,
                    strategy_name,
                },
            );
        }
    }

    /// Recompute adaptive bounds from the cached history and recent trade results.
    fn update_adaptive_parameters(&mut self) {
        if !self.risk_controller.is_adaptive_mode() {
            return;
        }

        let conditions: Vec<MarketConditions> = self
            .active_pairs
            .iter()
            .filter_map(|p| self.history.get(&p.symbol))
            .filter(|h| !h.is_empty())
            .map(|h| MetricsCalculator::market_conditions(&h.prices, &h.volumes))
            .collect();
        let conditions = MetricsCalculator::average_conditions(&conditions);
        let performance = self.risk_controller.performance();

        if let Some(params) = self
            .risk_controller
            .update_adaptive_parameters(conditions.as_ref(), Some(&performance))
        {
            self.position_manager.apply_adaptive_parameters(&params);
        }
    }

    /// Snapshot of the bot's state.
    pub async fn status(&self) -> BotStatus {
        let portfolio = self.position_manager.get_portfolio_state().await;

        BotStatus {
            running: self.is_running(),
            total_balance: portfolio.total_balance,
            available_balance: portfolio.available_balance,
            unrealized_pnl: portfolio.unrealized_pnl,
            open_positions: portfolio.positions.len(),
            daily_pnl: portfolio.daily_pnl,
            active_pairs: self.active_pairs.iter().map(|p| p.symbol.clone()).collect(),
            strategies: self.strategy_manager.get_strategy_stats(),
            performance: self.position_manager.get_performance_stats(),
            recent_trades: self
                .position_manager
                .get_trade_history(STATUS_RECENT_TRADES)
                .to_vec(),
            adaptive_parameters: self.risk_controller.adaptive_parameters().copied(),
        }
    }
}

/// Bot status report.
#[derive(Debug, Clone, Serialize)]
pub struct BotStatus {
    pub running: bool,
    pub total_balance: f64,
    pub available_balance: f64,
    pub unrealized_pnl: f64,
    pub open_positions: usize,
    pub daily_pnl: f64,
    pub active_pairs: Vec<String>,
    pub strategies: Vec<StrategyStats>,
    pub performance: PerformanceStats,

    /// Most recent closed trades, oldest first
    pub recent_trades: Vec<TradeRecord>,

    /// Present only in adaptive mode after the first update
    pub adaptive_parameters: Option<AdaptiveRiskParameters>,
}

impl std::fmt::Display for BotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Bot Status ===")?;
        writeln!(f, "Status:          {}", if self.running { "Running" } else { "Stopped" })?;
        writeln!(f, "Total Balance:   ${:.2}", self.total_balance)?;
        writeln!(f, "Available:       ${:.2}", self.available_balance)?;
        writeln!(f, "Unrealized P&L:  ${:.2}", self.unrealized_pnl)?;
        writeln!(f, "Daily P&L:       ${:.2}", self.daily_pnl)?;
        writeln!(f, "Open Positions:  {}", self.open_positions)?;
        writeln!(f, "Active Pairs:    {}", self.active_pairs.join(", "))?;
        writeln!(f)?;
        writeln!(f, "=== Strategies ===")?;
        for stats in &self.strategies {
            writeln!(f, "{}", stats)?;
        }
        writeln!(f)?;
        writeln!(f, "=== Performance ===")?;
        write!(f, "{}", self.performance)?;
        if !self.recent_trades.is_empty() {
            writeln!(f)?;
            writeln!(f, "=== Recent Trades ===")?;
            for trade in &self.recent_trades {
                writeln!(
                    f,
                    "{} {:<14} {:<5} {:>12.4} -> {:>12.4}  pnl {:>10.2}  [{}]",
                    trade.closed_at.format("%Y-%m-%d %H:%M"),
                    trade.symbol,
                    trade.side,
                    trade.entry_price,
                    trade.exit_price,
                    trade.pnl,
                    trade.strategy_name
                )?;
            }
        }
        if let Some(params) = &self.adaptive_parameters {
            writeln!(f)?;
            writeln!(f, "=== Adaptive Risk ===")?;
            write!(f, "{}", params)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{klines_from_closes, MockExchange};
    use crate::models::{Position, PositionSide};
    use crate::strategies::Strategy;

    const SYMBOL: &str = "XBTUSDTM";

    /// Emits the configured signal type at the last price.
    struct Scripted(Option<SignalType>);

    impl Strategy for Scripted {
        fn name(&self) -> &str {
            "Scripted"
        }

        fn required_history_length(&self) -> usize {
            1
        }

        fn analyze(&mut self, symbol: &str, prices: &[f64], _volumes: &[f64]) -> Result<Option<Signal>> {
            let (Some(signal_type), Some(&price)) = (self.0, prices.last()) else {
                return Ok(None);
            };
            Ok(Some(
                Signal::new(signal_type, symbol, 0.8, price)
                    .with_stops(Some(price * 0.98), Some(price * 1.04))
                    .with_leverage(5)
                    .from_strategy(self.name()),
            ))
        }
    }

    fn exchange(price: f64) -> MockExchange {
        MockExchange::new()
            .with_account(10_000.0, 9_000.0)
            .with_contract(SYMBOL, "Open")
            .with_ticker(SYMBOL, price, 5_000_000.0)
            .with_klines(SYMBOL, klines_from_closes(&[100.0; 60], 1_000.0))
    }

    fn long_position(entry: f64) -> Position {
        Position {
            symbol: SYMBOL.to_string(),
            side: PositionSide::Long,
            size: 10,
            entry_price: entry,
            leverage: 5,
            unrealized_pnl: 0.0,
            margin: 200.0,
        }
    }

    fn bot(exchange: Arc<MockExchange>, signal: Option<SignalType>) -> Bot {
        let mut bot = Bot::new(BotConfig::default(), exchange).unwrap();
        bot.strategy_manager = StrategyManager::new(vec![Box::new(Scripted(signal))]);
        bot
    }

    fn pending(price: f64) -> PendingSignal {
        PendingSignal {
            signal: Signal::new(SignalType::Long, SYMBOL, 0.8, price)
                .with_stops(Some(95.0), Some(110.0))
                .from_strategy("Scripted"),
            strategy_name: "Scripted".to_string(),
        }
    }

    #[tokio::test]
    async fn test_cycle_opens_approved_signal() {
        let exchange = Arc::new(exchange(100.0));
        let mut bot = bot(exchange.clone(), Some(SignalType::Long));

        bot.run_cycle().await.unwrap();

        let orders = exchange.placed_orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].symbol, SYMBOL);
        assert_eq!(orders[0].size, 5);
        assert_eq!(exchange.leverage_calls(), vec![(SYMBOL.to_string(), 5)]);

        let pending = &bot.pending_signals[SYMBOL];
        assert_eq!(pending.strategy_name, "Scripted");
        assert!(pending.signal.stop_loss.is_some());
        assert_eq!(bot.active_pairs.len(), 1);
    }

    #[tokio::test]
    async fn test_cycle_skipped_without_balance() {
        let exchange = Arc::new(
            MockExchange::new()
                .with_contract(SYMBOL, "Open")
                .with_ticker(SYMBOL, 100.0, 5_000_000.0)
                .with_klines(SYMBOL, klines_from_closes(&[100.0; 60], 1_000.0)),
        );
        let mut bot = bot(exchange.clone(), Some(SignalType::Long));

        bot.run_cycle().await.unwrap();
        assert!(exchange.placed_orders().is_empty());
        assert!(bot.active_pairs.is_empty());
    }

    #[tokio::test]
    async fn test_cycle_paused_after_losses() {
        let exchange = Arc::new(exchange(100.0));
        let mut bot = bot(exchange.clone(), Some(SignalType::Long));
        for _ in 0..5 {
            bot.risk_controller.on_trade_result(-10.0);
        }

        bot.run_cycle().await.unwrap();
        assert!(exchange.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn test_paused_cycle_holds_exits() {
        let exchange = Arc::new(exchange(90.0).with_position(long_position(100.0)));
        let mut bot = bot(exchange.clone(), None);
        bot.pending_signals.insert(SYMBOL.to_string(), pending(100.0));
        for _ in 0..5 {
            bot.risk_controller.on_trade_result(-10.0);
        }

        bot.run_cycle().await.unwrap();

        assert!(exchange.closed_symbols().is_empty());
        assert!(bot.pending_signals.contains_key(SYMBOL));
    }

    #[tokio::test]
    async fn test_stop_loss_exit_feeds_back() {
        let exchange = Arc::new(exchange(90.0).with_position(long_position(100.0)));
        let mut bot = bot(exchange.clone(), None);
        bot.pending_signals.insert(SYMBOL.to_string(), pending(100.0));

        bot.run_cycle().await.unwrap();

        assert_eq!(exchange.closed_symbols(), vec![SYMBOL.to_string()]);
        assert!(bot.pending_signals.is_empty());
        assert_eq!(bot.risk_controller.consecutive_losses(), 1);
        assert!(bot.position_manager.daily_pnl() < 0.0);

        let stats = bot.strategy_manager.get_strategy_stats();
        assert_eq!(stats[0].total_trades, 1);
        assert!(bot.strategy_manager.performance_score("Scripted").unwrap() < 0.5);
    }

    #[tokio::test]
    async fn test_position_inside_band_is_held() {
        let exchange = Arc::new(exchange(102.0).with_position(long_position(100.0)));
        let mut bot = bot(exchange.clone(), None);
        bot.pending_signals.insert(SYMBOL.to_string(), pending(100.0));

        bot.run_cycle().await.unwrap();

        assert!(exchange.closed_symbols().is_empty());
        assert!(bot.pending_signals.contains_key(SYMBOL));
    }

    #[tokio::test]
    async fn test_pending_signal_dropped_when_position_gone() {
        let exchange = Arc::new(exchange(100.0));
        let mut bot = bot(exchange.clone(), None);
        bot.pending_signals.insert(SYMBOL.to_string(), pending(100.0));

        bot.run_cycle().await.unwrap();

        assert!(bot.pending_signals.is_empty());
        assert!(exchange.closed_symbols().is_empty());
    }

    #[tokio::test]
    async fn test_close_signal_exits_held_symbol() {
        let exchange = Arc::new(exchange(100.0).with_position(long_position(95.0)));
        let mut bot = bot(exchange.clone(), Some(SignalType::Close));

        bot.run_cycle().await.unwrap();

        assert_eq!(exchange.closed_symbols(), vec![SYMBOL.to_string()]);
        assert_eq!(bot.risk_controller.consecutive_losses(), 0);
        assert!(exchange.placed_orders().is_empty());

        let status = bot.status().await;
        assert_eq!(status.recent_trades.len(), 1);
        assert_eq!(status.recent_trades[0].strategy_name, "Scripted");
        assert!(status.to_string().contains("Recent Trades"));
    }

    #[tokio::test]
    async fn test_daily_rollover() {
        let exchange = Arc::new(exchange(90.0).with_position(long_position(100.0)));
        let mut bot = bot(exchange, None);
        bot.pending_signals.insert(SYMBOL.to_string(), pending(100.0));
        bot.run_cycle().await.unwrap();
        assert!(bot.position_manager.daily_pnl() < 0.0);

        let today = bot.trading_day;
        assert!(!bot.roll_daily(today));
        assert!(bot.position_manager.daily_pnl() < 0.0);

        assert!(bot.roll_daily(today.succ_opt().unwrap()));
        assert_eq!(bot.position_manager.daily_pnl(), 0.0);
    }

    #[tokio::test]
    async fn test_adaptive_update_on_refresh() {
        let exchange = Arc::new(exchange(100.0));
        let mut bot = bot(exchange, None);

        bot.run_cycle().await.unwrap();

        let params = bot.risk_controller.adaptive_parameters().copied().unwrap();
        assert_eq!(bot.position_manager.config().max_leverage, params.max_leverage);
        assert!(!bot.refresh_due());
    }

    #[tokio::test]
    async fn test_status_report() {
        let exchange = Arc::new(exchange(100.0));
        let mut bot = bot(exchange, Some(SignalType::Long));
        bot.run_cycle().await.unwrap();

        let status = bot.status().await;
        assert!(!status.running);
        assert_eq!(status.total_balance, 10_000.0);
        assert_eq!(status.active_pairs, vec![SYMBOL.to_string()]);
        assert_eq!(status.strategies.len(), 1);
        assert!(status.adaptive_parameters.is_some());

        let printed = status.to_string();
        assert!(printed.contains("Bot Status"));
        assert!(printed.contains("Adaptive Risk"));
    }

    #[tokio::test]
    async fn test_stop_clears_flag() {
        let bot = bot(Arc::new(exchange(100.0)), None);
        bot.running.store(true, Ordering::SeqCst);
        assert!(bot.is_running());
        bot.stop();
        assert!(!bot.is_running());
    }
}
