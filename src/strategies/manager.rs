//! Strategy arbitration: run every enabled strategy, score the signals, and
//! pick one.

use std::collections::VecDeque;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::models::{Signal, SignalType};

use super::{default_strategies, Strategy};

/// Trade outcomes kept per strategy.
const OUTCOME_HISTORY: usize = 100;

/// Outcomes inspected by `auto_adjust_strategies`.
const ADJUST_WINDOW: usize = 20;

/// Smoothing factor for the performance score.
const SCORE_ALPHA: f64 = 0.1;

struct RegisteredStrategy {
    strategy: Box<dyn Strategy>,
    enabled: bool,

    /// EMA of normalized trade outcomes in [0, 1]
    performance_score: f64,

    outcomes: VecDeque<f64>,
}

impl RegisteredStrategy {
    fn new(strategy: Box<dyn Strategy>) -> Self {
        Self {
            strategy,
            enabled: true,
            performance_score: 0.5,
            outcomes: VecDeque::with_capacity(OUTCOME_HISTORY),
        }
    }

    fn name(&self) -> &str {
        self.strategy.name()
    }

    fn record(&mut self, pnl: f64) {
        let normalized = (pnl / 100.0).clamp(-1.0, 1.0);
        self.performance_score =
            SCORE_ALPHA * (0.5 + normalized * 0.5) + (1.0 - SCORE_ALPHA) * self.performance_score;

        if self.outcomes.len() == OUTCOME_HISTORY {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(pnl);
    }
}

/// Per-strategy statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyStats {
    pub name: String,
    pub enabled: bool,
    pub performance_score: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub total_pnl: f64,
    pub average_pnl: f64,
    pub win_rate: f64,
}

impl std::fmt::Display for StrategyStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:<16} {:<9} score {:.3}  trades {:>4}  win {:>5.1}%  pnl {:>10.2}",
            self.name,
            if self.enabled { "enabled" } else { "disabled" },
            self.performance_score,
            self.total_trades,
            self.win_rate * 100.0,
            self.total_pnl
        )
    }
}

/// Runs the strategy set and selects the best signal per symbol.
pub struct StrategyManager {
    strategies: Vec<RegisteredStrategy>,
}

impl Default for StrategyManager {
    fn default() -> Self {
        Self::new(default_strategies())
    }
}

impl StrategyManager {
    /// Strategies are consulted, and win ties, in the given order.
    pub fn new(strategies: Vec<Box<dyn Strategy>>) -> Self {
        Self {
            strategies: strategies.into_iter().map(RegisteredStrategy::new).collect(),
        }
    }

    fn find(&self, name: &str) -> Option<&RegisteredStrategy> {
        self.strategies.iter().find(|s| s.name() == name)
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut RegisteredStrategy> {
        self.strategies.iter_mut().find(|s| s.name() == name)
    }

    /// Look up a strategy by name.
    pub fn get_strategy(&self, name: &str) -> Option<&dyn Strategy> {
        self.find(name).map(|s| s.strategy.as_ref())
    }

    #[cfg(test)]
    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.find(name).map(|s| s.enabled)
    }

    pub fn performance_score(&self, name: &str) -> Option<f64> {
        self.find(name).map(|s| s.performance_score)
    }

    /// Enable or disable a strategy. Returns `false` for an unknown name.
    pub fn enable_strategy(&mut self, name: &str, enabled: bool) -> bool {
        match self.find_mut(name) {
            Some(s) => {
                s.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Non-HOLD signals from every enabled strategy, in registration order.
    ///
    /// A strategy that fails is logged and skipped.
    pub fn get_signals(&mut self, symbol: &str, prices: &[f64], volumes: &[f64]) -> Vec<Signal> {
        let mut signals = Vec::new();
        for registered in self.strategies.iter_mut().filter(|s| s.enabled) {
            match registered.strategy.analyze(symbol, prices, volumes) {
                Ok(Some(signal)) if signal.signal_type != SignalType::Hold => signals.push(signal),
                Ok(_) => {}
                Err(e) => error!(
                    strategy = %registered.strategy.name(),
                    symbol = %symbol,
                    error = %e,
                    "Strategy failed"
                ),
            }
        }
        signals
    }

    /// Highest confidence x performance-score signal, first registered wins ties.
    pub fn get_best_signal(&mut self, symbol: &str, prices: &[f64], volumes: &[f64]) -> Option<Signal> {
        let signals = self.get_signals(symbol, prices, volumes);

        let mut best: Option<(f64, Signal)> = None;
        for signal in signals {
            let score = signal.confidence
                * self
                    .performance_score(&signal.strategy_name)
                    .unwrap_or(0.5);
            if best.as_ref().map_or(true, |(top, _)| score > *top) {
                best = Some((score, signal));
            }
        }

        let (score, signal) = best?;
        info!(
            symbol = %symbol,
            strategy = %signal.strategy_name,
            signal = %signal.signal_type,
            score = score,
            "Best signal selected"
        );
        Some(signal)
    }

    /// Record a closed trade's P&L against the strategy that opened it.
    pub fn update_strategy_performance(&mut self, name: &str, pnl: f64) {
        match self.find_mut(name) {
            Some(s) => s.record(pnl),
            None => warn!(strategy = %name, "Performance update for unknown strategy"),
        }
    }

    /// Disable strategies on a losing streak and re-enable recovered ones.
    pub fn auto_adjust_strategies(&mut self) {
        for registered in &mut self.strategies {
            if registered.outcomes.len() < ADJUST_WINDOW {
                continue;
            }

            let recent = registered.outcomes.iter().rev().take(ADJUST_WINDOW);
            let recent_pnl: f64 = recent.clone().sum();
            let wins = recent.filter(|p| **p > 0.0).count();
            let win_rate = wins as f64 / ADJUST_WINDOW as f64;

            if recent_pnl < -10.0 && win_rate < 0.3 {
                if registered.enabled {
                    warn!(
                        strategy = %registered.name(),
                        recent_pnl = recent_pnl,
                        win_rate = win_rate,
                        "Disabling strategy due to poor performance"
                    );
                    registered.enabled = false;
                }
            } else if recent_pnl > 5.0 && win_rate > 0.5 && !registered.enabled {
                info!(strategy = %registered.name(), "Re-enabling strategy after recovery");
                registered.enabled = true;
            }
        }
    }

    pub fn get_strategy_stats(&self) -> Vec<StrategyStats> {
        self.strategies
            .iter()
            .map(|s| {
                let total_trades = s.outcomes.len();
                let winning_trades = s.outcomes.iter().filter(|p| **p > 0.0).count();
                let total_pnl: f64 = s.outcomes.iter().sum();
                let (average_pnl, win_rate) = if total_trades > 0 {
                    (
                        total_pnl / total_trades as f64,
                        winning_trades as f64 / total_trades as f64,
                    )
                } else {
                    (0.0, 0.0)
                };

                StrategyStats {
                    name: s.name().to_string(),
                    enabled: s.enabled,
                    performance_score: s.performance_score,
                    total_trades,
                    winning_trades,
                    total_pnl,
                    average_pnl,
                    win_rate,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Strategy returning a fixed outcome.
    struct Fixed {
        name: &'static str,
        signal_type: Option<SignalType>,
        confidence: f64,
        fail: bool,
    }

    impl Fixed {
        fn boxed(name: &'static str, signal_type: Option<SignalType>, confidence: f64) -> Box<dyn Strategy> {
            Box::new(Self {
                name,
                signal_type,
                confidence,
                fail: false,
            })
        }

        fn failing(name: &'static str) -> Box<dyn Strategy> {
            Box::new(Self {
                name,
                signal_type: None,
                confidence: 0.0,
                fail: true,
            })
        }
    }

    impl Strategy for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn required_history_length(&self) -> usize {
            1
        }

        fn analyze(&mut self, symbol: &str, prices: &[f64], _volumes: &[f64]) -> anyhow::Result<Option<Signal>> {
            if self.fail {
                anyhow::bail!("indicator blew up");
            }
            Ok(self.signal_type.map(|t| {
                Signal::new(t, symbol, self.confidence, prices[prices.len() - 1]).from_strategy(self.name)
            }))
        }
    }

    const PRICES: [f64; 3] = [1.0, 2.0, 3.0];

    #[test]
    fn test_best_signal_by_confidence() {
        let mut manager = StrategyManager::new(vec![
            Fixed::boxed("A", Some(SignalType::Long), 0.6),
            Fixed::boxed("B", Some(SignalType::Short), 0.8),
        ]);
        let best = manager.get_best_signal("XBTUSDTM", &PRICES, &PRICES).unwrap();
        assert_eq!(best.strategy_name, "B");
    }

    #[test]
    fn test_never_returns_hold() {
        let mut manager = StrategyManager::new(vec![
            Fixed::boxed("A", Some(SignalType::Hold), 1.0),
            Fixed::boxed("B", None, 0.0),
        ]);
        assert!(manager.get_best_signal("XBTUSDTM", &PRICES, &PRICES).is_none());

        let mut manager = StrategyManager::new(vec![
            Fixed::boxed("A", Some(SignalType::Hold), 1.0),
            Fixed::boxed("B", Some(SignalType::Long), 0.1),
        ]);
        let best = manager.get_best_signal("XBTUSDTM", &PRICES, &PRICES).unwrap();
        assert_eq!(best.signal_type, SignalType::Long);
    }

    #[test]
    fn test_tie_goes_to_first_registered() {
        let mut manager = StrategyManager::new(vec![
            Fixed::boxed("A", Some(SignalType::Long), 0.7),
            Fixed::boxed("B", Some(SignalType::Short), 0.7),
        ]);
        let best = manager.get_best_signal("XBTUSDTM", &PRICES, &PRICES).unwrap();
        assert_eq!(best.strategy_name, "A");
    }

    #[test]
    fn test_failing_strategy_is_skipped() {
        let mut manager = StrategyManager::new(vec![
            Fixed::failing("Broken"),
            Fixed::boxed("B", Some(SignalType::Long), 0.5),
        ]);
        let signals = manager.get_signals("XBTUSDTM", &PRICES, &PRICES);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].strategy_name, "B");
    }

    #[test]
    fn test_performance_weights_selection() {
        let mut manager = StrategyManager::new(vec![
            Fixed::boxed("A", Some(SignalType::Long), 0.8),
            Fixed::boxed("B", Some(SignalType::Short), 0.7),
        ]);
        for _ in 0..10 {
            manager.update_strategy_performance("A", -100.0);
        }
        let best = manager.get_best_signal("XBTUSDTM", &PRICES, &PRICES).unwrap();
        assert_eq!(best.strategy_name, "B");
    }

    #[test]
    fn test_performance_score_ema() {
        let mut manager = StrategyManager::new(vec![Fixed::boxed("A", None, 0.0)]);
        manager.update_strategy_performance("A", 100.0);
        assert!((manager.performance_score("A").unwrap() - 0.55).abs() < 1e-12);
        manager.update_strategy_performance("A", -250.0);
        assert!((manager.performance_score("A").unwrap() - 0.495).abs() < 1e-12);
    }

    #[test]
    fn test_disabled_strategy_not_consulted() {
        let mut manager = StrategyManager::new(vec![
            Fixed::boxed("A", Some(SignalType::Long), 0.9),
            Fixed::boxed("B", Some(SignalType::Short), 0.2),
        ]);
        assert!(manager.enable_strategy("A", false));
        assert!(!manager.enable_strategy("Missing", false));
        let best = manager.get_best_signal("XBTUSDTM", &PRICES, &PRICES).unwrap();
        assert_eq!(best.strategy_name, "B");
    }

    #[test]
    fn test_auto_adjust_disables_and_reenables() {
        let mut manager = StrategyManager::new(vec![Fixed::boxed("A", None, 0.0)]);

        // 4 wins of +1, 16 losses summing to -19: total -15, win rate 0.2
        for i in 0..20 {
            let pnl = if i < 4 { 1.0 } else { -19.0 / 16.0 };
            manager.update_strategy_performance("A", pnl);
        }
        manager.auto_adjust_strategies();
        assert_eq!(manager.is_enabled("A"), Some(false));

        // 12 wins of +1.5, 8 losses of -1: total +10, win rate 0.6
        for i in 0..20 {
            let pnl = if i < 12 { 1.5 } else { -1.0 };
            manager.update_strategy_performance("A", pnl);
        }
        manager.auto_adjust_strategies();
        assert_eq!(manager.is_enabled("A"), Some(true));
    }

    #[test]
    fn test_auto_adjust_needs_twenty_outcomes() {
        let mut manager = StrategyManager::new(vec![Fixed::boxed("A", None, 0.0)]);
        for _ in 0..19 {
            manager.update_strategy_performance("A", -5.0);
        }
        manager.auto_adjust_strategies();
        assert_eq!(manager.is_enabled("A"), Some(true));
    }

    #[test]
    fn test_strategy_stats() {
        let mut manager = StrategyManager::default();
        assert_eq!(manager.get_strategy_stats().len(), 4);
        assert!(manager.get_strategy("Scalping").is_some());

        manager.update_strategy_performance("Scalping", 10.0);
        manager.update_strategy_performance("Scalping", -4.0);
        let stats = manager.get_strategy_stats();
        let scalping = stats.iter().find(|s| s.name == "Scalping").unwrap();
        assert_eq!(scalping.total_trades, 2);
        assert_eq!(scalping.winning_trades, 1);
        assert!((scalping.average_pnl - 3.0).abs() < 1e-12);
        assert_eq!(scalping.win_rate, 0.5);
    }
}
