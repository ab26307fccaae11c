//! Calculators for market conditions and rolling trade performance.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use super::indicators;

/// Trade results kept for performance statistics.
pub const PERFORMANCE_WINDOW: usize = 100;

/// Market state fed into the adaptive risk engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketConditions {
    /// Standard deviation of per-bar returns
    pub volatility: f64,

    /// Normalized trend in [-1, 1]
    pub trend_strength: f64,

    /// Current volume relative to its recent average
    pub volume_ratio: f64,
}

impl Default for MarketConditions {
    fn default() -> Self {
        Self {
            volatility: 0.05,
            trend_strength: 0.0,
            volume_ratio: 1.0,
        }
    }
}

/// Performance summary over a window of closed trades.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyPerformance {
    /// Fraction of trades with positive P&L
    pub win_rate: f64,

    /// Mean P&L of winning trades
    pub avg_profit: f64,

    /// Mean loss magnitude of losing trades (positive)
    pub avg_loss: f64,

    /// Mean over standard deviation of trade P&L
    pub sharpe_ratio: f64,

    pub total_trades: usize,
}

impl Default for StrategyPerformance {
    fn default() -> Self {
        Self {
            win_rate: 0.5,
            avg_profit: 0.0,
            avg_loss: 0.0,
            sharpe_ratio: 0.0,
            total_trades: 0,
        }
    }
}

/// Calculator for market and performance statistics.
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Derive market conditions from a close-price and volume history.
    pub fn market_conditions(prices: &[f64], volumes: &[f64]) -> MarketConditions {
        let returns = indicators::returns(prices);
        let volatility = if returns.len() >= 2 {
            returns.iter().population_std_dev()
        } else {
            0.0
        };

        MarketConditions {
            volatility,
            trend_strength: indicators::trend_strength(prices),
            volume_ratio: indicators::volume_ratio(volumes, 20),
        }
    }

    /// Average several symbols' conditions into one. `None` when empty.
    pub fn average_conditions(conditions: &[MarketConditions]) -> Option<MarketConditions> {
        if conditions.is_empty() {
            return None;
        }
        Some(MarketConditions {
            volatility: conditions.iter().map(|c| c.volatility).mean(),
            trend_strength: conditions.iter().map(|c| c.trend_strength).mean(),
            volume_ratio: conditions.iter().map(|c| c.volume_ratio).mean(),
        })
    }

    /// Summarize a list of trade P&L values.
    ///
    /// An empty list yields the neutral default (win rate 0.5, no trades).
    pub fn performance(pnls: &[f64]) -> StrategyPerformance {
        if pnls.is_empty() {
            return StrategyPerformance::default();
        }

        let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = pnls.iter().copied().filter(|p| *p < 0.0).collect();

        let avg_profit = if wins.is_empty() { 0.0 } else { wins.iter().mean() };
        let avg_loss = if losses.is_empty() {
            0.0
        } else {
            losses.iter().mean().abs()
        };

        let sharpe_ratio = if pnls.len() >= 2 {
            let std = pnls.iter().population_std_dev();
            if std > 0.0 {
                pnls.iter().mean() / std
            } else {
                0.0
            }
        } else {
            0.0
        };

        StrategyPerformance {
            win_rate: wins.len() as f64 / pnls.len() as f64,
            avg_profit,
            avg_loss,
            sharpe_ratio,
            total_trades: pnls.len(),
        }
    }
}

/// Rolling buffer of recent trade results.
///
/// Holds at most [`PERFORMANCE_WINDOW`] entries; the oldest is evicted first.
#[derive(Debug, Clone, Default)]
pub struct PerformanceTracker {
    trade_results: VecDeque<f64>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_trade_result(&mut self, pnl: f64) {
        if self.trade_results.len() == PERFORMANCE_WINDOW {
            self.trade_results.pop_front();
        }
        self.trade_results.push_back(pnl);
    }

    /// Performance over the current trade window.
    pub fn performance(&self) -> StrategyPerformance {
        let pnls: Vec<f64> = self.trade_results.iter().copied().collect();
        MetricsCalculator::performance(&pnls)
    }

    #[cfg(test)]
    pub fn trade_count(&self) -> usize {
        self.trade_results.len()
    }

    pub fn clear(&mut self) {
        self.trade_results.clear();
    }
}
