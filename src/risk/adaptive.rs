//! Adaptive risk engine.
//!
//! Maps market conditions and recent trade performance to bounded leverage,
//! position size, stop-loss, and take-profit parameters. The engine holds no
//! state: callers keep the returned [`AdaptiveRiskParameters`] and pass fresh
//! inputs on every update.

use serde::{Deserialize, Serialize};

use crate::config::RiskConfig;
use crate::metrics::{MarketConditions, StrategyPerformance};

pub const MIN_LEVERAGE: u32 = 1;
pub const MAX_LEVERAGE_CAP: u32 = 20;
pub const MIN_POSITION_SIZE: f64 = 1.0;
pub const MAX_POSITION_SIZE: f64 = 10.0;
pub const MIN_STOP_LOSS: f64 = 0.5;
pub const MAX_STOP_LOSS: f64 = 5.0;
pub const MIN_TAKE_PROFIT: f64 = 1.0;
pub const MAX_TAKE_PROFIT: f64 = 10.0;

const BASE_LEVERAGE: f64 = 5.0;
const BASE_POSITION_SIZE: f64 = 3.0;
const BASE_STOP_LOSS: f64 = 2.0;
const BASE_TAKE_PROFIT: f64 = 4.0;

/// Minimum reward-to-risk ratio between take-profit and stop-loss.
const MIN_REWARD_RATIO: f64 = 1.5;

/// Trades needed before performance statistics influence the parameters.
const MIN_TRADES_FOR_STATS: usize = 10;

/// Bounded risk parameters produced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveRiskParameters {
    /// In [1, 20]
    pub max_leverage: u32,

    /// Percent of balance, in [1.0, 10.0]
    pub max_position_size_percent: f64,

    /// Percent of entry price, in [0.5, 5.0]
    pub stop_loss_percent: f64,

    /// Percent of entry price, in [1.0, 10.0] and at least 1.5x the stop
    pub take_profit_percent: f64,
}

impl AdaptiveRiskParameters {
    /// Parameters as currently set in a risk config.
    pub fn from_config(config: &RiskConfig) -> Self {
        Self {
            max_leverage: config.max_leverage,
            max_position_size_percent: config.max_position_size_percent,
            stop_loss_percent: config.stop_loss_percent,
            take_profit_percent: config.take_profit_percent,
        }
    }

    /// Write these bounds into a risk config.
    pub fn apply_to(&self, config: &mut RiskConfig) {
        config.max_leverage = self.max_leverage;
        config.max_position_size_percent = self.max_position_size_percent;
        config.stop_loss_percent = self.stop_loss_percent;
        config.take_profit_percent = self.take_profit_percent;
    }
}

impl std::fmt::Display for AdaptiveRiskParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Max Leverage:      {}x", self.max_leverage)?;
        writeln!(f, "Position Size:     {:.1}%", self.max_position_size_percent)?;
        writeln!(f, "Stop Loss:         {:.1}%", self.stop_loss_percent)?;
        writeln!(f, "Take Profit:       {:.1}%", self.take_profit_percent)?;
        Ok(())
    }
}

/// Stateless calculator for [`AdaptiveRiskParameters`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AdaptiveRiskEngine;

impl AdaptiveRiskEngine {
    pub fn new() -> Self {
        Self
    }

    /// Compute all four parameters. Missing inputs are replaced by neutral
    /// defaults (volatility 0.05, no trend, volume ratio 1; win rate 0.5, no trades).
    pub fn calculate_adaptive_parameters(
        &self,
        conditions: Option<&MarketConditions>,
        performance: Option<&StrategyPerformance>,
    ) -> AdaptiveRiskParameters {
        let conditions = sanitize(conditions.copied().unwrap_or_default());
        let performance = performance.copied().unwrap_or_default();

        let stop_loss = self.optimal_stop_loss(&conditions, &performance);

        AdaptiveRiskParameters {
            max_leverage: self.optimal_leverage(&conditions, &performance),
            max_position_size_percent: self.optimal_position_size(&conditions, &performance),
            stop_loss_percent: stop_loss,
            take_profit_percent: self.optimal_take_profit(&conditions, &performance, stop_loss),
        }
    }

    /// Leverage: lower in high volatility or after poor results, higher in
    /// calm or strongly trending markets.
    pub fn optimal_leverage(&self, conditions: &MarketConditions, performance: &StrategyPerformance) -> u32 {
        let volatility_factor = if conditions.volatility > 0.10 {
            (1.0 - conditions.volatility * 3.0).max(0.3)
        } else if conditions.volatility < 0.03 {
            1.2
        } else {
            1.0
        };

        let performance_factor = if performance.total_trades < MIN_TRADES_FOR_STATS {
            0.8
        } else if performance.win_rate >= 0.6 {
            1.0 + (performance.win_rate - 0.5) * 0.5
        } else if performance.win_rate < 0.4 {
            (performance.win_rate * 1.5).max(0.5)
        } else {
            1.0
        };

        let trend_factor = 1.0 + conditions.trend_strength.abs() * 0.2;

        let optimal = BASE_LEVERAGE * volatility_factor * performance_factor * trend_factor;
        (optimal.round() as u32).clamp(MIN_LEVERAGE, MAX_LEVERAGE_CAP)
    }

    /// Position size as percent of balance, scaled by volatility and Sharpe ratio.
    pub fn optimal_position_size(&self, conditions: &MarketConditions, performance: &StrategyPerformance) -> f64 {
        let volatility_factor = if conditions.volatility > 0.08 {
            (1.0 - conditions.volatility * 4.0).max(0.4)
        } else {
            1.0 + (0.08 - conditions.volatility) * 2.0
        };

        let sharpe_factor = if performance.total_trades < MIN_TRADES_FOR_STATS {
            0.8
        } else if performance.sharpe_ratio > 1.0 {
            (1.0 + (performance.sharpe_ratio - 1.0) * 0.25).min(1.5)
        } else if performance.sharpe_ratio < 0.0 {
            (0.8 + performance.sharpe_ratio * 0.1).max(0.5)
        } else {
            1.0
        };

        round1(BASE_POSITION_SIZE * volatility_factor * sharpe_factor)
            .clamp(MIN_POSITION_SIZE, MAX_POSITION_SIZE)
    }

    /// Stop distance as percent of entry, widening with volatility.
    pub fn optimal_stop_loss(&self, conditions: &MarketConditions, performance: &StrategyPerformance) -> f64 {
        let volatility_factor = (1.0 + (conditions.volatility - 0.05) * 10.0).clamp(0.5, 2.0);

        let win_rate_factor = if performance.total_trades < MIN_TRADES_FOR_STATS {
            1.1
        } else if performance.win_rate >= 0.6 {
            0.9
        } else if performance.win_rate < 0.4 {
            1.2
        } else {
            1.0
        };

        round1(BASE_STOP_LOSS * volatility_factor * win_rate_factor).clamp(MIN_STOP_LOSS, MAX_STOP_LOSS)
    }

    /// Target distance as percent of entry, never below 1.5x the stop distance.
    pub fn optimal_take_profit(
        &self,
        conditions: &MarketConditions,
        performance: &StrategyPerformance,
        stop_loss: f64,
    ) -> f64 {
        let min_target = stop_loss * MIN_REWARD_RATIO;

        let trend_factor = 1.0 + conditions.trend_strength.abs() * 0.5;

        let profit_factor = if performance.total_trades >= MIN_TRADES_FOR_STATS && performance.avg_profit > 0.0 {
            (1.0 + performance.avg_profit / 100.0).min(1.5)
        } else {
            1.0
        };

        let volatility_factor = if conditions.volatility > 0.05 {
            1.0 + conditions.volatility * 3.0
        } else {
            1.0
        };

        let optimal = BASE_TAKE_PROFIT * trend_factor * profit_factor * volatility_factor;
        let mut target = round1(optimal.max(min_target));

        // Rounding to one decimal can land just under the ratio floor.
        if target < min_target {
            target = (min_target * 10.0).ceil() / 10.0;
        }

        target.clamp(MIN_TAKE_PROFIT, MAX_TAKE_PROFIT)
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn sanitize(conditions: MarketConditions) -> MarketConditions {
    let defaults = MarketConditions::default();
    MarketConditions {
        volatility: if conditions.volatility.is_finite() {
            conditions.volatility.max(0.0)
        } else {
            defaults.volatility
        },
        trend_strength: if conditions.trend_strength.is_finite() {
            conditions.trend_strength.clamp(-1.0, 1.0)
        } else {
            defaults.trend_strength
        },
        volume_ratio: if conditions.volume_ratio.is_finite() {
            conditions.volume_ratio
        } else {
            defaults.volume_ratio
        },
    }
}
