//! Risk gate for proposed signals.
//!
//! The controller rejects signals while the account is in drawdown, after a
//! losing streak, or past the daily loss limit. Approved signals come back as
//! an adjusted copy with leverage and stop distance brought inside the
//! configured limits.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RiskConfig;
use crate::metrics::{MarketConditions, PerformanceTracker, StrategyPerformance};
use crate::models::{Signal, SignalType};

use super::adaptive::{AdaptiveRiskEngine, AdaptiveRiskParameters};
use super::position_manager::PortfolioState;

/// Drawdown from peak balance that pauses trading.
pub const DRAWDOWN_THRESHOLD: f64 = 0.15;

/// Losing trades in a row that pause trading.
pub const MAX_CONSECUTIVE_LOSSES: u32 = 5;

/// Unrealized loss, as a fraction of balance, above which leverage is halved.
const UNREALIZED_LOSS_THRESHOLD: f64 = 0.05;

/// Outcome of assessing one signal.
#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    pub approved: bool,

    /// Signal to execute, present only when approved
    pub adjusted_signal: Option<Signal>,

    /// 0 = no risk flags, 1 = rejected
    pub risk_score: f64,

    pub warnings: Vec<String>,
    pub reason: String,
}

impl RiskAssessment {
    pub fn approve(signal: Signal, risk_score: f64, warnings: Vec<String>) -> Self {
        let reason = if warnings.is_empty() {
            "Signal approved".to_string()
        } else {
            "Signal approved with adjustments".to_string()
        };
        Self {
            approved: true,
            adjusted_signal: Some(signal),
            risk_score: risk_score.min(1.0),
            warnings,
            reason,
        }
    }

    pub fn reject(warning: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            adjusted_signal: None,
            risk_score: 1.0,
            warnings: vec![warning.into()],
            reason: reason.into(),
        }
    }
}

/// Stateful risk gate. Owned by the trading loop.
pub struct RiskController {
    config: RiskConfig,
    engine: AdaptiveRiskEngine,

    /// Latest adaptive output, `None` until the first update
    adaptive_params: Option<AdaptiveRiskParameters>,

    tracker: PerformanceTracker,
    consecutive_losses: u32,
    peak_balance: f64,
}

impl RiskController {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            engine: AdaptiveRiskEngine::new(),
            adaptive_params: None,
            tracker: PerformanceTracker::new(),
            consecutive_losses: 0,
            peak_balance: 0.0,
        }
    }

    #[cfg(test)]
    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    #[cfg(test)]
    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    #[cfg(test)]
    pub fn peak_balance(&self) -> f64 {
        self.peak_balance
    }

    pub fn is_adaptive_mode(&self) -> bool {
        self.config.adaptive_mode
    }

    pub fn adaptive_parameters(&self) -> Option<&AdaptiveRiskParameters> {
        self.adaptive_params.as_ref()
    }

    /// Performance over the recorded trade window.
    pub fn performance(&self) -> StrategyPerformance {
        self.tracker.performance()
    }

    fn drawdown(&self, total_balance: f64) -> f64 {
        if self.peak_balance > 0.0 {
            (self.peak_balance - total_balance) / self.peak_balance
        } else {
            0.0
        }
    }

    fn daily_loss_breached(&self, portfolio: &PortfolioState) -> bool {
        let limit = portfolio.total_balance * self.config.max_daily_loss_percent / 100.0;
        portfolio.daily_pnl < -limit
    }

    /// Assess a signal against the portfolio, returning an adjusted copy when approved.
    pub fn assess_signal(&mut self, signal: &Signal, portfolio: &PortfolioState) -> RiskAssessment {
        let mut warnings = Vec::new();
        let mut risk_score = 0.0;

        self.peak_balance = self.peak_balance.max(portfolio.total_balance);

        let drawdown = self.drawdown(portfolio.total_balance);
        if drawdown > DRAWDOWN_THRESHOLD {
            return RiskAssessment::reject(
                "Maximum drawdown exceeded",
                format!("Drawdown of {:.1}% exceeds threshold", drawdown * 100.0),
            );
        }
        risk_score += drawdown / DRAWDOWN_THRESHOLD * 0.3;

        if self.consecutive_losses >= MAX_CONSECUTIVE_LOSSES {
            return RiskAssessment::reject(
                "Too many consecutive losses",
                "Trading paused due to consecutive losses",
            );
        }
        risk_score += self.consecutive_losses as f64 / MAX_CONSECUTIVE_LOSSES as f64 * 0.2;

        if self.daily_loss_breached(portfolio) {
            return RiskAssessment::reject("Daily loss limit reached", "Maximum daily loss exceeded");
        }

        if signal.confidence < 0.5 {
            warnings.push(format!("Low confidence signal: {:.1}%", signal.confidence * 100.0));
            risk_score += 0.2;
        }

        let mut leverage = signal.leverage;

        if portfolio.unrealized_pnl < 0.0 && portfolio.total_balance > 0.0 {
            let loss_ratio = portfolio.unrealized_pnl.abs() / portfolio.total_balance;
            if loss_ratio > UNREALIZED_LOSS_THRESHOLD {
                leverage = (signal.leverage / 2).max(1);
                warnings.push("Leverage reduced due to unrealized losses".to_string());
            }
        }

        if self.consecutive_losses > 2 {
            leverage = leverage.saturating_sub(self.consecutive_losses).max(1);
            warnings.push("Leverage reduced due to consecutive losses".to_string());
        }

        leverage = leverage.min(self.config.max_leverage).max(1);

        let (stop_loss, take_profit) = self.adjust_stops(signal, &mut warnings);

        let adjusted = Signal {
            stop_loss,
            take_profit,
            leverage,
            ..signal.clone()
        };

        debug!(
            symbol = %signal.symbol,
            leverage = leverage,
            risk_score = risk_score,
            "Signal assessed"
        );

        RiskAssessment::approve(adjusted, risk_score, warnings)
    }

    /// Fill missing stops from config and widen stops tighter than the minimum distance.
    fn adjust_stops(&self, signal: &Signal, warnings: &mut Vec<String>) -> (Option<f64>, Option<f64>) {
        let direction = match signal.signal_type {
            SignalType::Long => 1.0,
            SignalType::Short => -1.0,
            SignalType::Close | SignalType::Hold => return (signal.stop_loss, signal.take_profit),
        };
        if signal.price <= 0.0 {
            return (signal.stop_loss, signal.take_profit);
        }

        let min_stop_distance = self.config.stop_loss_percent / 100.0;
        let min_stop = signal.price * (1.0 - direction * min_stop_distance);

        let stop_loss = match signal.stop_loss {
            Some(stop) => {
                let distance = (signal.price - stop).abs() / signal.price;
                if distance < min_stop_distance {
                    warnings.push("Stop loss adjusted to minimum distance".to_string());
                    min_stop
                } else {
                    stop
                }
            }
            None => min_stop,
        };

        let take_profit = signal.take_profit.unwrap_or_else(|| {
            signal.price * (1.0 + direction * self.config.take_profit_percent / 100.0)
        });

        (Some(stop_loss), Some(take_profit))
    }

    /// Feed a closed trade back into the loss streak (and performance window in adaptive mode).
    pub fn on_trade_result(&mut self, pnl: f64) {
        if pnl < 0.0 {
            self.consecutive_losses += 1;
            warn!(
                consecutive_losses = self.consecutive_losses,
                "Trade loss recorded"
            );
        } else {
            self.consecutive_losses = 0;
        }

        if self.config.adaptive_mode {
            self.tracker.record_trade_result(pnl);
        }
    }

    /// Check whether trading should pause, with the triggering reason.
    pub fn should_pause_trading(&mut self, portfolio: &PortfolioState) -> (bool, String) {
        self.peak_balance = self.peak_balance.max(portfolio.total_balance);

        let drawdown = self.drawdown(portfolio.total_balance);
        if drawdown > DRAWDOWN_THRESHOLD {
            return (true, format!("Drawdown {:.1}% exceeds threshold", drawdown * 100.0));
        }

        if self.consecutive_losses >= MAX_CONSECUTIVE_LOSSES {
            return (
                true,
                format!("Too many consecutive losses: {}", self.consecutive_losses),
            );
        }

        if self.daily_loss_breached(portfolio) {
            return (true, "Daily loss limit exceeded".to_string());
        }

        (false, String::new())
    }

    /// Largest position value allowed in the current risk state.
    pub fn calculate_max_position_value(&self, portfolio: &PortfolioState) -> f64 {
        let mut max_value = portfolio.total_balance * self.config.max_position_size_percent / 100.0;

        if self.consecutive_losses > 0 {
            let reduction = 1.0 - self.consecutive_losses as f64 * 0.1;
            max_value *= reduction.max(0.5);
        }

        let drawdown = self.drawdown(portfolio.total_balance);
        if drawdown > 0.05 {
            max_value *= 1.0 - drawdown;
        }

        max_value
    }

    /// Recompute adaptive bounds and write them into the controller's config.
    ///
    /// Returns `None` without touching anything when adaptive mode is off.
    pub fn update_adaptive_parameters(
        &mut self,
        conditions: Option<&MarketConditions>,
        performance: Option<&StrategyPerformance>,
    ) -> Option<AdaptiveRiskParameters> {
        if !self.config.adaptive_mode {
            return None;
        }

        let previous = AdaptiveRiskParameters::from_config(&self.config);
        let params = self.engine.calculate_adaptive_parameters(conditions, performance);
        params.apply_to(&mut self.config);
        self.adaptive_params = Some(params);

        if params == previous {
            debug!(leverage = params.max_leverage, "Adaptive risk parameters unchanged");
            return Some(params);
        }
        info!(
            leverage = params.max_leverage,
            position_size = params.max_position_size_percent,
            stop_loss = params.stop_loss_percent,
            take_profit = params.take_profit_percent,
            "Adaptive risk parameters updated"
        );
        Some(params)
    }

    /// Clear the loss streak, peak balance, and performance window.
    pub fn reset_state(&mut self) {
        self.consecutive_losses = 0;
        self.peak_balance = 0.0;
        self.tracker.clear();
    }
}
