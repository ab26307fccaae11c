//! EMA crossover trend follower with an RSI filter.

use anyhow::Result;

use crate::metrics::indicators;
use crate::models::{Signal, SignalType};

use super::Strategy;

pub struct TrendFollowingStrategy {
    fast_period: usize,
    slow_period: usize,
    rsi_period: usize,
    rsi_overbought: f64,
    rsi_oversold: f64,
}

impl Default for TrendFollowingStrategy {
    fn default() -> Self {
        Self::new(12, 26, 14, 70.0, 30.0)
    }
}

impl TrendFollowingStrategy {
    pub fn new(
        fast_period: usize,
        slow_period: usize,
        rsi_period: usize,
        rsi_overbought: f64,
        rsi_oversold: f64,
    ) -> Self {
        Self {
            fast_period,
            slow_period,
            rsi_period,
            rsi_overbought,
            rsi_oversold,
        }
    }

    fn classify(&self, fast: (f64, f64), slow: (f64, f64), rsi: f64) -> Option<(SignalType, f64, String)> {
        let (fast_prev, fast_last) = fast;
        let (slow_prev, slow_last) = slow;

        if fast_prev <= slow_prev && fast_last > slow_last {
            if rsi < self.rsi_overbought {
                let confidence = (0.5 + (self.rsi_overbought - rsi) / 100.0).min(0.9);
                return Some((SignalType::Long, confidence, format!("Bullish EMA crossover, RSI: {:.1}", rsi)));
            }
        } else if fast_prev >= slow_prev && fast_last < slow_last {
            if rsi > self.rsi_oversold {
                let confidence = (0.5 + (rsi - self.rsi_oversold) / 100.0).min(0.9);
                return Some((SignalType::Short, confidence, format!("Bearish EMA crossover, RSI: {:.1}", rsi)));
            }
        } else if fast_last > slow_last && rsi < 40.0 {
            return Some((SignalType::Long, 0.6, format!("Uptrend with oversold RSI: {:.1}", rsi)));
        } else if fast_last < slow_last && rsi > 60.0 {
            return Some((SignalType::Short, 0.6, format!("Downtrend with overbought RSI: {:.1}", rsi)));
        }
        None
    }
}

impl Strategy for TrendFollowingStrategy {
    fn name(&self) -> &str {
        "TrendFollowing"
    }

    fn required_history_length(&self) -> usize {
        self.slow_period.max(self.rsi_period) + 10
    }

    fn analyze(&mut self, symbol: &str, prices: &[f64], _volumes: &[f64]) -> Result<Option<Signal>> {
        if prices.len() < self.required_history_length() {
            return Ok(None);
        }

        let fast_ema = indicators::ema(prices, self.fast_period);
        let slow_ema = indicators::ema(prices, self.slow_period);
        let rsi = indicators::rsi(prices, self.rsi_period);

        let (Some(&current_rsi), Some(&current_price)) = (rsi.last(), prices.last()) else {
            return Ok(None);
        };
        if fast_ema.len() < 2 || slow_ema.len() < 2 {
            return Ok(None);
        }
        let fast = (fast_ema[fast_ema.len() - 2], fast_ema[fast_ema.len() - 1]);
        let slow = (slow_ema[slow_ema.len() - 2], slow_ema[slow_ema.len() - 1]);

        let Some((signal_type, confidence, reason)) = self.classify(fast, slow, current_rsi) else {
            return Ok(None);
        };

        // Closes stand in for highs and lows with a 1% band
        let highs: Vec<f64> = prices.iter().map(|p| p * 1.01).collect();
        let lows: Vec<f64> = prices.iter().map(|p| p * 0.99).collect();
        let atr = indicators::atr(&highs, &lows, prices, 14)
            .last()
            .copied()
            .unwrap_or(current_price * 0.02);

        let (stop_loss, take_profit) = match signal_type {
            SignalType::Long => (current_price - 2.0 * atr, current_price + 3.0 * atr),
            _ => (current_price + 2.0 * atr, current_price - 3.0 * atr),
        };

        Ok(Some(
            Signal::new(signal_type, symbol, confidence, current_price)
                .with_stops(Some(stop_loss), Some(take_profit))
                .with_leverage(5)
                .with_reason(reason)
                .from_strategy(self.name()),
        ))
    }
}
