//! Bollinger band scalper with RSI and volume confirmation.

use anyhow::Result;

use crate::metrics::indicators;
use crate::models::{Signal, SignalType};

use super::Strategy;

pub struct ScalpingStrategy {
    bb_period: usize,
    bb_std: f64,
    rsi_period: usize,

    /// Target distance, percent of entry
    profit_target_percent: f64,

    /// Stop distance, percent of entry
    stop_loss_percent: f64,
}

impl Default for ScalpingStrategy {
    fn default() -> Self {
        Self {
            bb_period: 20,
            bb_std: 2.0,
            rsi_period: 7,
            profit_target_percent: 0.5,
            stop_loss_percent: 0.3,
        }
    }
}

impl Strategy for ScalpingStrategy {
    fn name(&self) -> &str {
        "Scalping"
    }

    fn required_history_length(&self) -> usize {
        self.bb_period + 5
    }

    fn analyze(&mut self, symbol: &str, prices: &[f64], volumes: &[f64]) -> Result<Option<Signal>> {
        if prices.len() < self.required_history_length() {
            return Ok(None);
        }

        let bands = indicators::bollinger_bands(prices, self.bb_period, self.bb_std);
        let rsi = indicators::rsi(prices, self.rsi_period);
        let (Some((upper, middle, lower)), Some(&rsi), Some(&price)) =
            (bands.last(), rsi.last(), prices.last())
        else {
            return Ok(None);
        };
        let volume_ratio = indicators::volume_ratio(volumes, 20);

        let (signal_type, confidence, reason) = if price <= lower * 1.01 && rsi < 30.0 {
            if volume_ratio <= 1.2 {
                return Ok(None);
            }
            (
                SignalType::Long,
                (0.5 + (30.0 - rsi) / 60.0 + (volume_ratio - 1.0) / 5.0).min(0.85),
                format!("Price at lower BB, RSI: {:.1}, Volume: {:.1}x", rsi, volume_ratio),
            )
        } else if price >= upper * 0.99 && rsi > 70.0 {
            if volume_ratio <= 1.2 {
                return Ok(None);
            }
            (
                SignalType::Short,
                (0.5 + (rsi - 70.0) / 60.0 + (volume_ratio - 1.0) / 5.0).min(0.85),
                format!("Price at upper BB, RSI: {:.1}, Volume: {:.1}x", rsi, volume_ratio),
            )
        } else if price < middle * 0.98 && rsi < 40.0 {
            (SignalType::Long, 0.55, format!("Mean reversion long, RSI: {:.1}", rsi))
        } else if price > middle * 1.02 && rsi > 60.0 {
            (SignalType::Short, 0.55, format!("Mean reversion short, RSI: {:.1}", rsi))
        } else {
            return Ok(None);
        };

        let stop = self.stop_loss_percent / 100.0;
        let target = self.profit_target_percent / 100.0;
        let (stop_loss, take_profit) = if signal_type == SignalType::Long {
            (price * (1.0 - stop), price * (1.0 + target))
        } else {
            (price * (1.0 + stop), price * (1.0 - target))
        };

        Ok(Some(
            Signal::new(signal_type, symbol, confidence, price)
                .with_stops(Some(stop_loss), Some(take_profit))
                .with_leverage(10)
                .with_reason(reason)
                .from_strategy(self.name()),
        ))
    }
}
