//! Statistical mean reversion on each symbol's price-to-rolling-mean ratio.
//!
//! Every call appends the current ratio to a per-symbol history; the z-score
//! of the latest ratio against that history drives entries and exits.

use std::collections::{HashMap, VecDeque};

use anyhow::Result;
use statrs::statistics::Statistics;

use crate::models::{Signal, SignalType};

use super::Strategy;

/// Ratio samples needed before a z-score is meaningful.
const MIN_Z_SAMPLES: usize = 20;

pub struct ArbitrageStrategy {
    lookback_period: usize,
    z_score_entry: f64,
    z_score_exit: f64,
    ratio_history: HashMap<String, VecDeque<f64>>,
}

impl Default for ArbitrageStrategy {
    fn default() -> Self {
        Self::new(100, 2.0, 0.5)
    }
}

impl ArbitrageStrategy {
    pub fn new(lookback_period: usize, z_score_entry: f64, z_score_exit: f64) -> Self {
        Self {
            lookback_period: lookback_period.max(1),
            z_score_entry,
            z_score_exit,
            ratio_history: HashMap::new(),
        }
    }

    fn record_ratio(&mut self, symbol: &str, ratio: f64) -> &VecDeque<f64> {
        let history = self.ratio_history.entry(symbol.to_string()).or_default();
        history.push_back(ratio);
        while history.len() > self.lookback_period {
            history.pop_front();
        }
        history
    }
}

/// Z-score of the last value, `None` with too few samples.
fn z_score(values: &VecDeque<f64>) -> Option<f64> {
    if values.len() < MIN_Z_SAMPLES {
        return None;
    }
    let last = *values.back()?;
    let mean = values.iter().mean();
    let std = values.iter().population_std_dev();
    if std == 0.0 || !std.is_finite() {
        return Some(0.0);
    }
    Some((last - mean) / std)
}

impl Strategy for ArbitrageStrategy {
    fn name(&self) -> &str {
        "Arbitrage"
    }

    fn required_history_length(&self) -> usize {
        self.lookback_period
    }

    fn analyze(&mut self, symbol: &str, prices: &[f64], _volumes: &[f64]) -> Result<Option<Signal>> {
        if prices.len() < self.required_history_length() {
            return Ok(None);
        }

        let window = &prices[prices.len() - self.lookback_period..];
        let rolling_mean = window.iter().sum::<f64>() / window.len() as f64;
        let Some(&price) = prices.last() else {
            return Ok(None);
        };
        if rolling_mean <= 0.0 {
            return Ok(None);
        }

        let history = self.record_ratio(symbol, price / rolling_mean);
        let Some(z) = z_score(history) else {
            return Ok(None);
        };

        let (signal_type, confidence, reason) = if z < -self.z_score_entry {
            (
                SignalType::Long,
                (z.abs() / 4.0).min(0.8),
                format!("Statistical arbitrage: z-score={:.2} (mean reversion long)", z),
            )
        } else if z > self.z_score_entry {
            (
                SignalType::Short,
                (z.abs() / 4.0).min(0.8),
                format!("Statistical arbitrage: z-score={:.2} (mean reversion short)", z),
            )
        } else if z.abs() < self.z_score_exit {
            (SignalType::Close, 0.7, format!("Mean reversion complete: z-score={:.2}", z))
        } else {
            return Ok(None);
        };

        let std_price = window.iter().population_std_dev();
        let (stop_loss, take_profit) = match signal_type {
            SignalType::Long => (Some(price - 2.5 * std_price), Some(rolling_mean)),
            SignalType::Short => (Some(price + 2.5 * std_price), Some(rolling_mean)),
            _ => (None, None),
        };

        Ok(Some(
            Signal::new(signal_type, symbol, confidence, price)
                .with_stops(stop_loss, take_profit)
                .with_leverage(3)
                .with_reason(reason)
                .from_strategy(self.name()),
        ))
    }
}
