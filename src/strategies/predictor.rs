//! Learned direction predictor.
//!
//! A logistic regression over standardized technical features, trained online
//! from delayed labels: each call pairs the features seen five bars ago with
//! the return realized since. Neutral outcomes are dropped from training.

use anyhow::Result;
use statrs::statistics::Statistics;
use tracing::{debug, info};

use crate::metrics::indicators;
use crate::models::{Signal, SignalType};

use super::Strategy;

const FEATURE_COUNT: usize = 11;

/// Bars between a feature snapshot and its label.
const LABEL_HORIZON: usize = 5;

/// Return over the horizon that counts as a move.
const LABEL_THRESHOLD: f64 = 0.005;

const MIN_TRAINING_SAMPLES: usize = 100;
const MIN_LABELED_SAMPLES: usize = 50;
const MAX_TRAINING_SAMPLES: usize = 10_000;
const RETAINED_TRAINING_SAMPLES: usize = 5_000;

const EPOCHS: usize = 300;
const LEARNING_RATE: f64 = 0.5;
const L2_PENALTY: f64 = 1e-3;

type Features = [f64; FEATURE_COUNT];

/// Binary logistic model with per-feature standardization.
#[derive(Debug, Clone)]
struct LogisticModel {
    means: Features,
    scales: Features,
    weights: Features,
    bias: f64,
}

impl LogisticModel {
    /// Fit on samples labeled `true` for up moves.
    fn fit(samples: &[(Features, bool)]) -> Self {
        let n = samples.len().max(1) as f64;
        let mut means = [0.0; FEATURE_COUNT];
        let mut scales = [1.0; FEATURE_COUNT];
        for j in 0..FEATURE_COUNT {
            let column = samples.iter().map(|(x, _)| x[j]);
            means[j] = column.clone().mean();
            let std = column.population_std_dev();
            if std.is_finite() && std > 1e-12 {
                scales[j] = std;
            }
        }

        let mut model = Self {
            means,
            scales,
            weights: [0.0; FEATURE_COUNT],
            bias: 0.0,
        };

        let scaled: Vec<(Features, f64)> = samples
            .iter()
            .map(|(x, up)| (model.standardize(x), if *up { 1.0 } else { 0.0 }))
            .collect();

        for _ in 0..EPOCHS {
            let mut grad_w = [0.0; FEATURE_COUNT];
            let mut grad_b = 0.0;
            for (x, y) in &scaled {
                let err = model.probability_scaled(x) - y;
                for j in 0..FEATURE_COUNT {
                    grad_w[j] += err * x[j];
                }
                grad_b += err;
            }
            for j in 0..FEATURE_COUNT {
                model.weights[j] -= LEARNING_RATE * (grad_w[j] / n + L2_PENALTY * model.weights[j]);
            }
            model.bias -= LEARNING_RATE * grad_b / n;
        }

        model
    }

    fn standardize(&self, x: &Features) -> Features {
        let mut out = [0.0; FEATURE_COUNT];
        for j in 0..FEATURE_COUNT {
            out[j] = (x[j] - self.means[j]) / self.scales[j];
        }
        out
    }

    fn probability_scaled(&self, x: &Features) -> f64 {
        let score: f64 = self.weights.iter().zip(x).map(|(w, v)| w * v).sum::<f64>() + self.bias;
        1.0 / (1.0 + (-score).exp())
    }

    /// Probability of an up move.
    fn probability_up(&self, x: &Features) -> f64 {
        let p = self.probability_scaled(&self.standardize(x));
        if p.is_finite() {
            p
        } else {
            0.5
        }
    }
}

pub struct ModelPredictor {
    lookback_period: usize,
    prediction_threshold: f64,
    retrain_interval: usize,
    model: Option<LogisticModel>,
    training_data: Vec<(Features, i8)>,
    predictions_count: usize,
}

impl Default for ModelPredictor {
    fn default() -> Self {
        Self::new(100, 0.6, 1000)
    }
}

impl ModelPredictor {
    pub fn new(lookback_period: usize, prediction_threshold: f64, retrain_interval: usize) -> Self {
        Self {
            lookback_period,
            prediction_threshold,
            retrain_interval: retrain_interval.max(1),
            model: None,
            training_data: Vec::new(),
            predictions_count: 0,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    pub fn training_samples(&self) -> usize {
        self.training_data.len()
    }

    fn train(&mut self) {
        if self.training_data.len() < MIN_TRAINING_SAMPLES {
            return;
        }
        let labeled: Vec<(Features, bool)> = self
            .training_data
            .iter()
            .filter(|(_, label)| *label != 0)
            .map(|(x, label)| (*x, *label > 0))
            .collect();
        if labeled.len() < MIN_LABELED_SAMPLES {
            return;
        }

        self.model = Some(LogisticModel::fit(&labeled));
        info!(samples = labeled.len(), "Prediction model trained");
    }
}

/// Feature vector for the latest bar.
fn extract_features(prices: &[f64], volumes: &[f64]) -> Features {
    let n = prices.len();
    let ret = |lag: usize| -> f64 {
        if n > lag && prices[n - 1 - lag] != 0.0 {
            (prices[n - 1] - prices[n - 1 - lag]) / prices[n - 1 - lag]
        } else {
            0.0
        }
    };
    let last = prices.last().copied().unwrap_or(0.0);

    let rsi = indicators::rsi(prices, 14).last().map(|r| r / 100.0).unwrap_or(0.5);

    let macd = indicators::macd(prices, 12, 26, 9);
    let (macd_line, macd_hist) = match (macd.line.last(), macd.histogram.last()) {
        (Some(l), Some(h)) if last != 0.0 => (l / last, h / last),
        _ => (0.0, 0.0),
    };

    let (bb_width, bb_position) = match indicators::bollinger_bands(prices, 20, 2.0).last() {
        Some((upper, middle, lower)) => {
            let width = if middle != 0.0 { (upper - lower) / middle } else { 0.0 };
            let position = if upper != lower {
                (last - lower) / (upper - lower)
            } else {
                0.5
            };
            (width, position)
        }
        None => (0.0, 0.5),
    };

    let volume_ratio = if volumes.len() >= 20 {
        indicators::volume_ratio(volumes, 20).min(5.0)
    } else {
        1.0
    };

    [
        ret(5),
        ret(10),
        ret(20),
        rsi,
        macd_line,
        macd_hist,
        bb_width,
        bb_position,
        volume_ratio,
        relative_volatility(prices, 20),
        ret(9),
    ]
}

/// Standard deviation of the last `window` prices over their mean.
fn relative_volatility(prices: &[f64], window: usize) -> f64 {
    if prices.len() < window {
        return 0.0;
    }
    let recent = &prices[prices.len() - window..];
    let mean = recent.iter().mean();
    if mean == 0.0 {
        return 0.0;
    }
    recent.iter().population_std_dev() / mean
}

/// Direction of the move over the last `LABEL_HORIZON` bars: 1 up, -1 down, 0 neutral.
fn label(prices: &[f64]) -> i8 {
    let n = prices.len();
    if n < LABEL_HORIZON + 1 {
        return 0;
    }
    let base = prices[n - 1 - LABEL_HORIZON];
    if base == 0.0 {
        return 0;
    }
    let change = (prices[n - 1] - base) / base;
    if change > LABEL_THRESHOLD {
        1
    } else if change < -LABEL_THRESHOLD {
        -1
    } else {
        0
    }
}

impl Strategy for ModelPredictor {
    fn name(&self) -> &str {
        "ModelPredictor"
    }

    fn required_history_length(&self) -> usize {
        self.lookback_period
    }

    fn analyze(&mut self, symbol: &str, prices: &[f64], volumes: &[f64]) -> Result<Option<Signal>> {
        if prices.len() < self.required_history_length() {
            return Ok(None);
        }

        let features = extract_features(prices, volumes);

        if prices.len() >= self.lookback_period + LABEL_HORIZON {
            let past_prices = &prices[..prices.len() - LABEL_HORIZON];
            let past_volumes = if volumes.len() > LABEL_HORIZON {
                &volumes[..volumes.len() - LABEL_HORIZON]
            } else {
                volumes
            };
            self.training_data
                .push((extract_features(past_prices, past_volumes), label(prices)));

            if self.training_data.len() > MAX_TRAINING_SAMPLES {
                let excess = self.training_data.len() - RETAINED_TRAINING_SAMPLES;
                self.training_data.drain(..excess);
            }
        }

        self.predictions_count += 1;
        if !self.is_trained() || self.predictions_count % self.retrain_interval == 0 {
            self.train();
        }

        let Some(model) = &self.model else {
            debug!(symbol = %symbol, samples = self.training_samples(), "Model not trained yet");
            return Ok(None);
        };

        let p_up = model.probability_up(&features);
        let (signal_type, probability) = if p_up >= 0.5 {
            (SignalType::Long, p_up)
        } else {
            (SignalType::Short, 1.0 - p_up)
        };
        if probability < self.prediction_threshold {
            debug!(symbol = %symbol, probability = probability, "Prediction below threshold");
            return Ok(None);
        }

        let Some(&price) = prices.last() else {
            return Ok(None);
        };
        let stop_distance = price * relative_volatility(prices, 20) * 2.0;
        let (stop_loss, take_profit) = if signal_type == SignalType::Long {
            (price - stop_distance, price + stop_distance * 1.5)
        } else {
            (price + stop_distance, price - stop_distance * 1.5)
        };

        Ok(Some(
            Signal::new(signal_type, symbol, probability, price)
                .with_stops(Some(stop_loss), Some(take_profit))
                .with_leverage(5)
                .with_reason(format!(
                    "Model prediction: {}, confidence: {:.2}%",
                    signal_type,
                    probability * 100.0
                ))
                .from_strategy(self.name()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rising(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 * 1.01f64.powi(i as i32)).collect()
    }

    #[test]
    fn test_labels() {
        assert_eq!(label(&[100.0, 0.0, 0.0, 0.0, 0.0, 101.0]), 1);
        assert_eq!(label(&[100.0, 0.0, 0.0, 0.0, 0.0, 99.0]), -1);
        assert_eq!(label(&[100.0, 0.0, 0.0, 0.0, 0.0, 100.2]), 0);
        assert_eq!(label(&[100.0, 101.0]), 0);
    }

    #[test]
    fn test_flat_features() {
        let prices = vec![100.0; 60];
        let features = extract_features(&prices, &prices);
        assert_eq!(features[0], 0.0);
        assert_eq!(features[3], 1.0);
        assert_eq!(features[7], 0.5);
        assert_eq!(features[8], 1.0);
        assert_eq!(features[9], 0.0);
    }

    #[test]
    fn test_model_separates_classes() {
        let samples: Vec<(Features, bool)> = (0..100)
            .map(|i| {
                let x = i as f64 / 10.0 - 5.0;
                let mut f = [0.0; FEATURE_COUNT];
                f[0] = x;
                (f, x > 0.0)
            })
            .collect();
        let model = LogisticModel::fit(&samples);

        let mut up = [0.0; FEATURE_COUNT];
        up[0] = 4.0;
        let mut down = [0.0; FEATURE_COUNT];
        down[0] = -4.0;
        assert!(model.probability_up(&up) > 0.9);
        assert!(model.probability_up(&down) < 0.1);
    }

    #[test]
    fn test_untrained_emits_nothing() {
        let mut predictor = ModelPredictor::default();
        let prices = rising(110);
        let signal = predictor.analyze("XBTUSDTM", &prices, &prices).unwrap();
        assert!(signal.is_none());
        assert_eq!(predictor.training_samples(), 1);
        assert!(!predictor.is_trained());
    }

    #[test]
    fn test_learns_persistent_uptrend() {
        let mut predictor = ModelPredictor::default();
        let prices = rising(220);
        let volumes = vec![1000.0; 220];

        let mut last = None;
        for n in 105..=220 {
            last = predictor.analyze("XBTUSDTM", &prices[..n], &volumes[..n]).unwrap();
        }

        assert!(predictor.is_trained());
        let signal = last.unwrap();
        assert_eq!(signal.signal_type, SignalType::Long);
        assert!(signal.confidence >= 0.6);
        assert_eq!(signal.strategy_name, "ModelPredictor");
        assert!(signal.stop_loss.unwrap() < signal.price);
    }
}
