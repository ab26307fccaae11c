//! Technical indicators over price and volume series.
//!
//! Every function returns a series aligned to the end of its input: the last
//! element corresponds to the last input sample. Inputs shorter than the
//! indicator's warm-up period yield an empty series.

use statrs::statistics::Statistics;

/// Simple moving average. Output length is `prices.len() - period + 1`.
pub fn sma(prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || prices.len() < period {
        return Vec::new();
    }
    prices
        .windows(period)
        .map(|w| w.iter().sum::<f64>() / period as f64)
        .collect()
}

/// Exponential moving average seeded with the SMA of the first `period` samples.
pub fn ema(prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || prices.len() < period {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed = prices[..period].iter().sum::<f64>() / period as f64;

    let mut values = Vec::with_capacity(prices.len() - period + 1);
    values.push(seed);
    let mut last = seed;
    for price in &prices[period..] {
        last = (price - last) * multiplier + last;
        values.push(last);
    }
    values
}

/// Relative Strength Index with Wilder smoothing.
pub fn rsi(prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || prices.len() < period + 1 {
        return Vec::new();
    }

    let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let gains: Vec<f64> = deltas.iter().map(|d| d.max(0.0)).collect();
    let losses: Vec<f64> = deltas.iter().map(|d| (-d).max(0.0)).collect();

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;

    let p = period as f64;
    (period..deltas.len())
        .map(|i| {
            avg_gain = (avg_gain * (p - 1.0) + gains[i]) / p;
            avg_loss = (avg_loss * (p - 1.0) + losses[i]) / p;
            if avg_loss == 0.0 {
                100.0
            } else {
                100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
            }
        })
        .collect()
}

/// MACD line and histogram (line minus its signal EMA), of equal length.
#[derive(Debug, Clone, Default)]
pub struct Macd {
    pub line: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(prices: &[f64], fast: usize, slow: usize, signal_period: usize) -> Macd {
    if prices.len() < slow {
        return Macd::default();
    }

    let fast_ema = ema(prices, fast);
    let slow_ema = ema(prices, slow);
    if fast_ema.len() < slow_ema.len() {
        return Macd::default();
    }
    let offset = fast_ema.len() - slow_ema.len();

    let line: Vec<f64> = fast_ema[offset..]
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| f - s)
        .collect();
    let signal = ema(&line, signal_period);
    if signal.is_empty() {
        return Macd::default();
    }

    let line = line[line.len() - signal.len()..].to_vec();
    let histogram = line.iter().zip(&signal).map(|(m, s)| m - s).collect();

    Macd { line, histogram }
}

/// Bollinger bands around an SMA using the population standard deviation.
#[derive(Debug, Clone, Default)]
pub struct BollingerBands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

impl BollingerBands {
    /// Latest (upper, middle, lower) triple.
    pub fn last(&self) -> Option<(f64, f64, f64)> {
        Some((*self.upper.last()?, *self.middle.last()?, *self.lower.last()?))
    }
}

pub fn bollinger_bands(prices: &[f64], period: usize, num_std: f64) -> BollingerBands {
    if period == 0 || prices.len() < period {
        return BollingerBands::default();
    }

    let mut bands = BollingerBands::default();
    for window in prices.windows(period) {
        let mid = window.iter().sum::<f64>() / period as f64;
        let std = window.iter().population_std_dev();
        bands.upper.push(mid + num_std * std);
        bands.middle.push(mid);
        bands.lower.push(mid - num_std * std);
    }
    bands
}

/// Average True Range with Wilder smoothing.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    let n = highs.len().min(lows.len()).min(closes.len());
    if period == 0 || n < period + 1 {
        return Vec::new();
    }

    let true_ranges: Vec<f64> = (1..n)
        .map(|i| {
            let range = highs[i] - lows[i];
            let up = (highs[i] - closes[i - 1]).abs();
            let down = (lows[i] - closes[i - 1]).abs();
            range.max(up).max(down)
        })
        .collect();

    let p = period as f64;
    let mut last = true_ranges[..period].iter().sum::<f64>() / p;
    let mut values = vec![last];
    for tr in &true_ranges[period..] {
        last = (last * (p - 1.0) + tr) / p;
        values.push(last);
    }
    values
}

/// Coarse trend label from a short/long SMA comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

/// Bullish when the short SMA is more than 1% above the long SMA, bearish when
/// more than 1% below.
pub fn trend(prices: &[f64], short_period: usize, long_period: usize) -> Trend {
    let (Some(short), Some(long)) = (
        sma(prices, short_period).last().copied(),
        sma(prices, long_period).last().copied(),
    ) else {
        return Trend::Neutral;
    };

    if short > long * 1.01 {
        Trend::Bullish
    } else if short < long * 0.99 {
        Trend::Bearish
    } else {
        Trend::Neutral
    }
}

/// Normalized trend strength in [-1, 1]: relative SMA(10)/SMA(50) gap scaled by 10.
///
/// Falls back to shorter windows when fewer than 50 samples exist, and to 0
/// with fewer than 2.
pub fn trend_strength(prices: &[f64]) -> f64 {
    if prices.len() < 2 {
        return 0.0;
    }
    let long_period = prices.len().min(50);
    let short_period = long_period.min(10).max(1);

    match (sma(prices, short_period).last(), sma(prices, long_period).last()) {
        (Some(&short), Some(&long)) if long != 0.0 => ((short - long) / long * 10.0).clamp(-1.0, 1.0),
        _ => 0.0,
    }
}

/// Simple per-step returns.
pub fn returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

/// Ratio of the last volume to the mean of the trailing `window` volumes.
pub fn volume_ratio(volumes: &[f64], window: usize) -> f64 {
    let Some(&current) = volumes.last() else {
        return 1.0;
    };
    let start = volumes.len().saturating_sub(window);
    let avg = volumes[start..].iter().mean();
    if avg > 0.0 {
        current / avg
    } else {
        1.0
    }
}
