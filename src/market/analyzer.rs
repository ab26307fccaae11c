//! Market Snapshot Provider: per-symbol snapshots and pair ranking.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::api::FuturesExchange;
use crate::config::TradingConfig;
use crate::metrics::indicators;
use crate::models::MarketSnapshot;

/// Candle size in minutes for snapshots and strategy history.
pub const KLINE_GRANULARITY: u32 = 60;

/// Candles that make up the 24h range.
const DAY_CANDLES: usize = 24;

const MAX_VOLUME_SCORE: f64 = 10.0;

/// Ranking of one trading pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairScore {
    pub symbol: String,
    pub volume_score: f64,
    pub volatility_score: f64,
    pub trend_score: f64,

    /// 0.4 * volume + 0.4 * volatility + 0.2 * trend
    pub total_score: f64,
}

/// Close prices and volumes, oldest first.
#[derive(Debug, Clone, Default)]
pub struct PriceHistory {
    pub prices: Vec<f64>,
    pub volumes: Vec<f64>,
}

impl PriceHistory {
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

/// Fetches market data, keeps the latest snapshot per symbol, and ranks pairs.
pub struct MarketAnalyzer {
    exchange: Arc<dyn FuturesExchange>,
    config: TradingConfig,
    cache: HashMap<String, MarketSnapshot>,
}

impl MarketAnalyzer {
    pub fn new(exchange: Arc<dyn FuturesExchange>, config: TradingConfig) -> Self {
        Self {
            exchange,
            config,
            cache: HashMap::new(),
        }
    }

    /// Snapshot for `symbol`. `None` when the exchange has no data or a request fails.
    pub async fn get_market_data(&mut self, symbol: &str) -> Option<MarketSnapshot> {
        match self.fetch_snapshot(symbol).await {
            Ok(Some(snapshot)) => {
                self.cache.insert(symbol.to_string(), snapshot.clone());
                Some(snapshot)
            }
            Ok(None) => {
                debug!(symbol = %symbol, "No ticker data");
                None
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Failed to get market data");
                None
            }
        }
    }

    async fn fetch_snapshot(&self, symbol: &str) -> Result<Option<MarketSnapshot>> {
        let Some(ticker) = self
            .exchange
            .get_ticker(symbol)
            .await
            .context("Failed to fetch ticker")?
        else {
            return Ok(None);
        };

        let klines = self
            .exchange
            .get_klines(symbol, KLINE_GRANULARITY, None, None)
            .await
            .context("Failed to fetch klines")?;
        let recent = &klines[klines.len().saturating_sub(DAY_CANDLES)..];

        let (high, low) = if recent.is_empty() {
            (ticker.price, ticker.price)
        } else {
            (
                recent.iter().map(|k| k.high).fold(f64::MIN, f64::max),
                recent.iter().map(|k| k.low).fold(f64::MAX, f64::min),
            )
        };
        let closes: Vec<f64> = recent.iter().map(|k| k.close).collect();

        Ok(Some(
            MarketSnapshot::new(symbol, ticker.price, ticker.volume_24h, high, low)
                .with_trend(indicators::trend_strength(&closes)),
        ))
    }

    /// Symbols of contracts open for trading. Empty on failure.
    pub async fn get_tradeable_pairs(&self) -> Vec<String> {
        match self.exchange.get_contracts().await {
            Ok(contracts) => contracts
                .into_iter()
                .filter(|c| c.is_open())
                .map(|c| c.symbol)
                .collect(),
            Err(e) => {
                warn!(error = %e, "Failed to get tradeable pairs");
                Vec::new()
            }
        }
    }

    /// Candle history for strategy analysis. `None` when empty or on failure.
    pub async fn get_price_history(&self, symbol: &str) -> Option<PriceHistory> {
        match self
            .exchange
            .get_klines(symbol, KLINE_GRANULARITY, None, None)
            .await
        {
            Ok(klines) if !klines.is_empty() => Some(PriceHistory {
                prices: klines.iter().map(|k| k.close).collect(),
                volumes: klines.iter().map(|k| k.volume).collect(),
            }),
            Ok(_) => None,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Failed to update market data");
                None
            }
        }
    }

    /// Score a snapshot against the configured volume floor and volatility band.
    pub fn calculate_pair_score(&self, snapshot: &MarketSnapshot) -> PairScore {
        let volume_score = if self.config.min_volume_usd > 0.0 {
            (snapshot.volume_24h / self.config.min_volume_usd).min(MAX_VOLUME_SCORE)
        } else {
            MAX_VOLUME_SCORE
        };

        let (min_vol, max_vol) = (self.config.min_volatility, self.config.max_volatility);
        let v = snapshot.volatility;
        let volatility_score = if v < min_vol {
            if min_vol > 0.0 {
                v / min_vol
            } else {
                0.0
            }
        } else if v > max_vol {
            max_vol / v
        } else if max_vol > min_vol {
            1.0 + (v - min_vol) / (max_vol - min_vol)
        } else {
            1.0
        };

        let trend_score = 1.0 + snapshot.trend_strength.abs();
        let total_score = volume_score * 0.4 + volatility_score * 0.4 + trend_score * 0.2;

        PairScore {
            symbol: snapshot.symbol.clone(),
            volume_score,
            volatility_score,
            trend_score,
            total_score,
        }
    }

    /// Rank open pairs and return the best `max_pairs`.
    ///
    /// When nothing passes the volume and volatility filters, every fetched pair
    /// is ranked by raw 24h volume instead.
    pub async fn select_best_pairs(&mut self, max_pairs: usize) -> Vec<PairScore> {
        let symbols = self.get_tradeable_pairs().await;
        let mut candidates = Vec::with_capacity(symbols.len());

        for symbol in &symbols {
            if let Some(snapshot) = self.get_market_data(symbol).await {
                let score = self.calculate_pair_score(&snapshot);
                candidates.push((snapshot, score));
            }
        }

        let mut selected: Vec<(MarketSnapshot, PairScore)> = candidates
            .iter()
            .filter(|(s, _)| s.volume_24h >= self.config.min_volume_usd)
            .filter(|(s, _)| {
                s.volatility >= self.config.min_volatility && s.volatility <= self.config.max_volatility
            })
            .cloned()
            .collect();

        let pairs: Vec<PairScore> = if selected.is_empty() {
            if !candidates.is_empty() {
                warn!(
                    candidates = candidates.len(),
                    "No pairs passed filters, falling back to top volume"
                );
            }
            candidates.sort_by(|a, b| descending(a.0.volume_24h, b.0.volume_24h));
            candidates.into_iter().map(|(_, score)| score).collect()
        } else {
            selected.sort_by(|a, b| descending(a.1.total_score, b.1.total_score));
            selected.into_iter().map(|(_, score)| score).collect()
        };

        let pairs: Vec<PairScore> = pairs.into_iter().take(max_pairs).collect();
        info!(
            scanned = symbols.len(),
            selected = pairs.len(),
            "Pair selection complete"
        );
        pairs
    }

    /// Last snapshot fetched for `symbol`.
    pub fn cached(&self, symbol: &str) -> Option<&MarketSnapshot> {
        self.cache.get(symbol)
    }
}

fn descending(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{klines_from_closes, MockExchange};

    fn analyzer(exchange: MockExchange) -> MarketAnalyzer {
        MarketAnalyzer::new(Arc::new(exchange), TradingConfig::default())
    }

    // Closes 100..=103 around a 102 ticker give a volatility of about 0.039
    fn in_band() -> Vec<f64> {
        vec![100.0, 101.0, 102.0, 103.0]
    }

    #[tokio::test]
    async fn test_market_data_from_klines() {
        let exchange = MockExchange::new()
            .with_ticker("XBTUSDTM", 102.0, 2_000_000.0)
            .with_klines("XBTUSDTM", klines_from_closes(&in_band(), 10.0));
        let mut analyzer = analyzer(exchange);

        let snapshot = analyzer.get_market_data("XBTUSDTM").await.unwrap();
        assert!((snapshot.high_24h - 103.0 * 1.005).abs() < 1e-9);
        assert!((snapshot.low_24h - 99.5).abs() < 1e-9);
        assert!((snapshot.volatility - (103.515 - 99.5) / 102.0).abs() < 1e-9);
        assert!(analyzer.cached("XBTUSDTM").is_some());
    }

    #[tokio::test]
    async fn test_market_data_trend() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let exchange = MockExchange::new()
            .with_ticker("SOLUSDTM", 129.0, 1.0)
            .with_klines("SOLUSDTM", klines_from_closes(&closes, 1.0));
        let mut analyzer = analyzer(exchange);

        let snapshot = analyzer.get_market_data("SOLUSDTM").await.unwrap();
        assert!(snapshot.trend_strength > 0.0);
        let score = analyzer.calculate_pair_score(&snapshot);
        assert!(score.trend_score > 1.0);
    }

    #[tokio::test]
    async fn test_market_data_uses_last_day_only() {
        let mut closes = vec![500.0];
        closes.extend(std::iter::repeat(100.0).take(24));
        let exchange = MockExchange::new()
            .with_ticker("ETHUSDTM", 100.0, 1.0)
            .with_klines("ETHUSDTM", klines_from_closes(&closes, 1.0));
        let mut analyzer = analyzer(exchange);

        let snapshot = analyzer.get_market_data("ETHUSDTM").await.unwrap();
        assert!((snapshot.high_24h - 100.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_market_data_without_klines_uses_price() {
        let exchange = MockExchange::new().with_ticker("ETHUSDTM", 50.0, 1.0);
        let mut analyzer = analyzer(exchange);

        let snapshot = analyzer.get_market_data("ETHUSDTM").await.unwrap();
        assert_eq!(snapshot.high_24h, 50.0);
        assert_eq!(snapshot.low_24h, 50.0);
        assert_eq!(snapshot.volatility, 0.0);
    }

    #[tokio::test]
    async fn test_market_data_failures_degrade() {
        let exchange = MockExchange::new()
            .with_ticker("XBTUSDTM", 102.0, 1.0)
            .failing_klines();
        let mut analyzer = analyzer(exchange);

        assert!(analyzer.get_market_data("XBTUSDTM").await.is_none());
        assert!(analyzer.get_market_data("MISSING").await.is_none());
        assert!(analyzer.cached("XBTUSDTM").is_none());
        assert!(analyzer.get_price_history("XBTUSDTM").await.is_none());
    }

    #[tokio::test]
    async fn test_tradeable_pairs_only_open() {
        let exchange = MockExchange::new()
            .with_contract("XBTUSDTM", "Open")
            .with_contract("OLDUSDTM", "Closed");
        let analyzer = analyzer(exchange);

        assert_eq!(analyzer.get_tradeable_pairs().await, vec!["XBTUSDTM".to_string()]);
    }

    #[test]
    fn test_pair_score_components() {
        let analyzer = analyzer(MockExchange::new());

        let snapshot = MarketSnapshot::new("XBTUSDTM", 100.0, 20_000_000.0, 104.0, 99.0);
        let score = analyzer.calculate_pair_score(&snapshot);
        assert_eq!(score.volume_score, 10.0);
        assert!((score.volatility_score - (1.0 + 0.03 / 0.13)).abs() < 1e-9);
        assert_eq!(score.trend_score, 1.0);
        let expected = 0.4 * 10.0 + 0.4 * score.volatility_score + 0.2;
        assert!((score.total_score - expected).abs() < 1e-9);

        let quiet = MarketSnapshot::new("A", 100.0, 500_000.0, 100.5, 99.5);
        let score = analyzer.calculate_pair_score(&quiet);
        assert_eq!(score.volume_score, 0.5);
        assert!((score.volatility_score - 0.5).abs() < 1e-9);

        let wild = MarketSnapshot::new("B", 100.0, 1.0, 115.0, 85.0).with_trend(-0.5);
        let score = analyzer.calculate_pair_score(&wild);
        assert!((score.volatility_score - 0.5).abs() < 1e-9);
        assert_eq!(score.trend_score, 1.5);
    }

    #[tokio::test]
    async fn test_select_filters_and_ranks() {
        let exchange = MockExchange::new()
            .with_contract("LOWVOL", "Open")
            .with_contract("FLAT", "Open")
            .with_contract("BIG", "Open")
            .with_contract("MID", "Open")
            .with_ticker("LOWVOL", 102.0, 10_000.0)
            .with_klines("LOWVOL", klines_from_closes(&in_band(), 1.0))
            .with_ticker("FLAT", 100.0, 9_000_000.0)
            .with_klines("FLAT", klines_from_closes(&[100.0; 24], 1.0))
            .with_ticker("BIG", 102.0, 8_000_000.0)
            .with_klines("BIG", klines_from_closes(&in_band(), 1.0))
            .with_ticker("MID", 102.0, 2_000_000.0)
            .with_klines("MID", klines_from_closes(&in_band(), 1.0));
        let mut analyzer = analyzer(exchange);

        let pairs = analyzer.select_best_pairs(5).await;
        let symbols: Vec<&str> = pairs.iter().map(|p| p.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BIG", "MID"]);

        let pairs = analyzer.select_best_pairs(1).await;
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].symbol, "BIG");
    }

    #[tokio::test]
    async fn test_select_falls_back_to_volume() {
        let exchange = MockExchange::new()
            .with_contract("SMALL", "Open")
            .with_contract("LARGER", "Open")
            .with_ticker("SMALL", 102.0, 200_000.0)
            .with_klines("SMALL", klines_from_closes(&in_band(), 1.0))
            .with_ticker("LARGER", 102.0, 500_000.0)
            .with_klines("LARGER", klines_from_closes(&in_band(), 1.0));
        let mut analyzer = analyzer(exchange);

        let pairs = analyzer.select_best_pairs(5).await;
        let symbols: Vec<&str> = pairs.iter().map(|p| p.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["LARGER", "SMALL"]);
    }

    #[tokio::test]
    async fn test_select_without_contracts() {
        let mut analyzer = analyzer(MockExchange::new());
        assert!(analyzer.select_best_pairs(3).await.is_empty());
    }

    #[tokio::test]
    async fn test_price_history() {
        let exchange =
            MockExchange::new().with_klines("XBTUSDTM", klines_from_closes(&[1.0, 2.0, 3.0], 7.0));
        let analyzer = analyzer(exchange);

        let history = analyzer.get_price_history("XBTUSDTM").await.unwrap();
        assert_eq!(history.prices, vec![1.0, 2.0, 3.0]);
        assert_eq!(history.volumes, vec![7.0; 3]);
        assert!(analyzer.get_price_history("NONE").await.is_none());
    }
}
