//! Signal-generating strategies and the arbitrator that chooses between them.

mod arbitrage;
mod manager;
mod predictor;
mod scalping;
mod trend_following;

use anyhow::Result;

use crate::models::Signal;

pub use arbitrage::ArbitrageStrategy;
pub use manager::{StrategyManager, StrategyStats};
pub use predictor::ModelPredictor;
pub use scalping::ScalpingStrategy;
pub use trend_following::TrendFollowingStrategy;

/// A signal generator over a close-price and volume history.
///
/// `&mut self` lets strategies keep per-symbol state between calls.
pub trait Strategy: Send + Sync {
    /// Name stamped on every signal this strategy emits.
    fn name(&self) -> &str;

    /// Samples needed before `analyze` produces anything.
    fn required_history_length(&self) -> usize;

    /// Analyze the history for `symbol`, oldest sample first.
    fn analyze(&mut self, symbol: &str, prices: &[f64], volumes: &[f64]) -> Result<Option<Signal>>;
}

/// The default strategy set in registration order.
pub fn default_strategies() -> Vec<Box<dyn Strategy>> {
    vec![
        Box::new(TrendFollowingStrategy::default()),
        Box::new(ScalpingStrategy::default()),
        Box::new(ArbitrageStrategy::default()),
        Box::new(ModelPredictor::default()),
    ]
}
