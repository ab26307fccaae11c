//! Market snapshots and trading-pair selection.

mod analyzer;

pub use analyzer::{MarketAnalyzer, PairScore, PriceHistory};
