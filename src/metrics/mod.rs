//! Technical indicators and statistics used by strategies and risk control.

mod calculator;
pub mod indicators;

pub use calculator::{MarketConditions, MetricsCalculator, PerformanceTracker, StrategyPerformance};
