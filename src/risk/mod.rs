//! Risk management: adaptive parameter engine, signal gate, and position manager.

mod adaptive;
mod controller;
mod position_manager;

pub use adaptive::{AdaptiveRiskEngine, AdaptiveRiskParameters};
pub use controller::RiskController;
pub use position_manager::{PerformanceStats, PortfolioState, PositionManager};
