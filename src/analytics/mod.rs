pub mod risk;
pub mod statistics;

pub use risk::RiskMetrics;
pub use statistics::Statistics;
