pub mod jump;
pub mod orchestrator;
pub mod path;
pub mod random;
pub mod schedule;

use crate::analytics::risk::RiskMetrics;
use crate::analytics::statistics::Statistics;
use serde::{Deserialize, Serialize};

pub use jump::{JumpModel, JumpParams};
pub use orchestrator::{CancelToken, SimulationOrchestrator};
pub use path::PathSimulator;
pub use random::{RandomSource, VariateSource};
pub use schedule::ModifierSchedule;

fn default_dt() -> f64 {
    1.0
}

/// One simulation request.
///
/// `drift`, `volatility` and `seed` are optional on the wire. The orchestrator
/// fills them before running, so the echoed params in a `SimulationResult`
/// always carry the values actually used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    pub start_price: f64,
    /// Horizon T in years.
    pub years: f64,
    #[serde(default = "default_dt")]
    pub dt: f64,
    pub num_paths: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volatility: Option<f64>,
    #[serde(default)]
    pub modifiers: Vec<YearlyModifier>,
    #[serde(default)]
    pub jump_intensity: f64,
    #[serde(default)]
    pub jump_mean: f64,
    #[serde(default)]
    pub jump_std_dev: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Free text carried through to history. Never inspected by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
}

impl SimulationParams {
    /// Plain GBM request with no modifiers and no jumps.
    pub fn new(start_price: f64, years: f64, dt: f64, num_paths: usize) -> Self {
        Self {
            start_price,
            years,
            dt,
            num_paths,
            drift: None,
            volatility: None,
            modifiers: Vec::new(),
            jump_intensity: 0.0,
            jump_mean: 0.0,
            jump_std_dev: 0.0,
            seed: None,
            scenario: None,
        }
    }

    #[inline]
    pub fn jump_params(&self) -> JumpParams {
        JumpParams {
            jump_intensity: self.jump_intensity,
            jump_mean: self.jump_mean,
            jump_std_dev: self.jump_std_dev,
        }
    }
}

/// Additive drift/volatility override for one calendar year of the horizon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct YearlyModifier {
    pub year: u32,
    #[serde(default)]
    pub drift_mod: f64,
    #[serde(default)]
    pub volatility_mod: f64,
}

/// One simulated trajectory. `times[i]` is `i * dt`, `prices[0]` is the start price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePath {
    pub path_id: usize,
    pub times: Vec<f64>,
    pub prices: Vec<f64>,
}

impl PricePath {
    #[inline]
    pub fn terminal_price(&self) -> f64 {
        self.prices.last().copied().unwrap_or(0.0)
    }
}

/// Output of one run. `final_prices[i] == paths[i].prices[last]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub params: SimulationParams,
    pub paths: Vec<PricePath>,
    pub final_prices: Vec<f64>,
    pub statistics: Statistics,
    pub risk_metrics: RiskMetrics,
}
