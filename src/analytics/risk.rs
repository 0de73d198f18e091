use super::statistics::sorted_copy;
use crate::errors::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// Empirical lower-tail VaR/CVaR over simulated terminal prices.
///
/// For confidence p over N sorted values:
///   idx   = floor((1 - p) * N), clamped to [0, N - 1]
///   VaR   = sorted[idx]
///   CVaR  = mean(sorted[0..=idx])
///
/// Index selection is nearest-rank-below (floor), never interpolated, so a
/// given sample always yields the same figures. Values are absolute price
/// levels, not returns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub var_95: f64,
    pub var_99: f64,
    pub cvar_95: f64,
    pub cvar_99: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    P95,
    P99,
}

impl Confidence {
    /// Tail mass in percent: 5 for 95%, 1 for 99%.
    #[inline]
    fn tail_percent(self) -> usize {
        match self {
            Confidence::P95 => 5,
            Confidence::P99 => 1,
        }
    }

    /// floor((1 - p) * n) in exact integer arithmetic, clamped to the last index.
    #[inline]
    pub fn tail_index(self, n: usize) -> usize {
        (n * self.tail_percent() / 100).min(n.saturating_sub(1))
    }
}

/// (VaR, CVaR) at one confidence level. `sorted` must be ascending and non-empty.
fn tail_pair(sorted: &[f64], confidence: Confidence) -> (f64, f64) {
    let idx = confidence.tail_index(sorted.len());
    let var = sorted[idx];
    let tail = &sorted[..=idx];
    let cvar = tail.iter().sum::<f64>() / tail.len() as f64;
    // summation rounding can lift the mean a hair above the threshold
    (var, cvar.min(var))
}

impl RiskMetrics {
    pub fn from_terminal_values(values: &[f64]) -> EngineResult<Self> {
        Self::from_sorted(&sorted_copy(values))
    }

    pub fn from_sorted(sorted: &[f64]) -> EngineResult<Self> {
        if sorted.is_empty() {
            return Err(EngineError::EmptyInput("no terminal values for risk metrics".into()));
        }
        let (var_95, cvar_95) = tail_pair(sorted, Confidence::P95);
        let (var_99, cvar_99) = tail_pair(sorted, Confidence::P99);
        Ok(Self {
            var_95,
            var_99,
            cvar_95,
            cvar_99,
        })
    }
}
