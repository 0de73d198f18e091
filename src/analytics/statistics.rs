use crate::errors::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics as _;

/// Distributional summary of terminal prices.
/// `std` is the population standard deviation (divide by N).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl Statistics {
    pub fn from_terminal_values(values: &[f64]) -> EngineResult<Self> {
        Self::from_sorted(&sorted_copy(values))
    }

    /// `sorted` must be ascending.
    pub fn from_sorted(sorted: &[f64]) -> EngineResult<Self> {
        let n = sorted.len();
        if n == 0 {
            return Err(EngineError::EmptyInput("no terminal values for statistics".into()));
        }

        let mean = sorted.iter().mean();
        let std = scaled_population_std(sorted, sorted[0].abs().max(sorted[n - 1].abs()));

        Ok(Self {
            mean,
            median: median_of_sorted(sorted),
            std,
            min: sorted[0],
            max: sorted[n - 1],
        })
    }
}

/// Population std computed on `x / scale` and scaled back, so squared
/// deviations stay finite for terminal values far above sqrt(f64::MAX).
fn scaled_population_std(sorted: &[f64], scale: f64) -> f64 {
    if scale == 0.0 || !scale.is_finite() {
        return sorted.iter().population_std_dev().max(0.0);
    }
    let unit = sorted.iter().map(|x| x / scale).population_std_dev();
    (unit * scale).max(0.0)
}

/// Ascending copy using IEEE total order, so the result is stable for any input.
pub fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Middle element, or the midpoint of the two middle elements for even N.
#[inline]
fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    let mid = n / 2;
    if n % 2 == 1 {
        sorted[mid]
    } else {
        let (lo, hi) = (sorted[mid - 1], sorted[mid]);
        lo + (hi - lo) / 2.0
    }
}
