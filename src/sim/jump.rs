use super::random::VariateSource;
use crate::errors::EngineResult;
use serde::{Deserialize, Serialize};

/// Merton jump configuration. `jump_intensity` is expected jumps per year,
/// jump sizes are log-normal: ln(Y) ~ N(jump_mean, jump_std_dev^2).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct JumpParams {
    pub jump_intensity: f64,
    pub jump_mean: f64,
    pub jump_std_dev: f64,
}

/// Compound Poisson log-jump generator for a fixed step length.
///
/// Per step: k ~ Poisson(lambda * dt) and J is the sum of k draws from
/// N(jump_mean, jump_std_dev^2). Given k that sum is exactly
/// N(k * jump_mean, k * jump_std_dev^2), so it is sampled with one normal draw
/// and a step costs O(1) whatever the rate. With lambda = 0 the model is inert
/// and consumes no draws, so a jump-free run reproduces a pure GBM run draw for draw.
#[derive(Debug, Clone, Copy)]
pub struct JumpModel {
    params: JumpParams,
    step_mean: f64,
}

impl JumpModel {
    pub fn new(params: JumpParams, dt: f64) -> Self {
        Self {
            params,
            step_mean: params.jump_intensity * dt,
        }
    }

    pub fn disabled() -> Self {
        Self::new(JumpParams::default(), 0.0)
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.step_mean > 0.0
    }

    #[inline]
    pub fn params(&self) -> JumpParams {
        self.params
    }

    /// Log-price jump contribution for one step.
    #[inline]
    pub fn log_jump<R: VariateSource + ?Sized>(&self, rng: &mut R) -> EngineResult<f64> {
        if !self.is_active() {
            return Ok(0.0);
        }
        let k = rng.poisson(self.step_mean)?;
        if k == 0 {
            return Ok(0.0);
        }
        let k = k as f64;
        let z = rng.standard_normal();
        Ok(k * self.params.jump_mean + k.sqrt() * self.params.jump_std_dev * z)
    }

    /// E[J] per step = lambda * dt * jump_mean.
    #[inline]
    pub fn expected_log_jump(&self) -> f64 {
        self.step_mean * self.params.jump_mean
    }
}
