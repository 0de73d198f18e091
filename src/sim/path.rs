use super::jump::JumpModel;
use super::orchestrator::CancelToken;
use super::random::VariateSource;
use super::schedule::{ModifierSchedule, StepParams};
use super::PricePath;
use crate::errors::{EngineError, EngineResult};

/// Steps between cancellation checks inside one path.
const CANCEL_CHECK_INTERVAL: usize = 256;

/// Log-Euler GBM step with an additive log-jump:
///
/// S_{t+1} = max(0, S_t * exp((mu_t - sigma_t^2/2) dt + sigma_t sqrt(dt) Z_t + J_t))
#[inline]
pub fn advance(price: f64, params: &StepParams, z: f64, log_jump: f64) -> f64 {
    let next = price * (params.drift_term + params.diffusion_scale * z + log_jump).exp();
    next.max(0.0)
}

/// Advances single price paths over `steps` discrete steps.
/// Holds only shared, read-only request state; every path brings its own variates.
#[derive(Debug, Clone, Copy)]
pub struct PathSimulator<'a> {
    schedule: &'a ModifierSchedule,
    jumps: &'a JumpModel,
    start_price: f64,
    steps: usize,
}

impl<'a> PathSimulator<'a> {
    pub fn new(
        schedule: &'a ModifierSchedule,
        jumps: &'a JumpModel,
        start_price: f64,
        steps: usize,
    ) -> Self {
        Self {
            schedule,
            jumps,
            start_price,
            steps,
        }
    }

    #[inline]
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Simulate one path. Draw order per step is fixed: one normal for the
    /// diffusion term, then the jump draws (none when jumps are inert).
    pub fn run<R: VariateSource + ?Sized>(
        &self,
        path_id: usize,
        rng: &mut R,
        cancel: &CancelToken,
    ) -> EngineResult<PricePath> {
        let dt = self.schedule.dt();
        let mut times = Vec::with_capacity(self.steps + 1);
        let mut prices = Vec::with_capacity(self.steps + 1);

        let mut price = self.start_price;
        times.push(0.0);
        prices.push(price);

        for t in 0..self.steps {
            if t % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let params = self.schedule.params_at_step(t);
            let z = rng.standard_normal();
            let j = self.jumps.log_jump(rng)?;

            price = advance(price, &params, z, j);
            if !price.is_finite() {
                return Err(EngineError::Numerical(format!(
                    "path {path_id} overflowed at step {}",
                    t + 1
                )));
            }

            times.push((t + 1) as f64 * dt);
            prices.push(price);
        }

        Ok(PricePath {
            path_id,
            times,
            prices,
        })
    }
}
