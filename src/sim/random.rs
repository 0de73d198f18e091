use crate::errors::{EngineError, EngineResult};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Poisson, StandardNormal};

/// Source of the variates a path consumes. Implemented by `RandomSource`;
/// tests substitute scripted sources to pin individual draws.
pub trait VariateSource {
    /// One draw from N(0, 1).
    fn standard_normal(&mut self) -> f64;

    /// One draw from Poisson(mean). Must return 0 without consuming state
    /// when `mean <= 0`, and fail rather than substitute a value when the
    /// mean is outside what the sampler supports.
    fn poisson(&mut self, mean: f64) -> EngineResult<u64>;
}

/// Seeded per-path generator.
///
/// Every path gets the request seed plus its own ChaCha stream number, so a
/// path's draws depend only on `(seed, path_id)` and never on which worker
/// thread ran it or in what order.
#[derive(Debug, Clone)]
pub struct RandomSource {
    rng: ChaCha8Rng,
}

impl RandomSource {
    pub fn for_path(seed: u64, path_id: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(path_id);
        Self { rng }
    }

    /// Fresh request seed from OS entropy.
    pub fn draw_seed() -> u64 {
        rand::random::<u64>()
    }
}

impl VariateSource for RandomSource {
    #[inline]
    fn standard_normal(&mut self) -> f64 {
        StandardNormal.sample(&mut self.rng)
    }

    fn poisson(&mut self, mean: f64) -> EngineResult<u64> {
        if mean.is_nan() || mean <= 0.0 {
            return Ok(0);
        }
        let dist = Poisson::new(mean)
            .map_err(|e| EngineError::Numerical(format!("poisson mean {mean}: {e}")))?;
        let k: f64 = dist.sample(&mut self.rng);
        Ok(k as u64)
    }
}
