use super::YearlyModifier;

/// Absorbs float error in `step * dt` so e.g. step 10 at dt=0.1 lands in year 1.
const YEAR_EPS: f64 = 1e-9;

/// Effective per-step coefficients for one calendar year.
/// Stack-allocated, Copy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepParams {
    pub drift: f64,
    pub volatility: f64,
    /// (mu - sigma^2 / 2) * dt
    pub drift_term: f64,
    /// sigma * sqrt(dt)
    pub diffusion_scale: f64,
}

impl StepParams {
    #[inline]
    fn new(drift: f64, volatility: f64, dt: f64) -> Self {
        let volatility = volatility.max(0.0);
        Self {
            drift,
            volatility,
            drift_term: (drift - 0.5 * volatility * volatility) * dt,
            diffusion_scale: volatility * dt.sqrt(),
        }
    }
}

/// Dense year -> coefficients table built once per request.
///
/// Modifiers are additive: mu_y = mu + drift_mod, sigma_y = max(0, sigma + volatility_mod).
/// Years without a modifier use the base pair. Modifiers for years outside
/// [0, horizon) are dropped; a duplicated year keeps the last entry.
#[derive(Debug, Clone)]
pub struct ModifierSchedule {
    dt: f64,
    base: StepParams,
    by_year: Vec<StepParams>,
    modified_years: usize,
}

impl ModifierSchedule {
    pub fn build(
        base_drift: f64,
        base_volatility: f64,
        modifiers: &[YearlyModifier],
        years: f64,
        dt: f64,
    ) -> Self {
        let base = StepParams::new(base_drift, base_volatility, dt);
        let horizon_years = ((years - YEAR_EPS).ceil().max(1.0)) as usize;
        let mut by_year = vec![base; horizon_years];
        let mut touched = vec![false; horizon_years];

        for m in modifiers {
            let year = m.year as usize;
            if year >= horizon_years || (m.year as f64) >= years {
                continue;
            }
            by_year[year] = StepParams::new(
                base_drift + m.drift_mod,
                base_volatility + m.volatility_mod,
                dt,
            );
            touched[year] = true;
        }

        Self {
            dt,
            base,
            by_year,
            modified_years: touched.iter().filter(|t| **t).count(),
        }
    }

    /// Calendar year that step `step` (covering [step*dt, (step+1)*dt)) falls in.
    #[inline]
    pub fn year_of_step(&self, step: usize) -> usize {
        (step as f64 * self.dt + YEAR_EPS).floor() as usize
    }

    #[inline]
    pub fn params_for_year(&self, year: usize) -> StepParams {
        self.by_year.get(year).copied().unwrap_or(self.base)
    }

    #[inline]
    pub fn params_at_step(&self, step: usize) -> StepParams {
        self.params_for_year(self.year_of_step(step))
    }

    #[inline]
    pub fn base(&self) -> StepParams {
        self.base
    }

    #[inline]
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Number of distinct in-horizon years carrying an override.
    #[inline]
    pub fn modified_years(&self) -> usize {
        self.modified_years
    }

    /// Sum of (mu_t - sigma_t^2/2) * dt over the first `steps` steps: the
    /// expected log-return of a jump-free path.
    pub fn expected_log_return(&self, steps: usize) -> f64 {
        (0..steps).map(|t| self.params_at_step(t).drift_term).sum()
    }
}
