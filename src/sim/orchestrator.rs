use super::jump::JumpModel;
use super::path::PathSimulator;
use super::random::RandomSource;
use super::schedule::ModifierSchedule;
use super::{PricePath, SimulationParams, SimulationResult};
use crate::analytics::risk::RiskMetrics;
use crate::analytics::statistics::{sorted_copy, Statistics};
use crate::config::EngineLimits;
use crate::errors::{EngineError, EngineResult};
use portable_atomic::{AtomicBool, Ordering};
use rayon::prelude::*;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// Relative tolerance when checking that `years / dt` is a whole number.
const STEP_TOLERANCE: f64 = 1e-9;

/// Largest accepted expected jump count per step (`jump_intensity * dt`).
/// Well inside the Poisson sampler's domain; a step stays O(1) at any rate.
pub const MAX_STEP_JUMP_MEAN: f64 = 1e6;

/// Shared abort flag for one request. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A validated request: defaults resolved, schedule and jump model materialized.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub params: SimulationParams,
    pub steps: usize,
    pub seed: u64,
    pub schedule: ModifierSchedule,
    pub jumps: JumpModel,
}

/// Fans path generation out over a bounded rayon pool and reduces the ensemble.
///
/// The pool is built once and shared by every request; nothing else here is
/// shared across requests.
pub struct SimulationOrchestrator {
    pool: rayon::ThreadPool,
    limits: EngineLimits,
    default_drift: f64,
    default_volatility: f64,
}

impl SimulationOrchestrator {
    /// `worker_threads == 0` sizes the pool to the available parallelism.
    pub fn new(
        worker_threads: usize,
        limits: EngineLimits,
        default_drift: f64,
        default_volatility: f64,
    ) -> EngineResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads)
            .thread_name(|i| format!("path-worker-{i}"))
            .build()
            .map_err(|e| EngineError::Config(format!("worker pool: {e}")))?;

        tracing::info!(
            workers = pool.current_num_threads(),
            max_paths = limits.max_paths,
            max_steps = limits.max_steps,
            "simulation orchestrator ready"
        );

        Ok(Self {
            pool,
            limits,
            default_drift,
            default_volatility,
        })
    }

    #[inline]
    pub fn limits(&self) -> EngineLimits {
        self.limits
    }

    /// Validate a request and resolve its defaults. Fails fast: nothing is
    /// generated for a request that does not pass.
    pub fn prepare(&self, mut params: SimulationParams) -> EngineResult<PreparedRun> {
        let drift = params.drift.unwrap_or(self.default_drift);
        let volatility = params.volatility.unwrap_or(self.default_volatility);

        if !params.start_price.is_finite() || params.start_price <= 0.0 {
            return Err(EngineError::invalid(format!(
                "start_price must be > 0, got {}",
                params.start_price
            )));
        }
        if !params.years.is_finite() || params.years <= 0.0 {
            return Err(EngineError::invalid(format!("years must be > 0, got {}", params.years)));
        }
        if !params.dt.is_finite() || params.dt <= 0.0 || params.dt > 1.0 {
            return Err(EngineError::invalid(format!("dt must be in (0, 1], got {}", params.dt)));
        }
        if params.num_paths == 0 || params.num_paths > self.limits.max_paths {
            return Err(EngineError::invalid(format!(
                "num_paths must be in [1, {}], got {}",
                self.limits.max_paths, params.num_paths
            )));
        }
        if !drift.is_finite() {
            return Err(EngineError::invalid("drift must be finite"));
        }
        if !volatility.is_finite() || volatility < 0.0 {
            return Err(EngineError::invalid(format!("volatility must be >= 0, got {volatility}")));
        }
        if !params.jump_intensity.is_finite() || params.jump_intensity < 0.0 {
            return Err(EngineError::invalid("jump_intensity must be >= 0"));
        }
        if !params.jump_mean.is_finite() {
            return Err(EngineError::invalid("jump_mean must be finite"));
        }
        if !params.jump_std_dev.is_finite() || params.jump_std_dev < 0.0 {
            return Err(EngineError::invalid("jump_std_dev must be >= 0"));
        }
        if params.jump_intensity * params.dt > MAX_STEP_JUMP_MEAN {
            return Err(EngineError::invalid(format!(
                "jump_intensity * dt must be <= {MAX_STEP_JUMP_MEAN}, got {}",
                params.jump_intensity * params.dt
            )));
        }
        if let Some(m) = params
            .modifiers
            .iter()
            .find(|m| !m.drift_mod.is_finite() || !m.volatility_mod.is_finite())
        {
            return Err(EngineError::invalid(format!("modifier for year {} is not finite", m.year)));
        }

        let steps = step_count(params.years, params.dt)?;
        if steps > self.limits.max_steps {
            return Err(EngineError::invalid(format!(
                "horizon needs {steps} steps, limit is {}",
                self.limits.max_steps
            )));
        }
        let points = params.num_paths.saturating_mul(steps + 1);
        if points > self.limits.max_points {
            return Err(EngineError::invalid(format!(
                "{} paths x {} samples exceeds the {} sample limit",
                params.num_paths,
                steps + 1,
                self.limits.max_points
            )));
        }

        let schedule =
            ModifierSchedule::build(drift, volatility, &params.modifiers, params.years, params.dt);
        let jumps = JumpModel::new(params.jump_params(), params.dt);
        let seed = params.seed.unwrap_or_else(RandomSource::draw_seed);

        params.drift = Some(drift);
        params.volatility = Some(volatility);
        params.seed = Some(seed);

        Ok(PreparedRun {
            params,
            steps,
            seed,
            schedule,
            jumps,
        })
    }

    /// Validate, generate `num_paths` paths, then reduce. All-or-nothing: a
    /// cancelled or faulted run returns an error and no partial ensemble.
    pub fn run(&self, params: SimulationParams, cancel: &CancelToken) -> EngineResult<SimulationResult> {
        let prepared = self.prepare(params)?;
        self.execute(prepared, cancel)
    }

    pub fn execute(&self, run: PreparedRun, cancel: &CancelToken) -> EngineResult<SimulationResult> {
        let started = Instant::now();
        let num_paths = run.params.num_paths;

        tracing::debug!(
            num_paths,
            steps = run.steps,
            seed = run.seed,
            modified_years = run.schedule.modified_years(),
            jumps = run.jumps.is_active(),
            "simulation run starting"
        );

        let paths = self.generate_paths(&run, cancel)?;

        // join point: every path is complete before any reduction
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let final_prices: Vec<f64> = paths.iter().map(PricePath::terminal_price).collect();
        let sorted = sorted_copy(&final_prices);
        let statistics = Statistics::from_sorted(&sorted)?;
        let risk_metrics = RiskMetrics::from_sorted(&sorted)?;

        tracing::info!(
            num_paths,
            steps = run.steps,
            elapsed_ms = started.elapsed().as_millis() as u64,
            mean = statistics.mean,
            var_95 = risk_metrics.var_95,
            "simulation run complete"
        );

        Ok(SimulationResult {
            params: run.params,
            paths,
            final_prices,
            statistics,
            risk_metrics,
        })
    }

    /// Workers fill disjoint slots of a pre-sized buffer, so path order is
    /// path_id order regardless of completion order.
    fn generate_paths(&self, run: &PreparedRun, cancel: &CancelToken) -> EngineResult<Vec<PricePath>> {
        let simulator = PathSimulator::new(&run.schedule, &run.jumps, run.params.start_price, run.steps);
        let seed = run.seed;
        let mut slots: Vec<Option<PricePath>> = vec![None; run.params.num_paths];

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.pool.install(|| {
                slots
                    .par_iter_mut()
                    .enumerate()
                    .try_for_each(|(path_id, slot)| -> EngineResult<()> {
                        if cancel.is_cancelled() {
                            return Err(EngineError::Cancelled);
                        }
                        let mut rng = RandomSource::for_path(seed, path_id as u64);
                        *slot = Some(simulator.run(path_id, &mut rng, cancel)?);
                        Ok(())
                    })
            })
        }));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "worker panicked".to_string());
                tracing::error!(error = %msg, "path worker panicked, aborting run");
                return Err(EngineError::WorkerFault(msg));
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| slot.ok_or_else(|| EngineError::WorkerFault(format!("path {i} missing"))))
            .collect()
    }
}

/// Number of `dt` steps in `years`. Rejects horizons `dt` does not divide.
pub fn step_count(years: f64, dt: f64) -> EngineResult<usize> {
    let ratio = years / dt;
    let rounded = ratio.round();
    if rounded < 1.0 || (ratio - rounded).abs() > STEP_TOLERANCE * rounded.max(1.0) {
        return Err(EngineError::invalid(format!(
            "dt={dt} does not divide years={years} into a whole number of steps"
        )));
    }
    Ok(rounded as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::YearlyModifier;

    fn orchestrator() -> SimulationOrchestrator {
        SimulationOrchestrator::new(4, EngineLimits::default(), 0.05, 0.20).unwrap()
    }

    fn seeded(start: f64, years: f64, dt: f64, n: usize, seed: u64) -> SimulationParams {
        let mut p = SimulationParams::new(start, years, dt, n);
        p.seed = Some(seed);
        p
    }

    #[test]
    fn test_step_count() {
        assert_eq!(step_count(30.0, 1.0).unwrap(), 30);
        assert_eq!(step_count(1.0, 0.1).unwrap(), 10);
        assert_eq!(step_count(2.5, 0.5).unwrap(), 5);
        assert_eq!(step_count(1.0, 1.0 / 252.0).unwrap(), 252);
        assert!(step_count(1.0, 0.3).is_err());
        assert!(step_count(0.5, 1.0).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_inputs() {
        let o = orchestrator();
        let bad = [
            SimulationParams::new(0.0, 1.0, 1.0, 10),
            SimulationParams::new(-5.0, 1.0, 1.0, 10),
            SimulationParams::new(100.0, 1.0, 0.0, 10),
            SimulationParams::new(100.0, 1.0, 1.5, 10),
            SimulationParams::new(100.0, 1.0, 0.3, 10),
            SimulationParams::new(100.0, 1.0, 1.0, 0),
            SimulationParams::new(100.0, 1.0, 1.0, 10_001),
            SimulationParams::new(f64::NAN, 1.0, 1.0, 10),
        ];
        for p in bad {
            let res = o.run(p.clone(), &CancelToken::new());
            assert!(
                matches!(res, Err(EngineError::InvalidParameters(_))),
                "expected rejection for {p:?}"
            );
        }
    }

    #[test]
    fn test_validation_rejects_negative_jump_params() {
        let o = orchestrator();
        let mut p = SimulationParams::new(100.0, 1.0, 1.0, 10);
        p.jump_intensity = -1.0;
        assert!(matches!(o.prepare(p), Err(EngineError::InvalidParameters(_))));

        let mut p = SimulationParams::new(100.0, 1.0, 1.0, 10);
        p.jump_std_dev = -0.1;
        assert!(matches!(o.prepare(p), Err(EngineError::InvalidParameters(_))));
    }

    #[test]
    fn test_oversized_jump_rate_rejected() {
        let o = orchestrator();
        let mut p = SimulationParams::new(100.0, 1.0, 1.0, 10);
        p.jump_intensity = 1e20;
        p.jump_std_dev = 0.1;
        assert!(matches!(o.run(p, &CancelToken::new()), Err(EngineError::InvalidParameters(_))));

        // The bound is per step, so a finer dt admits a higher annual rate
        let mut p = SimulationParams::new(100.0, 1.0, 0.5, 10);
        p.jump_intensity = 1.5 * MAX_STEP_JUMP_MEAN;
        assert!(o.prepare(p).is_ok());
    }

    #[test]
    fn test_high_jump_rate_run_completes() {
        let o = orchestrator();
        let mut p = seeded(100.0, 200.0, 1.0, 20, 17);
        p.drift = Some(0.0);
        p.volatility = Some(0.0);
        p.jump_intensity = MAX_STEP_JUMP_MEAN;
        p.jump_std_dev = 1e-5;
        let start = Instant::now();
        let result = o.run(p, &CancelToken::new()).unwrap();
        assert!(start.elapsed() < std::time::Duration::from_secs(10));
        assert_eq!(result.final_prices.len(), 20);
        // each step moves log-price by sqrt(k) * 1e-5 * z, about 0.01
        let moved = result.paths.iter().filter(|p| p.terminal_price() != 100.0).count();
        assert_eq!(moved, 20);
        assert!(result.final_prices.iter().all(|v| v.is_finite() && *v > 0.0));
    }

    #[test]
    fn test_sample_limit_enforced() {
        let limits = EngineLimits { max_paths: 1000, max_steps: 1000, max_points: 10_000 };
        let o = SimulationOrchestrator::new(1, limits, 0.05, 0.2).unwrap();
        assert!(o.prepare(SimulationParams::new(1.0, 99.0, 1.0, 100)).is_ok());
        assert!(matches!(
            o.prepare(SimulationParams::new(1.0, 100.0, 1.0, 100)),
            Err(EngineError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_negative_volatility_after_modifier_is_not_an_error() {
        let o = orchestrator();
        let mut p = seeded(100.0, 3.0, 1.0, 5, 1);
        p.modifiers.push(YearlyModifier { year: 1, drift_mod: 0.0, volatility_mod: -5.0 });
        assert!(o.run(p, &CancelToken::new()).is_ok());
    }

    #[test]
    fn test_defaults_and_seed_echoed() {
        let o = orchestrator();
        let res = o.run(SimulationParams::new(100.0, 2.0, 1.0, 3), &CancelToken::new()).unwrap();
        assert_eq!(res.params.drift, Some(0.05));
        assert_eq!(res.params.volatility, Some(0.20));
        assert!(res.params.seed.is_some());
    }

    #[test]
    fn test_reference_scenario_shape() {
        let o = orchestrator();
        let res = o
            .run(seeded(1_000_000.0, 30.0, 1.0, 200, 2024), &CancelToken::new())
            .unwrap();
        assert_eq!(res.paths.len(), 200);
        assert_eq!(res.final_prices.len(), 200);
        for (i, path) in res.paths.iter().enumerate() {
            assert_eq!(path.path_id, i);
            assert_eq!(path.prices.len(), 31);
            assert_eq!(path.prices[0], 1_000_000.0);
            assert!(path.prices.iter().all(|p| *p >= 0.0));
            assert_eq!(res.final_prices[i], path.prices[30]);
        }
        assert!(res.risk_metrics.var_95 <= res.statistics.median);
        assert!(res.risk_metrics.var_99 <= res.risk_metrics.var_95);
        assert!(res.risk_metrics.cvar_95 <= res.risk_metrics.var_95);
        assert!(res.risk_metrics.cvar_99 <= res.risk_metrics.var_99);
        assert!(res.statistics.min <= res.statistics.median);
        assert!(res.statistics.median <= res.statistics.max);
        assert!(res.statistics.std >= 0.0);
    }

    #[test]
    fn test_bit_identical_reruns() {
        let o = orchestrator();
        let mut p = seeded(100.0, 5.0, 0.25, 64, 99);
        p.jump_intensity = 1.5;
        p.jump_mean = -0.05;
        p.jump_std_dev = 0.1;
        p.modifiers.push(YearlyModifier { year: 2, drift_mod: -0.1, volatility_mod: 0.2 });

        let a = o.run(p.clone(), &CancelToken::new()).unwrap();
        let b = o.run(p, &CancelToken::new()).unwrap();
        assert_eq!(a.paths, b.paths);
        assert_eq!(a.final_prices, b.final_prices);
    }

    #[test]
    fn test_result_independent_of_pool_size() {
        let single = SimulationOrchestrator::new(1, EngineLimits::default(), 0.05, 0.2).unwrap();
        let many = SimulationOrchestrator::new(8, EngineLimits::default(), 0.05, 0.2).unwrap();
        let p = seeded(100.0, 10.0, 0.5, 50, 5);
        let a = single.run(p.clone(), &CancelToken::new()).unwrap();
        let b = many.run(p, &CancelToken::new()).unwrap();
        assert_eq!(a.paths, b.paths);
    }

    #[test]
    fn test_single_path_populates_summaries() {
        let o = orchestrator();
        let res = o.run(seeded(100.0, 1.0, 1.0, 1, 3), &CancelToken::new()).unwrap();
        let only = res.final_prices[0];
        assert_eq!(res.statistics.std, 0.0);
        assert_eq!(res.statistics.median, only);
        assert_eq!(res.risk_metrics.var_95, only);
        assert_eq!(res.risk_metrics.cvar_99, only);
    }

    #[test]
    fn test_log_terminal_mean_matches_schedule() {
        let o = orchestrator();
        let mut p = seeded(100.0, 10.0, 1.0, 4000, 17);
        p.drift = Some(0.08);
        p.volatility = Some(0.25);
        p.modifiers.push(YearlyModifier { year: 3, drift_mod: -0.3, volatility_mod: 0.15 });
        let prepared = o.prepare(p).unwrap();
        let expected = prepared.schedule.expected_log_return(prepared.steps);
        let res = o.execute(prepared, &CancelToken::new()).unwrap();

        let logs: Vec<f64> = res.final_prices.iter().map(|s| (s / 100.0).ln()).collect();
        let mean = logs.iter().sum::<f64>() / logs.len() as f64;
        // total log variance = 9 * 0.0625 + 0.16 = 0.7225, std error of mean ~ 0.0134
        assert!((mean - expected).abs() < 0.06, "mean={mean} expected={expected}");
    }

    #[test]
    fn test_precancelled_run_returns_nothing() {
        let o = orchestrator();
        let cancel = CancelToken::new();
        cancel.cancel();
        let res = o.run(seeded(100.0, 10.0, 0.1, 100, 1), &cancel);
        assert!(matches!(res, Err(EngineError::Cancelled)));
    }

    #[test]
    fn test_cancel_mid_flight() {
        let o = Arc::new(SimulationOrchestrator::new(2, EngineLimits::default(), 0.05, 0.2).unwrap());
        let cancel = CancelToken::new();
        let worker = {
            let o = o.clone();
            let cancel = cancel.clone();
            std::thread::spawn(move || o.run(seeded(100.0, 1.0, 0.0001, 400, 1), &cancel))
        };
        cancel.cancel();
        let res = worker.join().unwrap();
        assert!(matches!(res, Err(EngineError::Cancelled)));
    }

    #[test]
    fn test_invalid_params_fail_before_generation() {
        let o = orchestrator();
        let cancel = CancelToken::new();
        cancel.cancel();
        // validation error wins over cancellation: nothing ran
        let res = o.run(SimulationParams::new(100.0, 1.0, 0.3, 10), &cancel);
        assert!(matches!(res, Err(EngineError::InvalidParameters(_))));
    }
}
