use crate::errors::{EngineError, EngineResult};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_port: u16,
    pub data_dir: PathBuf,
    pub max_paths: usize,
    pub max_steps: usize,
    pub max_points: usize,
    /// 0 = one worker per available core
    pub worker_threads: usize,
    pub max_concurrent_runs: usize,
    pub default_drift: f64,
    pub default_volatility: f64,
    pub scenario_service_url: Option<String>,
    /// 0 = no timeout
    pub run_timeout_secs: u64,
}

/// Bounds applied during request validation. Derived from `AppConfig`.
#[derive(Debug, Clone, Copy)]
pub struct EngineLimits {
    pub max_paths: usize,
    pub max_steps: usize,
    /// Upper bound on `num_paths * (steps + 1)` samples held for one request.
    pub max_points: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_paths: 10_000,
            max_steps: 100_000,
            max_points: 5_000_000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> EngineResult<Self> {
        dotenvy::dotenv().ok();

        let server_port = parse_env("SERVER_PORT", "8080")?;
        let max_paths = parse_env("MAX_PATHS", "10000")?;
        let max_steps = parse_env("MAX_STEPS", "100000")?;
        let max_points = parse_env("MAX_POINTS", "5000000")?;
        let worker_threads = parse_env("WORKER_THREADS", "0")?;
        let max_concurrent_runs = parse_env::<usize>("MAX_CONCURRENT_RUNS", "4")?;
        let default_drift = parse_env::<f64>("DEFAULT_DRIFT", "0.05")?;
        let default_volatility = parse_env::<f64>("DEFAULT_VOLATILITY", "0.20")?;
        let run_timeout_secs = parse_env("RUN_TIMEOUT_SECS", "0")?;

        if max_concurrent_runs == 0 {
            return Err(EngineError::Config("MAX_CONCURRENT_RUNS must be >= 1".into()));
        }
        if !default_volatility.is_finite() || default_volatility < 0.0 {
            return Err(EngineError::Config("DEFAULT_VOLATILITY must be >= 0".into()));
        }
        if !default_drift.is_finite() {
            return Err(EngineError::Config("DEFAULT_DRIFT must be finite".into()));
        }

        let scenario_service_url = std::env::var("SCENARIO_SERVICE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Ok(Self {
            server_port,
            data_dir: PathBuf::from(env_var_or("DATA_DIR", "data")),
            max_paths,
            max_steps,
            max_points,
            worker_threads,
            max_concurrent_runs,
            default_drift,
            default_volatility,
            scenario_service_url,
            run_timeout_secs,
        })
    }

    pub fn limits(&self) -> EngineLimits {
        EngineLimits {
            max_paths: self.max_paths,
            max_steps: self.max_steps,
            max_points: self.max_points,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let limits = EngineLimits::default();
        Self {
            server_port: 8080,
            data_dir: PathBuf::from("data"),
            max_paths: limits.max_paths,
            max_steps: limits.max_steps,
            max_points: limits.max_points,
            worker_threads: 0,
            max_concurrent_runs: 4,
            default_drift: 0.05,
            default_volatility: 0.20,
            scenario_service_url: None,
            run_timeout_secs: 0,
        }
    }
}

fn parse_env<T>(key: &str, default: &str) -> EngineResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env_var_or(key, default)
        .parse::<T>()
        .map_err(|e| EngineError::Config(format!("{key}: {e}")))
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
