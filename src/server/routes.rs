use crate::db;
use crate::errors::{EngineError, EngineResult};
use crate::sim::orchestrator::PreparedRun;
use crate::sim::{CancelToken, SimulationParams, SimulationResult};
use crate::state::{AppState, DbCommand, RunEvent, RunSummary};
use axum::extract::{Query, State};
use axum::response::Json;
use portable_atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// How long a timed-out handler waits for its cancelled job to stop, so the
/// route's concurrency permit is held until the workers are actually free.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

#[derive(serde::Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(serde::Deserialize)]
pub struct AnalyzeRequest {
    pub scenario: String,
}

#[derive(serde::Serialize)]
pub struct SimulationResponse {
    pub run_id: String,
    #[serde(flatten)]
    pub result: SimulationResult,
}

/// Cancels the run unless disarmed. Dropping the handler future (client
/// disconnect) or leaving through the timeout path trips it.
struct CancelOnDrop {
    token: CancelToken,
    armed: bool,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.token.cancel();
        }
    }
}

/// POST /api/simulation/start -- validate, run on the blocking pool, record history
pub async fn start_simulation(
    State(state): State<Arc<AppState>>,
    Json(params): Json<SimulationParams>,
) -> Result<Json<SimulationResponse>, EngineError> {
    // validation runs inline: cheap, and rejects before any work is scheduled
    let prepared = state.orchestrator.prepare(params)?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let num_paths = prepared.params.num_paths;
    state.counters.runs_started.fetch_add(1, Relaxed);
    state.broadcast(RunEvent::RunStarted {
        run_id: run_id.clone(),
        num_paths,
        years: prepared.params.years,
        dt: prepared.params.dt,
        timestamp: chrono::Utc::now().to_rfc3339(),
    });

    let started = Instant::now();
    let result = match run_blocking(&state, prepared).await {
        Ok(r) => r,
        Err(e) => {
            record_failure(&state, &run_id, &e);
            return Err(e);
        }
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;

    state.counters.runs_completed.fetch_add(1, Relaxed);
    state.counters.paths_generated.fetch_add(num_paths as u64, Relaxed);

    let summary = RunSummary {
        paths_count: result.paths.len(),
        statistics: result.statistics,
        risk_metrics: result.risk_metrics,
    };
    let now = chrono::Utc::now().to_rfc3339();

    tracing::info!(run_id = %run_id, num_paths, elapsed_ms, "simulation served");

    state.broadcast(RunEvent::RunCompleted {
        run_id: run_id.clone(),
        elapsed_ms,
        summary: summary.clone(),
        timestamp: now.clone(),
    });

    if state
        .db_tx
        .send(DbCommand::InsertSimulation {
            run_id: run_id.clone(),
            created_at: now,
            scenario: result.params.scenario.clone(),
            params: Box::new(result.params.clone()),
            summary,
        })
        .await
        .is_err()
    {
        tracing::warn!(run_id = %run_id, "db writer gone, history not recorded");
    }

    Ok(Json(SimulationResponse { run_id, result }))
}

async fn run_blocking(state: &Arc<AppState>, prepared: PreparedRun) -> EngineResult<SimulationResult> {
    let cancel = CancelToken::new();
    let mut guard = CancelOnDrop {
        token: cancel.clone(),
        armed: true,
    };

    let orchestrator = state.orchestrator.clone();
    let worker_cancel = cancel.clone();
    let handle = tokio::task::spawn_blocking(move || orchestrator.execute(prepared, &worker_cancel));

    let limit = match state.config.run_timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let result = join_or_cancel(handle, limit, &cancel).await;
    guard.armed = false;
    result
}

/// Await a blocking job, cancelling it once `limit` elapses. After a timeout
/// the job is given `CANCEL_GRACE` to observe the token before returning.
async fn join_or_cancel<T>(
    mut handle: JoinHandle<EngineResult<T>>,
    limit: Option<Duration>,
    cancel: &CancelToken,
) -> EngineResult<T> {
    let joined = match limit {
        None => (&mut handle).await,
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::warn!(timeout_ms = limit.as_millis() as u64, "simulation timed out, cancelling");
                cancel.cancel();
                if tokio::time::timeout(CANCEL_GRACE, handle).await.is_err() {
                    tracing::warn!("cancelled simulation still running after grace period");
                }
                return Err(EngineError::Cancelled);
            }
        },
    };
    joined.map_err(|e| EngineError::WorkerFault(format!("simulation task: {e}")))?
}

fn record_failure(state: &AppState, run_id: &str, err: &EngineError) {
    if matches!(err, EngineError::Cancelled) {
        state.counters.runs_cancelled.fetch_add(1, Relaxed);
    } else {
        state.counters.runs_failed.fetch_add(1, Relaxed);
    }
    tracing::warn!(run_id = %run_id, error = %err, "simulation run failed");
    state.broadcast(RunEvent::RunFailed {
        run_id: run_id.to_string(),
        reason: err.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    });
}

/// POST /api/oracle/analyze -- free text to yearly modifiers via the external interpreter
pub async fn analyze_scenario(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<serde_json::Value>, EngineError> {
    if req.scenario.trim().is_empty() {
        return Err(EngineError::invalid("scenario text is empty"));
    }
    let modifiers = state.interpreter.analyze(&req.scenario).await?;
    Ok(Json(serde_json::json!({ "modifiers": modifiers })))
}

/// GET /api/history -- recent runs from DB (cold path)
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let limit = params.limit.unwrap_or(50).min(200);
    let history = db::get_history(&state.db, limit)?;
    Ok(Json(serde_json::json!({ "history": history })))
}

/// GET /api/counters -- run counters (lock-free reads)
pub async fn get_counters(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(state.counters.snapshot())
}
