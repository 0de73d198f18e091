use crate::analytics::{RiskMetrics, Statistics};
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::scenario::ScenarioInterpreter;
use crate::sim::{SimulationOrchestrator, SimulationParams};
use portable_atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

// ── Messages OUT to dashboard clients ──

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    #[serde(rename = "run_started")]
    RunStarted {
        run_id: String,
        num_paths: usize,
        years: f64,
        dt: f64,
        timestamp: String,
    },

    #[serde(rename = "run_completed")]
    RunCompleted {
        run_id: String,
        elapsed_ms: u64,
        summary: RunSummary,
        timestamp: String,
    },

    #[serde(rename = "run_failed")]
    RunFailed {
        run_id: String,
        reason: String,
        timestamp: String,
    },
}

/// Compact result digest kept in history and pushed to WS clients.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunSummary {
    pub paths_count: usize,
    pub statistics: Statistics,
    pub risk_metrics: RiskMetrics,
}

// ── DB Commands (sent to writer task via bounded channel) ──

#[derive(Debug)]
pub enum DbCommand {
    InsertSimulation {
        run_id: String,
        created_at: String,
        scenario: Option<String>,
        params: Box<SimulationParams>,
        summary: RunSummary,
    },
}

// ── Run Counters (lock-free) ──

pub struct RunCounters {
    pub runs_started: AtomicU64,
    pub runs_completed: AtomicU64,
    pub runs_failed: AtomicU64,
    pub runs_cancelled: AtomicU64,
    pub paths_generated: AtomicU64,
    pub ws_messages_sent: AtomicU64,
}

impl RunCounters {
    pub fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            runs_cancelled: AtomicU64::new(0),
            paths_generated: AtomicU64::new(0),
            ws_messages_sent: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> serde_json::Value {
        use portable_atomic::Ordering::Relaxed;
        serde_json::json!({
            "runs_started": self.runs_started.load(Relaxed),
            "runs_completed": self.runs_completed.load(Relaxed),
            "runs_failed": self.runs_failed.load(Relaxed),
            "runs_cancelled": self.runs_cancelled.load(Relaxed),
            "paths_generated": self.paths_generated.load(Relaxed),
            "ws_messages_sent": self.ws_messages_sent.load(Relaxed),
        })
    }
}

impl Default for RunCounters {
    fn default() -> Self {
        Self::new()
    }
}

// ── Application shared state (channels, not locks) ──

pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,

    pub orchestrator: Arc<SimulationOrchestrator>,
    pub interpreter: Arc<dyn ScenarioInterpreter>,

    // Handlers -> Dashboard: run lifecycle stream (broadcast for WS clients)
    pub ws_tx: broadcast::Sender<RunEvent>,

    // Handlers -> DB Writer: bounded command channel
    pub db_tx: mpsc::Sender<DbCommand>,

    pub counters: RunCounters,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: DbPool,
        orchestrator: Arc<SimulationOrchestrator>,
        interpreter: Arc<dyn ScenarioInterpreter>,
        db_tx: mpsc::Sender<DbCommand>,
    ) -> Arc<Self> {
        let (ws_tx, _) = broadcast::channel(256);

        Arc::new(Self {
            config,
            db,
            orchestrator,
            interpreter,
            ws_tx,
            db_tx,
            counters: RunCounters::new(),
        })
    }

    #[inline]
    pub fn broadcast(&self, msg: RunEvent) {
        self.counters.ws_messages_sent.fetch_add(1, Ordering::Relaxed);
        let _ = self.ws_tx.send(msg);
    }
}
