use crate::errors::{EngineError, EngineResult};
use crate::state::DbCommand;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub type DbPool = Arc<Mutex<Connection>>;

pub fn init_db(data_dir: &Path) -> EngineResult<DbPool> {
    std::fs::create_dir_all(data_dir).map_err(|e| EngineError::Database(format!("create dir: {e}")))?;
    let db_path = data_dir.join("dynasty.db");
    let conn = Connection::open(&db_path)?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    apply_schema(&conn)?;

    tracing::info!("database initialized at {}", db_path.display());
    Ok(Arc::new(Mutex::new(conn)))
}

/// Private in-memory database with the schema applied.
pub fn init_in_memory() -> EngineResult<DbPool> {
    let conn = Connection::open_in_memory()?;
    apply_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

fn apply_schema(conn: &Connection) -> EngineResult<()> {
    let schema = include_str!("../migrations/001_init.sql");
    conn.execute_batch(schema)?;
    Ok(())
}

/// Dedicated DB writer task. Reads commands from bounded channel, executes SQL.
/// This is the ONLY task that writes to the database.
pub async fn run_db_writer(db: DbPool, mut rx: mpsc::Receiver<DbCommand>) {
    tracing::info!("db writer task started");

    while let Some(cmd) = rx.recv().await {
        if let Err(e) = execute_command(&db, cmd) {
            tracing::error!("db write error: {e}");
        }
    }

    tracing::info!("db writer task shutting down");
}

pub fn execute_command(db: &DbPool, cmd: DbCommand) -> EngineResult<()> {
    let conn = db.lock().map_err(|e| EngineError::Database(format!("lock poisoned: {e}")))?;

    match cmd {
        DbCommand::InsertSimulation {
            run_id,
            created_at,
            scenario,
            params,
            summary,
        } => {
            let config_json = serde_json::to_string(&params)?;
            let summary_json = serde_json::to_string(&summary)?;
            conn.execute(
                "INSERT INTO simulations (run_id, created_at, scenario, config_json, summary_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![run_id, created_at, scenario, config_json, summary_json],
            )?;
        }
    }
    Ok(())
}

// ── Query helpers (for server REST reads -- these lock, but only from cold path) ──

pub fn get_history(db: &DbPool, limit: usize) -> EngineResult<Vec<HistoryRow>> {
    let conn = db.lock().map_err(|e| EngineError::Database(format!("lock: {e}")))?;
    let mut stmt = conn.prepare(
        "SELECT id, run_id, created_at, scenario, config_json, summary_json
         FROM simulations ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(rusqlite::params![limit as i64], |row| {
        Ok(HistoryRow {
            id: row.get(0)?,
            run_id: row.get(1)?,
            created_at: row.get(2)?,
            scenario: row.get(3)?,
            config: json_or_raw(row.get(4)?),
            summary: json_or_raw(row.get(5)?),
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn json_or_raw(text: String) -> serde_json::Value {
    serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
}

// ── Row types ──

#[derive(Debug, Clone, serde::Serialize)]
pub struct HistoryRow {
    pub id: i64,
    pub run_id: String,
    pub created_at: String,
    pub scenario: Option<String>,
    pub config: serde_json::Value,
    pub summary: serde_json::Value,
}
