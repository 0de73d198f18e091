use dynasty_engine::config;
use dynasty_engine::db;
use dynasty_engine::scenario::{HttpScenarioClient, ScenarioInterpreter, UnconfiguredInterpreter};
use dynasty_engine::server;
use dynasty_engine::sim::SimulationOrchestrator;
use dynasty_engine::state::{AppState, DbCommand};
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    // Structured logging (line-buffered, stderr)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("dynasty engine starting");

    // Load config
    let cfg = match config::AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            std::process::exit(1);
        }
    };

    // Init history database
    let db_pool = match db::init_db(&cfg.data_dir) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("database init error: {e}");
            std::process::exit(1);
        }
    };

    // Path worker pool (shared by all requests)
    let orchestrator = match SimulationOrchestrator::new(
        cfg.worker_threads,
        cfg.limits(),
        cfg.default_drift,
        cfg.default_volatility,
    ) {
        Ok(o) => Arc::new(o),
        Err(e) => {
            tracing::error!("orchestrator init error: {e}");
            std::process::exit(1);
        }
    };

    let interpreter: Arc<dyn ScenarioInterpreter> = match &cfg.scenario_service_url {
        Some(url) => {
            match HttpScenarioClient::new(url) {
                Ok(client) => {
                    tracing::info!(url = %url, "scenario interpreter configured");
                    Arc::new(client)
                }
                Err(e) => {
                    tracing::error!("scenario client init error: {e}");
                    std::process::exit(1);
                }
            }
        }
        None => {
            tracing::warn!("SCENARIO_SERVICE_URL not set, /api/oracle/analyze will fail");
            Arc::new(UnconfiguredInterpreter)
        }
    };

    // Bounded channel to the history writer
    let (db_tx, db_rx) = mpsc::channel::<DbCommand>(256);

    let app_state = AppState::new(cfg.clone(), db_pool.clone(), orchestrator, interpreter, db_tx);

    // DB writer task (dedicated, the only writer)
    let db_pool_writer = db_pool.clone();
    tokio::spawn(async move {
        db::run_db_writer(db_pool_writer, db_rx).await;
    });

    // Axum HTTP + WS server
    let app = server::router(app_state)
        .fallback_service(
            tower_http::services::ServeDir::new("dashboard/dist")
                .fallback(tower_http::services::ServeFile::new("dashboard/dist/index.html")),
        )
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        );

    let addr = format!("0.0.0.0:{}", cfg.server_port);
    tracing::info!("server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("bind error: {e}");
            std::process::exit(1);
        });

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {e}");
    }
}
