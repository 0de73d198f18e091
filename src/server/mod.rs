pub mod routes;
pub mod ws;

use crate::errors::EngineError;
use crate::state::AppState;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;

/// API router. Static files and CORS are layered on in `main`.
pub fn router(state: Arc<AppState>) -> Router {
    let max_runs = state.config.max_concurrent_runs.max(1);

    Router::new()
        .route(
            "/api/simulation/start",
            post(routes::start_simulation).layer(ConcurrencyLimitLayer::new(max_runs)),
        )
        .route("/api/oracle/analyze", post(routes::analyze_scenario))
        .route("/api/history", get(routes::get_history))
        .route("/api/counters", get(routes::get_counters))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::InvalidParameters(_) => StatusCode::BAD_REQUEST,
            EngineError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Scenario(_) | EngineError::Network(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
