//! API routes for remyd

use crate::orchestrator::TurnRequest;
use crate::server::AppState;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use remy_common::AssistantResponse;
use serde::Serialize;
use std::sync::Arc;

type AppStateArc = Arc<AppState>;

// ============================================================================
// Chat Routes
// ============================================================================

pub fn chat_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/chat", post(chat))
}

/// One conversational turn. Always 200: failures ride inside the response
/// envelope as `fatal_error`, so clients keep a single decode path.
async fn chat(
    State(state): State<AppStateArc>,
    Json(request): Json<TurnRequest>,
) -> Json<AssistantResponse> {
    Json(state.orchestrator.handle_turn(request).await)
}

// ============================================================================
// Health Routes
// ============================================================================

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/health", get(health_check))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    database: String,
    language_backend: String,
}

async fn health_check(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    let database = match state.db.ping().await {
        Ok(()) => "ok".to_string(),
        Err(e) => format!("error: {e}"),
    };
    let language_backend = match state.language.healthcheck().await {
        Ok(()) => "ok".to_string(),
        Err(e) => format!("error: {e}"),
    };
    let status = if database == "ok" && language_backend == "ok" {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        database,
        language_backend,
    })
}
