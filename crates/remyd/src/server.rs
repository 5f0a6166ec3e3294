//! HTTP server for remyd

use crate::config::RemyConfig;
use crate::llm::LanguageService;
use crate::orchestrator::Orchestrator;
use crate::routes;
use crate::store::Db;
use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub db: Db,
    pub language: Arc<dyn LanguageService>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, db: Db, language: Arc<dyn LanguageService>) -> Self {
        Self {
            orchestrator,
            db,
            language,
            start_time: Instant::now(),
        }
    }
}

/// Run the HTTP server until the process is stopped.
pub async fn run(state: AppState, config: &RemyConfig) -> Result<()> {
    let state = Arc::new(state);

    let app = Router::new()
        .merge(routes::chat_routes())
        .merge(routes::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.effective_request_timeout(),
        )))
        .layer(RequestBodyLimitLayer::new(config.server.max_body_bytes));

    let addr = config.server.listen_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
