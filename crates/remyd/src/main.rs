//! Remy daemon - conversational nutrition tracking.
//!
//! Wires the pieces together: config, SQLite store, the Ollama language
//! backend, the orchestrator, and the HTTP server.

use anyhow::Result;
use remyd::config::RemyConfig;
use remyd::llm::{LanguageService, OllamaService};
use remyd::lookup::EstimatingLookup;
use remyd::orchestrator::Orchestrator;
use remyd::retry::RetryPolicy;
use remyd::server::{self, AppState};
use remyd::store::Db;
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = RemyConfig::load();
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", &config.log.level);
    }
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_level(true)
        .init();

    info!("remyd {} starting", env!("CARGO_PKG_VERSION"));

    let db = Db::open(&config.database.path).await?;
    let language: Arc<dyn LanguageService> = Arc::new(OllamaService::new(&config.language)?);
    let lookup = Arc::new(EstimatingLookup::new(
        Arc::clone(&language),
        RetryPolicy::from_config(&config.retry),
    ));

    let orchestrator = Orchestrator::new(db.clone(), Arc::clone(&language), lookup, &config);
    let state = AppState::new(orchestrator, db, language);

    info!("remyd ready, model {} at {}", config.language.model, config.language.endpoint);
    server::run(state, &config).await
}
