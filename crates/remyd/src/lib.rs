//! Remy daemon library - exposes modules for testing.

pub mod config;
pub mod confirm;
pub mod flows;
pub mod llm;
pub mod lookup;
pub mod matcher;
pub mod orchestrator;
pub mod retry;
pub mod routes;
pub mod scaler;
pub mod server;
pub mod store;
