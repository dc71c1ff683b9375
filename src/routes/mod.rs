//! Route definitions for the vulndigest API.

pub mod health;
pub mod report;
pub mod vulnerabilities;

use crate::aggregator::Aggregator;
use crate::llm::LlmGateway;
use axum::{Router, routing::get, routing::post};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state: the source registry and the LLM gateway, both
/// built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub gateway: Arc<LlmGateway>,
}

/// Build the API router over the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::liveness))
        .route("/api/vulnerabilities", get(vulnerabilities::list))
        .route("/api/report/generate", post(report::generate))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
