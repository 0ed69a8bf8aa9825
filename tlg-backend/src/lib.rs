//! tlg-backend library - Task list generator
//!
//! Selects wiki pages with a boolean category query, runs flaw filters over
//! them on a worker pool and streams the ranked findings as events.

use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod collaborators;
pub mod engine;
pub mod error;
pub mod filters;
pub mod fixture;
pub mod query;

pub use engine::{EngineConfig, Orchestrator, QueryRun, RunRequest};
pub use error::{Error, Result};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Depth used when a request does not name one
    pub default_depth: u32,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, default_depth: u32) -> Self {
        Self {
            orchestrator,
            default_depth,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .route("/flaws", get(api::list_flaws))
        .route("/query", get(api::run_query))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
