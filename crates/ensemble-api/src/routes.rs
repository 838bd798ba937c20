//! Route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{health, orchestrate};
use crate::server::AppState;

/// Create the API router
pub fn routes() -> Router<AppState> {
    Router::new()
        // Health check
        .route("/health", get(health))
        // Orchestration endpoint
        .route("/api/chat/orchestration", post(orchestrate))
}
