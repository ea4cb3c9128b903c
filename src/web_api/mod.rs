//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes
//! - Request validation
//! - Response formatting
//! - SSE event feed bridging the DisplayHub to observers

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;
use std::time::Duration;

/// Bound on the processor probe; liveness must answer even when the
/// processor hangs for the full client timeout
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let processor_ok = tokio::time::timeout(HEALTH_PROBE_TIMEOUT, state.backend.health_check())
        .await
        .unwrap_or(false);

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        processor_connected: processor_ok,
        session_count: state.manager.registry().len().await,
        observer_count: state.hub.connection_count(),
    };

    Json(response)
}
