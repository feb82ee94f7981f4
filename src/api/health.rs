//! Health check endpoints

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub mount_errors: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
}

/// Health check - always returns OK if the server is running
async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness check - the mount is not currently in a backoff window
async fn readyz(State(state): State<AppState>) -> Json<ReadyResponse> {
    let health = state.fs.health();
    let backoff = health.backoff_remaining();

    Json(ReadyResponse {
        ready: backoff.is_none(),
        mount_errors: health.consecutive_errors(),
        backoff_ms: backoff.map(|d| d.as_millis() as u64),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}
