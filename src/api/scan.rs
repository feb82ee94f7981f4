//! Scan cache endpoints
//!
//! A request never waits for a scan: the answer is either the cached entries
//! or the progress of the background scan producing them.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Local};
use serde::Serialize;

use super::{error_text, parse_key};
use crate::services::orchestrator::IncrementalSummary;
use crate::services::{ScanData, ScanEntry, ScanProgress, ScanStats};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScanResponse {
    Present {
        entries: Vec<ScanEntry>,
        stats: ScanStats,
        generated_at: DateTime<Local>,
    },
    InProgress {
        progress: ScanProgress,
    },
}

impl ScanResponse {
    fn from_data(data: ScanData) -> Self {
        match data {
            ScanData::Present(doc) => Self::Present {
                stats: ScanStats::from_entries(&doc.entries, doc.artwork),
                entries: doc.entries,
                generated_at: doc.generated_at,
            },
            ScanData::InProgress(progress) => Self::InProgress { progress },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IncrementalResponse {
    pub success: bool,
    #[serde(flatten)]
    pub summary: Option<IncrementalSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /api/scan/{media}/{artwork}
async fn get_scan(
    State(state): State<AppState>,
    Path((media, artwork)): Path<(String, String)>,
) -> Result<Json<ScanResponse>, (StatusCode, String)> {
    let (media, kind) = parse_key(&media, &artwork)?;
    let data = state.manager.request_scan_data(media, kind).await;
    Ok(Json(ScanResponse::from_data(data)))
}

/// POST /api/scan/{media}/{artwork}/refresh
///
/// Clears the cache and immediately starts a new scan.
async fn refresh_scan(
    State(state): State<AppState>,
    Path((media, artwork)): Path<(String, String)>,
) -> Result<Json<ScanResponse>, (StatusCode, String)> {
    let (media, kind) = parse_key(&media, &artwork)?;
    state
        .manager
        .refresh(media, kind)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, error_text(&e)))?;
    let data = state.manager.request_scan_data(media, kind).await;
    Ok(Json(ScanResponse::from_data(data)))
}

/// POST /api/scan/{media}/{artwork}/incremental
async fn incremental_scan(
    State(state): State<AppState>,
    Path((media, artwork)): Path<(String, String)>,
) -> (StatusCode, Json<IncrementalResponse>) {
    let (media, kind) = match parse_key(&media, &artwork) {
        Ok(key) => key,
        Err((status, error)) => {
            return (
                status,
                Json(IncrementalResponse { success: false, summary: None, error: Some(error) }),
            );
        }
    };

    match state.manager.incremental_refresh(media, kind).await {
        Ok(Some(summary)) => (
            StatusCode::OK,
            Json(IncrementalResponse { success: true, summary: Some(summary), error: None }),
        ),
        Ok(None) => (
            StatusCode::CONFLICT,
            Json(IncrementalResponse {
                success: false,
                summary: None,
                error: Some("No scan cache yet, request a full scan first".to_string()),
            }),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(IncrementalResponse { success: false, summary: None, error: Some(error_text(&e)) }),
        ),
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/scan/{media}/{artwork}", get(get_scan))
        .route("/scan/{media}/{artwork}/refresh", post(refresh_scan))
        .route("/scan/{media}/{artwork}/incremental", post(incremental_scan))
}
