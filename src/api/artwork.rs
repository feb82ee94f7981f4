//! Artwork endpoints: provider options, downloads, availability and the
//! full-resolution file server.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::{error_text, parse_key};
use crate::AppState;
use crate::services::scanner::is_safe_segment;
use crate::services::tmdb::TmdbSearchResult;
use crate::services::{ArtworkKind, ArtworkOptions, DownloadError, DownloadRequest, MediaCategory};

#[derive(Debug, Serialize)]
pub struct KindInfo {
    pub kind: ArtworkKind,
    pub display_name: &'static str,
    pub file_prefix: &'static str,
    pub provider_field: &'static str,
    pub default_height: u32,
    pub extensions: &'static [&'static str],
}

#[derive(Debug, Serialize)]
pub struct DownloadResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResponse {
    fn from_result(result: anyhow::Result<()>) -> (StatusCode, Json<Self>) {
        match result {
            Ok(()) => (StatusCode::OK, Json(Self { success: true, error: None })),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(Self { success: false, error: Some(error_text(&e)) }),
            ),
        }
    }

    fn bad_request(error: String) -> (StatusCode, Json<Self>) {
        (StatusCode::BAD_REQUEST, Json(Self { success: false, error: Some(error) }))
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: String,
}

/// GET /api/artwork/kinds
async fn list_kinds() -> Json<Vec<KindInfo>> {
    Json(
        ArtworkKind::ALL
            .iter()
            .map(|kind| KindInfo {
                kind: *kind,
                display_name: kind.display_name(),
                file_prefix: kind.file_prefix(),
                provider_field: kind.provider_field(),
                default_height: kind.default_height(),
                extensions: kind.extensions(),
            })
            .collect(),
    )
}

fn download_status(err: &DownloadError) -> StatusCode {
    match err {
        DownloadError::NoDirectory { .. } => StatusCode::NOT_FOUND,
        DownloadError::Http { .. } | DownloadError::Status { .. } | DownloadError::NotAnImage { .. } => {
            StatusCode::BAD_GATEWAY
        }
        DownloadError::Write(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// POST /api/artwork/download
async fn download_artwork(
    State(state): State<AppState>,
    Json(body): Json<DownloadRequest>,
) -> (StatusCode, Json<DownloadResponse>) {
    match state.manager.download_artwork(body).await {
        Ok(saved) => (
            StatusCode::OK,
            Json(DownloadResponse {
                success: true,
                path: Some(saved.path.display().to_string()),
                thumb_url: saved.thumb_url,
                error: None,
            }),
        ),
        Err(e) => (
            download_status(&e),
            Json(DownloadResponse {
                success: false,
                path: None,
                thumb_url: None,
                error: Some(e.to_string()),
            }),
        ),
    }
}

/// GET /api/artwork/options/{media}/{id}/{artwork}
async fn artwork_options(
    State(state): State<AppState>,
    Path((media, id, artwork)): Path<(String, u64, String)>,
) -> Result<Json<ArtworkOptions>, (StatusCode, String)> {
    let (media, kind) = parse_key(&media, &artwork)?;
    state
        .manager
        .artwork_options(id, media, kind)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, error_text(&e)))
}

/// POST /api/artwork/unavailable/{media}/{id}/{artwork}
async fn mark_unavailable(
    State(state): State<AppState>,
    Path((media, id, artwork)): Path<(String, u64, String)>,
) -> (StatusCode, Json<ActionResponse>) {
    match parse_key(&media, &artwork) {
        Ok((media, kind)) => {
            ActionResponse::from_result(state.manager.mark_unavailable(id, media, kind).await)
        }
        Err((_, e)) => ActionResponse::bad_request(e),
    }
}

/// POST /api/artwork/recheck/{media}/{id}/{artwork}
async fn recheck(
    State(state): State<AppState>,
    Path((media, id, artwork)): Path<(String, u64, String)>,
) -> (StatusCode, Json<ActionResponse>) {
    match parse_key(&media, &artwork) {
        Ok((media, kind)) => ActionResponse::from_result(state.manager.recheck(id, media, kind).await),
        Err((_, e)) => ActionResponse::bad_request(e),
    }
}

/// GET /api/search/{media}?query=
async fn search(
    State(state): State<AppState>,
    Path(media): Path<String>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<TmdbSearchResult>>, (StatusCode, String)> {
    let media = media.parse::<MediaCategory>().map_err(|e| (StatusCode::BAD_REQUEST, e))?;
    Ok(Json(state.manager.search(media, &query.query).await))
}

/// Serve full-resolution artwork from the media roots
///
/// GET /artwork/{dir}/{file}
async fn serve_artwork(
    State(state): State<AppState>,
    Path((dir, file)): Path<(String, String)>,
) -> impl IntoResponse {
    if !is_safe_segment(&dir) || !is_safe_segment(&file) {
        return (StatusCode::BAD_REQUEST, "Invalid artwork path").into_response();
    }

    let roots = state.manager.orchestrator().roots();
    for root in MediaCategory::ALL.iter().flat_map(|m| roots.for_media(*m)) {
        let path = root.join(&dir).join(&file);
        if !state.fs.exists(&path).await {
            continue;
        }
        let Some(bytes) = state.fs.read_bytes(&path).await else {
            return (StatusCode::SERVICE_UNAVAILABLE, "Artwork could not be read").into_response();
        };
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type())
            .unwrap_or("application/octet-stream");
        let headers = [
            (header::CONTENT_TYPE, mime.to_string()),
            (header::CACHE_CONTROL, "public, max-age=86400".to_string()),
        ];
        return (StatusCode::OK, headers, bytes).into_response();
    }

    (StatusCode::NOT_FOUND, "Artwork not found").into_response()
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/artwork/kinds", get(list_kinds))
        .route("/artwork/download", post(download_artwork))
        .route("/artwork/options/{media}/{id}/{artwork}", get(artwork_options))
        .route("/artwork/unavailable/{media}/{id}/{artwork}", post(mark_unavailable))
        .route("/artwork/recheck/{media}/{id}/{artwork}", post(recheck))
        .route("/search/{media}", get(search))
}

/// Routes mounted at the application root rather than under /api
pub fn files_router() -> Router<AppState> {
    Router::new().route("/artwork/{dir}/{file}", get(serve_artwork))
}
