//! Application state and HTTP router construction.
//!
//! Used by [main] and by the HTTP integration tests to build the Axum app.

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::config::Config;
use crate::services::thumbnails::THUMBNAIL_URL_PREFIX;
use crate::services::{
    ArtworkManager, ArtworkService, DirectoryMappingStore, DirectoryScanner, LibraryRoots,
    MountHealth, RemoteFs, ScanCacheStore, ScanContext, ScanOrchestrator, SlackNotifier,
    ThumbnailBackfill, ThumbnailCache, TmdbClient,
};

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub manager: Arc<ArtworkManager>,
    /// Accessor used to stream full-resolution artwork
    pub fs: RemoteFs,
}

impl AppState {
    /// Wire every service from the configuration. One [ScanContext] and one
    /// [MountHealth] are created here and shared by everything below.
    pub fn from_config(config: Config) -> Self {
        let health = Arc::new(MountHealth::new());
        let fs = RemoteFs::new(config.fs.clone(), health.clone());
        let thumbnails = ThumbnailCache::new(config.thumbnail_cache_path.clone());

        let store = Arc::new(ScanCacheStore::new(&config.data_path, thumbnails.clone()));
        let scanner = DirectoryScanner::new(fs.clone(), thumbnails.clone());
        let backfill = ThumbnailBackfill::new(
            fs.clone(),
            thumbnails.clone(),
            store.clone(),
            config.scan.backfill_pacing,
        );
        let roots = LibraryRoots {
            movie: config.movie_folders.clone(),
            tv: config.tv_folders.clone(),
        };
        let orchestrator = ScanOrchestrator::new(
            Arc::new(ScanContext::new(health)),
            store,
            scanner,
            backfill,
            roots,
            config.scan.clone(),
        );

        let manager = ArtworkManager::new(
            orchestrator,
            Arc::new(DirectoryMappingStore::new(&config.data_path, fs.clone())),
            ArtworkService::new(fs.clone(), thumbnails),
            TmdbClient::new(config.tmdb_api_key.clone()),
            SlackNotifier::new(config.slack_webhook_url.clone()),
            fs.clone(),
        );

        Self {
            config: Arc::new(config),
            manager: Arc::new(manager),
            fs,
        }
    }
}

/// Build the full Axum router: /api, /artwork, /thumbnails and layers.
/// Returns Router<()> (state fully applied) for use with axum::serve.
pub fn build_app(state: AppState) -> Router<()> {
    let thumbnails = ServeDir::new(&state.config.thumbnail_cache_path);

    Router::new()
        .merge(api::health::router())
        .nest("/api", api::scan::router().merge(api::artwork::router()))
        .merge(api::artwork::files_router())
        .nest_service(THUMBNAIL_URL_PREFIX, thumbnails)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
