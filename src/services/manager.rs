//! Artwork manager: the single entry point used by the HTTP layer
//!
//! Ties the scan orchestrator, mapping store, provider client, downloader and
//! notifier together. Owns nothing global; everything comes in through
//! [ArtworkManager::new].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::artwork::{dir_name_of, ArtworkKind, ArtworkService, DownloadError, MediaCategory, SavedArtwork};
use super::filesystem::RemoteFs;
use super::mapping::DirectoryMappingStore;
use super::notifications::SlackNotifier;
use super::orchestrator::{IncrementalSummary, ScanData, ScanOrchestrator};
use super::scanner::is_safe_segment;
use super::tmdb::{ArtworkImage, TmdbClient, TmdbSearchResult};

/// A user's pick from the artwork options
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    pub artwork: ArtworkKind,
    pub title: String,
    pub media: MediaCategory,
    #[serde(default)]
    pub tmdb_id: Option<u64>,
    /// Directory name or path chosen in the UI
    #[serde(default)]
    pub directory: Option<String>,
}

/// Provider artwork on offer for one title
#[derive(Debug, Clone, Serialize)]
pub struct ArtworkOptions {
    pub tmdb_id: u64,
    pub title: Option<String>,
    pub artwork: ArtworkKind,
    /// Provider previously had nothing of this kind
    pub known_unavailable: bool,
    pub images: Vec<ArtworkImage>,
}

pub struct ArtworkManager {
    orchestrator: ScanOrchestrator,
    mappings: Arc<DirectoryMappingStore>,
    downloads: ArtworkService,
    tmdb: TmdbClient,
    notifier: SlackNotifier,
    fs: RemoteFs,
}

impl ArtworkManager {
    pub fn new(
        orchestrator: ScanOrchestrator,
        mappings: Arc<DirectoryMappingStore>,
        downloads: ArtworkService,
        tmdb: TmdbClient,
        notifier: SlackNotifier,
        fs: RemoteFs,
    ) -> Self {
        Self { orchestrator, mappings, downloads, tmdb, notifier, fs }
    }

    pub fn orchestrator(&self) -> &ScanOrchestrator {
        &self.orchestrator
    }

    /// Scan data for the page, with TMDB ids attached from the mapping store.
    pub async fn request_scan_data(&self, media: MediaCategory, kind: ArtworkKind) -> ScanData {
        match self.orchestrator.request(media, kind).await {
            ScanData::Present(mut doc) => {
                let ids = self.mappings.ids_by_directory(media).await;
                for entry in &mut doc.entries {
                    if entry.tmdb_id.is_none() {
                        entry.tmdb_id = ids.get(&entry.path).copied();
                    }
                }
                ScanData::Present(doc)
            }
            other => other,
        }
    }

    pub async fn refresh(&self, media: MediaCategory, kind: ArtworkKind) -> Result<()> {
        self.orchestrator.refresh(media, kind).await
    }

    pub async fn incremental_refresh(
        &self,
        media: MediaCategory,
        kind: ArtworkKind,
    ) -> Result<Option<IncrementalSummary>> {
        self.orchestrator.incremental_refresh(media, kind).await
    }

    pub async fn search(&self, media: MediaCategory, query: &str) -> Vec<TmdbSearchResult> {
        self.tmdb.search(media, query).await
    }

    /// Turn a UI directory hint into an existing directory inside `roots`.
    ///
    /// Accepts a bare directory name, or an absolute path whose parent is one
    /// of the roots. Anything else is ignored.
    async fn hint_path(&self, roots: &[PathBuf], hint: &str) -> Option<PathBuf> {
        let hint = hint.trim();
        if hint.is_empty() {
            return None;
        }

        let as_path = Path::new(hint);
        let candidates: Vec<PathBuf> = if as_path.is_absolute() {
            let name = as_path.file_name().and_then(|n| n.to_str());
            match (as_path.parent(), name) {
                (Some(parent), Some(name))
                    if is_safe_segment(name) && roots.iter().any(|r| r.as_path() == parent) =>
                {
                    vec![as_path.to_path_buf()]
                }
                _ => Vec::new(),
            }
        } else if is_safe_segment(hint) {
            roots.iter().map(|root| root.join(hint)).collect()
        } else {
            Vec::new()
        };

        if candidates.is_empty() {
            warn!(hint = %hint, "Ignoring directory hint outside the library roots");
            return None;
        }
        for candidate in candidates {
            if self.fs.is_dir(&candidate).await {
                return Some(candidate);
            }
        }
        None
    }

    async fn resolve_directory(&self, req: &DownloadRequest) -> Option<PathBuf> {
        let roots = self.orchestrator.roots().for_media(req.media);
        let hint = match req.directory.as_deref() {
            Some(h) => self.hint_path(roots, h).await,
            None => None,
        };

        match req.tmdb_id {
            Some(id) => {
                self.mappings
                    .resolve(id, req.media, &req.title, roots, hint.as_deref())
                    .await
            }
            None => match hint {
                Some(h) if self.fs.is_dir(&h).await => Some(h),
                _ => self.mappings.locate(&req.title, roots).await,
            },
        }
    }

    /// Download the chosen artwork into its media directory and update every
    /// cache that lists the directory.
    pub async fn download_artwork(&self, req: DownloadRequest) -> Result<SavedArtwork, DownloadError> {
        let directory = self
            .resolve_directory(&req)
            .await
            .ok_or_else(|| DownloadError::NoDirectory { title: req.title.clone() })?;

        let saved = self
            .downloads
            .download(&req.url, req.artwork, &req.title, req.media, &directory)
            .await?;

        let store = self.orchestrator.store();
        if let Err(e) = store
            .update_single_entry(req.media, req.artwork, &directory, saved.thumb_url.clone())
            .await
        {
            warn!(title = %req.title, error = %e, "Failed to update scan cache after download");
        }

        let dir_name = dir_name_of(&directory);
        if store.unavailability().await.is_unavailable(&dir_name, req.artwork)
            && let Err(e) = store.set_unavailable(&dir_name, req.artwork, false).await
        {
            warn!(directory = %dir_name, error = %e, "Failed to clear unavailability");
        }

        info!(
            title = %req.title,
            artwork = %req.artwork,
            path = %saved.path.display(),
            "Artwork downloaded"
        );
        self.notifier.notify_detached(
            format!("{} for '{}' has been downloaded!", req.artwork.display_name(), req.title),
            Some(saved.path.display().to_string()),
            Some(req.url.clone()),
        );

        Ok(saved)
    }

    /// Provider images for the picker. An empty answer from a configured
    /// provider marks the artwork unavailable.
    pub async fn artwork_options(
        &self,
        id: u64,
        media: MediaCategory,
        kind: ArtworkKind,
    ) -> Result<ArtworkOptions> {
        let known_unavailable = self.mappings.availability(id, media, kind).await == Some(false);
        let title = self.tmdb.get_details(id, media).await;
        let images = self.tmdb.get_images(id, media, kind).await;

        if images.is_empty() && self.tmdb.has_api_key() {
            info!(tmdb_id = id, media = %media, artwork = %kind, "Provider has no artwork");
            self.mark_unavailable(id, media, kind).await?;
        }

        Ok(ArtworkOptions { tmdb_id: id, title, artwork: kind, known_unavailable, images })
    }

    /// Record that the provider has no `kind` artwork for `id`.
    pub async fn mark_unavailable(&self, id: u64, media: MediaCategory, kind: ArtworkKind) -> Result<()> {
        self.mappings
            .set_availability(id, media, kind, false)
            .await
            .context("Failed to record unavailability")?;
        self.set_directory_flag(id, media, kind, true).await
    }

    /// Forget a previous "unavailable" verdict so the provider is asked again.
    pub async fn recheck(&self, id: u64, media: MediaCategory, kind: ArtworkKind) -> Result<()> {
        self.mappings
            .reset_availability(id, media, kind)
            .await
            .context("Failed to reset availability")?;
        self.set_directory_flag(id, media, kind, false).await
    }

    async fn set_directory_flag(
        &self,
        id: u64,
        media: MediaCategory,
        kind: ArtworkKind,
        unavailable: bool,
    ) -> Result<()> {
        let Some(directory) = self.mappings.get(id, media).await.and_then(|m| m.directory) else {
            return Ok(());
        };
        self.orchestrator
            .store()
            .set_unavailable(&dir_name_of(&directory), kind, unavailable)
            .await
            .context("Failed to propagate unavailability")
    }
}
