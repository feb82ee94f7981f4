//! Background thumbnail backfill
//!
//! Lightweight scans leave thumbnail URLs unset when nothing is mirrored
//! locally yet. This pass walks those entries slowly, copies their remote
//! thumbnails into the local mirror and patches the cache at the end.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::artwork::{ArtworkKind, MediaCategory};
use super::filesystem::RemoteFs;
use super::scan_cache::ScanCacheStore;
use super::scanner::ScanEntry;
use super::thumbnails::ThumbnailCache;

/// An entry still waiting for its thumbnail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingThumbnail {
    pub title: String,
    pub path: PathBuf,
}

impl PendingThumbnail {
    /// Entries with `kind` artwork but no mirrored thumbnail
    pub fn collect(entries: &[ScanEntry], kind: ArtworkKind) -> Vec<Self> {
        entries
            .iter()
            .filter(|e| e.needs_thumbnail(kind))
            .map(|e| Self { title: e.title.clone(), path: e.path.clone() })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ThumbnailBackfill {
    fs: RemoteFs,
    thumbnails: ThumbnailCache,
    store: Arc<ScanCacheStore>,
    pacing: Duration,
}

impl ThumbnailBackfill {
    pub fn new(
        fs: RemoteFs,
        thumbnails: ThumbnailCache,
        store: Arc<ScanCacheStore>,
        pacing: Duration,
    ) -> Self {
        Self { fs, thumbnails, store, pacing }
    }

    /// Mirror the thumbnails of `pending` and patch the cache. Returns the
    /// number of entries patched.
    pub async fn run(
        &self,
        media: MediaCategory,
        kind: ArtworkKind,
        pending: Vec<PendingThumbnail>,
    ) -> usize {
        info!(media = %media, artwork = %kind, pending = pending.len(), "Starting thumbnail backfill");
        let mut resolved = HashMap::new();

        for item in pending {
            let files = self.fs.list(&item.path).await;
            let thumb = kind
                .extensions()
                .iter()
                .map(|ext| kind.thumb_file(ext))
                .find(|name| files.iter().any(|f| f == name));

            if let Some(name) = thumb
                && let Some(url) = self
                    .thumbnails
                    .mirror(&self.fs, media, &item.title, &item.path.join(&name))
                    .await
            {
                debug!(title = %item.title, "Backfilled thumbnail");
                resolved.insert(item.title, url);
            }

            tokio::time::sleep(self.pacing).await;
        }

        match self.store.patch_thumbnails(media, kind, &resolved).await {
            Ok(patched) => {
                info!(media = %media, artwork = %kind, patched, "Thumbnail backfill complete");
                patched
            }
            Err(e) => {
                warn!(media = %media, artwork = %kind, error = %e, "Failed to save backfilled thumbnails");
                0
            }
        }
    }
}
