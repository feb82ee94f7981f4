//! Local mirror of remote thumbnail files
//!
//! Thumbnails are small and requested on every page render, so they are copied
//! off the remote mount once and served from local disk afterwards. Layout:
//! `{root}/{media}/{directory name}/{prefix}-thumb.{ext}`, served under
//! `/thumbnails/{media}/{url-encoded directory}/{file}`.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use super::artwork::{ArtworkKind, MediaCategory};
use super::filesystem::RemoteFs;

/// URL prefix the HTTP layer mounts the mirror under
pub const THUMBNAIL_URL_PREFIX: &str = "/thumbnails";

#[derive(Debug, Clone)]
pub struct ThumbnailCache {
    root: PathBuf,
}

impl ThumbnailCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn local_path(&self, media: MediaCategory, dir_name: &str, file_name: &str) -> PathBuf {
        self.root.join(media.as_str()).join(dir_name).join(file_name)
    }

    pub fn url(media: MediaCategory, dir_name: &str, file_name: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            THUMBNAIL_URL_PREFIX,
            media.as_str(),
            urlencoding::encode(dir_name),
            file_name
        )
    }

    /// URL of an already mirrored thumbnail. Local disk only, never touches
    /// the remote mount.
    pub async fn cached_url(
        &self,
        media: MediaCategory,
        dir_name: &str,
        kind: ArtworkKind,
    ) -> Option<String> {
        for ext in kind.extensions() {
            let file_name = kind.thumb_file(ext);
            let local = self.local_path(media, dir_name, &file_name);
            if fs::try_exists(&local).await.unwrap_or(false) {
                return Some(Self::url(media, dir_name, &file_name));
            }
        }
        None
    }

    /// Mirror a remote thumbnail file, returning its local URL.
    ///
    /// An existing mirror is reused as-is.
    pub async fn mirror(
        &self,
        remote: &RemoteFs,
        media: MediaCategory,
        dir_name: &str,
        remote_thumb: &Path,
    ) -> Option<String> {
        let file_name = remote_thumb.file_name()?.to_string_lossy().to_string();
        let local = self.local_path(media, dir_name, &file_name);

        if fs::try_exists(&local).await.unwrap_or(false) {
            return Some(Self::url(media, dir_name, &file_name));
        }

        if remote.copy_to_local(remote_thumb, &local).await {
            debug!(path = %local.display(), "Mirrored thumbnail");
            Some(Self::url(media, dir_name, &file_name))
        } else {
            None
        }
    }

    /// Store freshly generated thumbnail bytes, replacing any older mirror of
    /// the same artwork kind.
    pub async fn store(
        &self,
        media: MediaCategory,
        dir_name: &str,
        kind: ArtworkKind,
        file_name: &str,
        bytes: &[u8],
    ) -> Option<String> {
        for ext in kind.extensions() {
            let stale = self.local_path(media, dir_name, &kind.thumb_file(ext));
            let _ = fs::remove_file(&stale).await;
        }

        let local = self.local_path(media, dir_name, file_name);
        if let Some(parent) = local.parent()
            && let Err(e) = fs::create_dir_all(parent).await
        {
            warn!(path = %parent.display(), error = %e, "Failed to create thumbnail directory");
            return None;
        }

        match fs::write(&local, bytes).await {
            Ok(()) => Some(Self::url(media, dir_name, file_name)),
            Err(e) => {
                warn!(path = %local.display(), error = %e, "Failed to store thumbnail");
                None
            }
        }
    }
}
