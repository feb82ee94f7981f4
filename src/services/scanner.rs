//! Directory to artwork scanner
//!
//! Turns one media directory into a [ScanEntry]. A single directory listing is
//! enough to compute the presence flags of every artwork kind, so caches for
//! the other kinds can later be derived without touching the mount again.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::artwork::{artwork_url, ArtworkKind, MediaCategory};
use super::filesystem::RemoteFs;
use super::text_utils::slugify;
use super::thumbnails::ThumbnailCache;
use crate::media::thumbnail::image_dimensions;

/// Names never treated as media directories (Synology metadata and recycle bins)
const SYSTEM_NAMES: &[&str] = &["@eadir", "#recycle"];

/// State of one artwork kind inside a [ScanEntry]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtworkState {
    /// `{prefix}.{ext}` exists in the directory
    #[serde(default)]
    pub present: bool,
    /// Web path of the full-resolution file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Local mirror URL of the thumbnail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    /// Provider is known to have no artwork of this kind
    #[serde(default)]
    pub unavailable: bool,
}

impl ArtworkState {
    /// Presence and availability only, without the per-kind details
    pub fn flags_only(&self) -> Self {
        Self {
            present: self.present,
            unavailable: self.unavailable,
            ..Self::default()
        }
    }
}

/// One media directory as seen by a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEntry {
    pub title: String,
    pub path: PathBuf,
    pub clean_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmdb_id: Option<u64>,
    #[serde(default)]
    pub poster: ArtworkState,
    #[serde(default)]
    pub logo: ArtworkState,
    #[serde(default)]
    pub backdrop: ArtworkState,
}

impl ScanEntry {
    pub fn new(title: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let title = title.into();
        Self {
            clean_id: slugify(&title),
            title,
            path: path.into(),
            tmdb_id: None,
            poster: ArtworkState::default(),
            logo: ArtworkState::default(),
            backdrop: ArtworkState::default(),
        }
    }

    pub fn artwork(&self, kind: ArtworkKind) -> &ArtworkState {
        match kind {
            ArtworkKind::Poster => &self.poster,
            ArtworkKind::Logo => &self.logo,
            ArtworkKind::Backdrop => &self.backdrop,
        }
    }

    pub fn artwork_mut(&mut self, kind: ArtworkKind) -> &mut ArtworkState {
        match kind {
            ArtworkKind::Poster => &mut self.poster,
            ArtworkKind::Logo => &mut self.logo,
            ArtworkKind::Backdrop => &mut self.backdrop,
        }
    }

    pub fn has(&self, kind: ArtworkKind) -> bool {
        self.artwork(kind).present
    }

    /// Has artwork of `kind` but no mirrored thumbnail yet
    pub fn needs_thumbnail(&self, kind: ArtworkKind) -> bool {
        let state = self.artwork(kind);
        state.present && state.thumb.is_none()
    }

    /// Whether this entry describes `directory` (by name or full path)
    pub fn matches_directory(&self, directory: &Path) -> bool {
        self.path == directory
            || directory
                .file_name()
                .is_some_and(|name| name.to_string_lossy() == self.title)
    }
}

/// How much work a directory scan may do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Presence from the listing only; thumbnails only if already mirrored
    Lightweight,
    /// Also read dimensions, modification time and mirror the thumbnail
    Full,
}

/// Hidden or NAS system entries skipped during enumeration
pub fn is_hidden(name: &str) -> bool {
    if name.starts_with('.') {
        return true;
    }
    let lower = name.to_lowercase();
    SYSTEM_NAMES.contains(&lower.as_str())
}

/// A single path segment that cannot escape its parent
pub fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains(['/', '\\']) && !is_hidden(segment)
}

/// Scans media directories for artwork files
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    fs: RemoteFs,
    thumbnails: ThumbnailCache,
}

impl DirectoryScanner {
    pub fn new(fs: RemoteFs, thumbnails: ThumbnailCache) -> Self {
        Self { fs, thumbnails }
    }

    /// Media directory names under `root`, hidden names removed, sorted.
    pub async fn enumerate_root(&self, root: &Path) -> Vec<String> {
        let mut names: Vec<String> = self
            .fs
            .list_entries(root)
            .await
            .into_iter()
            .filter(|e| e.is_dir && !is_hidden(&e.name))
            .map(|e| e.name)
            .collect();
        names.sort();
        names
    }

    /// Scan one directory for `kind`.
    ///
    /// `listing` may carry an already fetched directory listing; otherwise the
    /// directory is listed once.
    pub async fn scan_directory(
        &self,
        name: &str,
        path: &Path,
        kind: ArtworkKind,
        media: MediaCategory,
        listing: Option<&[String]>,
        mode: ScanMode,
    ) -> ScanEntry {
        let fetched;
        let listing = match listing {
            Some(l) => l,
            None => {
                fetched = self.fs.list(path).await;
                &fetched
            }
        };
        let files: HashSet<&str> = listing.iter().map(String::as_str).collect();

        let mut entry = ScanEntry::new(name, path);
        for k in ArtworkKind::ALL {
            entry.artwork_mut(k).present = k
                .extensions()
                .iter()
                .any(|ext| files.contains(k.artwork_file(ext).as_str()));
        }

        let Some(ext) = kind
            .extensions()
            .iter()
            .find(|ext| files.contains(kind.artwork_file(ext).as_str()))
        else {
            return entry;
        };

        let file_name = kind.artwork_file(ext);
        let thumb_name = std::iter::once(*ext)
            .chain(kind.extensions().iter().copied())
            .map(|e| kind.thumb_file(e))
            .find(|t| files.contains(t.as_str()));

        let state = entry.artwork_mut(kind);
        state.url = Some(artwork_url(name, &file_name));

        match mode {
            ScanMode::Lightweight => {
                if thumb_name.is_some() {
                    state.thumb = self.thumbnails.cached_url(media, name, kind).await;
                }
            }
            ScanMode::Full => {
                let file_path = path.join(&file_name);
                if let Some(bytes) = self.fs.read_bytes(&file_path).await {
                    state.dimensions = image_dimensions(&bytes);
                }
                state.last_modified = self
                    .fs
                    .modified(&file_path)
                    .await
                    .map(|t| t.format("%Y-%m-%d").to_string());
                if let Some(thumb) = thumb_name {
                    state.thumb = self
                        .thumbnails
                        .mirror(&self.fs, media, name, &path.join(thumb))
                        .await;
                }
                debug!(
                    title = %name,
                    artwork = %kind,
                    dimensions = ?state.dimensions,
                    "Scanned directory with metadata"
                );
            }
        }

        entry
    }
}
