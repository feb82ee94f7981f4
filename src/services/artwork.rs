//! Artwork categories and the download pipeline
//!
//! A download replaces `{prefix}.{ext}` and `{prefix}-thumb.{ext}` in the
//! media directory on the remote mount and refreshes the local thumbnail
//! mirror.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::filesystem::{FsError, RemoteFs};
use super::thumbnails::ThumbnailCache;
use crate::media::thumbnail;

/// Artwork kind managed per media directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtworkKind {
    Poster,
    Logo,
    Backdrop,
}

impl ArtworkKind {
    pub const ALL: [ArtworkKind; 3] = [ArtworkKind::Poster, ArtworkKind::Logo, ArtworkKind::Backdrop];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtworkKind::Poster => "poster",
            ArtworkKind::Logo => "logo",
            ArtworkKind::Backdrop => "backdrop",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ArtworkKind::Poster => "Poster",
            ArtworkKind::Logo => "Logo",
            ArtworkKind::Backdrop => "Backdrop",
        }
    }

    /// File name prefix on disk (`poster.jpg`, `logo-thumb.png`, ...)
    pub fn file_prefix(&self) -> &'static str {
        self.as_str()
    }

    /// Field of the provider's image listing holding this kind
    pub fn provider_field(&self) -> &'static str {
        match self {
            ArtworkKind::Poster => "posters",
            ArtworkKind::Logo => "logos",
            ArtworkKind::Backdrop => "backdrops",
        }
    }

    /// Default thumbnail display height in pixels
    pub fn default_height(&self) -> u32 {
        match self {
            ArtworkKind::Poster => 450,
            ArtworkKind::Logo => 150,
            ArtworkKind::Backdrop => 169,
        }
    }

    /// Extensions to probe, in order of preference
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            ArtworkKind::Logo => &["png", "jpg", "jpeg"],
            ArtworkKind::Poster | ArtworkKind::Backdrop => &["jpg", "jpeg", "png"],
        }
    }

    /// Extension downloads are saved with (PNG keeps logo transparency)
    pub fn primary_extension(&self) -> &'static str {
        self.extensions()[0]
    }

    pub fn artwork_file(&self, ext: &str) -> String {
        format!("{}.{}", self.file_prefix(), ext)
    }

    pub fn thumb_file(&self, ext: &str) -> String {
        format!("{}-thumb.{}", self.file_prefix(), ext)
    }

    /// The other two kinds
    pub fn siblings(self) -> impl Iterator<Item = ArtworkKind> {
        Self::ALL.into_iter().filter(move |k| *k != self)
    }
}

impl fmt::Display for ArtworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtworkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "poster" | "posters" => Ok(ArtworkKind::Poster),
            "logo" | "logos" => Ok(ArtworkKind::Logo),
            "backdrop" | "backdrops" => Ok(ArtworkKind::Backdrop),
            other => Err(format!("unknown artwork kind '{}'", other)),
        }
    }
}

/// Library grouping with its own root folders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaCategory {
    Movie,
    Tv,
}

impl MediaCategory {
    pub const ALL: [MediaCategory; 2] = [MediaCategory::Movie, MediaCategory::Tv];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaCategory::Movie => "movie",
            MediaCategory::Tv => "tv",
        }
    }
}

impl fmt::Display for MediaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "movie" | "movies" => Ok(MediaCategory::Movie),
            "tv" | "show" | "shows" => Ok(MediaCategory::Tv),
            other => Err(format!("unknown media category '{}'", other)),
        }
    }
}

/// Web path of a full-resolution artwork file
pub fn artwork_url(dir_name: &str, file_name: &str) -> String {
    format!("/artwork/{}/{}", urlencoding::encode(dir_name), file_name)
}

/// Why a download did not produce a file
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request for {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request for {url} returned {status}")]
    Status { url: String, status: reqwest::StatusCode },

    #[error("payload from {url} is not an image")]
    NotAnImage { url: String },

    #[error("no matching directory for '{title}'")]
    NoDirectory { title: String },

    #[error(transparent)]
    Write(#[from] FsError),
}

/// Result of a successful download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedArtwork {
    /// Full-resolution file on the mount
    pub path: PathBuf,
    /// Thumbnail written next to it, if generation succeeded
    pub thumb_path: Option<PathBuf>,
    /// Local mirror URL of the thumbnail
    pub thumb_url: Option<String>,
}

/// Downloads artwork into media directories
pub struct ArtworkService {
    http: reqwest::Client,
    fs: RemoteFs,
    thumbnails: ThumbnailCache,
}

impl ArtworkService {
    pub fn new(fs: RemoteFs, thumbnails: ThumbnailCache) -> Self {
        Self {
            http: reqwest::Client::new(),
            fs,
            thumbnails,
        }
    }

    /// Download `url` as the `kind` artwork of `directory`.
    pub async fn download(
        &self,
        url: &str,
        kind: ArtworkKind,
        title: &str,
        media: MediaCategory,
        directory: &Path,
    ) -> Result<SavedArtwork, DownloadError> {
        info!(
            url = %url,
            artwork = %kind,
            title = %title,
            directory = %directory.display(),
            "Downloading artwork"
        );

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| DownloadError::Http { url: url.to_string(), source })?;

        if !response.status().is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| DownloadError::Http { url: url.to_string(), source })?;

        self.save(&bytes, url, kind, title, media, directory).await
    }

    /// Write already fetched artwork bytes into `directory`.
    pub async fn save(
        &self,
        bytes: &[u8],
        url: &str,
        kind: ArtworkKind,
        title: &str,
        media: MediaCategory,
        directory: &Path,
    ) -> Result<SavedArtwork, DownloadError> {
        if !infer::is_image(bytes) {
            return Err(DownloadError::NotAnImage { url: url.to_string() });
        }

        for ext in kind.extensions() {
            self.fs.remove_file(&directory.join(kind.artwork_file(ext))).await;
            self.fs.remove_file(&directory.join(kind.thumb_file(ext))).await;
        }

        let ext = kind.primary_extension();
        let full_path = directory.join(kind.artwork_file(ext));
        self.fs.write_bytes(&full_path, bytes).await?;
        debug!(path = %full_path.display(), size = bytes.len(), "Saved full-resolution artwork");

        let source = bytes.to_vec();
        let thumb = tokio::task::spawn_blocking(move || thumbnail::create_thumbnail(kind, &source))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|r| r);

        let thumb_bytes = match thumb {
            Ok(b) => b,
            Err(e) => {
                warn!(title = %title, artwork = %kind, error = %e, "Failed to create thumbnail");
                return Ok(SavedArtwork { path: full_path, thumb_path: None, thumb_url: None });
            }
        };

        let thumb_file = kind.thumb_file(ext);
        let thumb_path = directory.join(&thumb_file);
        if let Err(e) = self.fs.write_bytes(&thumb_path, &thumb_bytes).await {
            warn!(title = %title, error = %e, "Failed to write thumbnail");
            return Ok(SavedArtwork { path: full_path, thumb_path: None, thumb_url: None });
        }

        let dir_name = dir_name_of(directory);
        let thumb_url = self
            .thumbnails
            .store(media, &dir_name, kind, &thumb_file, &thumb_bytes)
            .await;

        info!(title = %title, artwork = %kind, "Artwork and thumbnail saved");
        Ok(SavedArtwork {
            path: full_path,
            thumb_path: Some(thumb_path),
            thumb_url,
        })
    }
}

/// Final path component as a display string
pub fn dir_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}
