//! Artwork services

pub mod artwork;
pub mod backfill;
pub mod documents;
pub mod filesystem;
pub mod manager;
pub mod mapping;
pub mod matcher;
pub mod notifications;
pub mod orchestrator;
pub mod rate_limiter;
pub mod scan_cache;
pub mod scanner;
pub mod text_utils;
pub mod thumbnails;
pub mod tmdb;

pub use artwork::{ArtworkKind, ArtworkService, DownloadError, MediaCategory, SavedArtwork};
pub use backfill::ThumbnailBackfill;
pub use filesystem::{FsError, FsPolicy, MountHealth, RemoteFs};
pub use manager::{ArtworkManager, ArtworkOptions, DownloadRequest};
pub use mapping::DirectoryMappingStore;
pub use notifications::SlackNotifier;
pub use orchestrator::{
    LibraryRoots, ScanContext, ScanData, ScanOrchestrator, ScanProgress, ScanSettings, ScanStatus,
};
pub use scan_cache::{ScanCacheDocument, ScanCacheStore, ScanStats};
pub use scanner::{DirectoryScanner, ScanEntry};
pub use thumbnails::ThumbnailCache;
pub use tmdb::TmdbClient;
