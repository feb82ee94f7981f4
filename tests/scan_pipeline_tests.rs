//! Integration tests for the scan pipeline
//!
//! Drives the orchestrator against real temporary directories:
//! - full scans and sorting
//! - checkpoint resumption after a failed scan
//! - the one-scan-per-key guard under concurrent requests

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use mediarr::services::{
    ArtworkKind, DirectoryScanner, FsPolicy, LibraryRoots, MediaCategory, MountHealth, RemoteFs,
    ScanCacheStore, ScanContext, ScanData, ScanEntry, ScanOrchestrator, ScanSettings, ScanStatus,
    ThumbnailBackfill, ThumbnailCache,
};

const MOVIE_POSTER: (MediaCategory, ArtworkKind) = (MediaCategory::Movie, ArtworkKind::Poster);

struct Library {
    _data: TempDir,
    root: TempDir,
    orchestrator: ScanOrchestrator,
}

impl Library {
    fn new(dirs: &[&str]) -> Self {
        Self::with_interval(dirs, 2)
    }

    fn with_interval(dirs: &[&str], checkpoint_interval: usize) -> Self {
        let data = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        for d in dirs {
            std::fs::create_dir(root.path().join(d)).unwrap();
        }

        let health = Arc::new(MountHealth::new());
        let fs = RemoteFs::new(FsPolicy::fast(), health.clone());
        let thumbnails = ThumbnailCache::new(data.path().join("thumbnails"));
        let store = Arc::new(ScanCacheStore::new(data.path(), thumbnails.clone()));
        let settings = ScanSettings {
            checkpoint_interval,
            throttle: Duration::from_millis(1),
            backfill_pacing: Duration::from_millis(1),
        };

        let orchestrator = ScanOrchestrator::new(
            Arc::new(ScanContext::new(health)),
            store.clone(),
            DirectoryScanner::new(fs.clone(), thumbnails.clone()),
            ThumbnailBackfill::new(fs, thumbnails, store, settings.backfill_pacing),
            LibraryRoots { movie: vec![root.path().to_path_buf()], tv: Vec::new() },
            settings,
        );

        Self { _data: data, root, orchestrator }
    }

    fn touch(&self, rel: &str) {
        std::fs::write(self.root.path().join(rel), b"not really a jpeg").unwrap();
    }

    fn store(&self) -> &ScanCacheStore {
        self.orchestrator.store()
    }

    /// Poll until the background scan for `key` leaves the scanning state.
    async fn wait_for_scan(&self, key: (MediaCategory, ArtworkKind)) -> ScanStatus {
        for _ in 0..500 {
            if let Some(progress) = self.orchestrator.context().progress(key)
                && progress.status != ScanStatus::Scanning
            {
                return progress.status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("scan did not finish");
    }
}

fn titles(entries: &[ScanEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.title.as_str()).collect()
}

fn block_cache_path(path: &Path) {
    std::fs::create_dir_all(path.join("blocker")).unwrap();
}

#[tokio::test]
async fn test_full_scan_sorts_ignoring_leading_article() {
    let lib = Library::new(&["The Wire", "Breaking Bad"]);
    lib.touch("Breaking Bad/poster.jpg");

    let total = lib.orchestrator.run_full_scan(MediaCategory::Movie, ArtworkKind::Poster).await.unwrap();
    assert_eq!(total, 2);

    let doc = lib.store().load(MediaCategory::Movie, ArtworkKind::Poster).await.unwrap();
    assert_eq!(titles(&doc.entries), vec!["Breaking Bad", "The Wire"]);
    assert_eq!(
        doc.entries.iter().map(|e| e.poster.present).collect::<Vec<_>>(),
        vec![true, false]
    );
    assert_eq!(doc.entries[0].clean_id, "breaking-bad");
    assert_eq!(doc.entries[0].poster.url.as_deref(), Some("/artwork/Breaking%20Bad/poster.jpg"));
    assert_eq!(doc.total, 2);
}

#[tokio::test]
async fn test_hidden_and_system_directories_are_skipped() {
    let lib = Library::new(&["Alien", ".snapshot", "@eaDir", "#recycle"]);
    lib.touch("stray-file.txt");

    lib.orchestrator.run_full_scan(MediaCategory::Movie, ArtworkKind::Poster).await.unwrap();
    let doc = lib.store().load(MediaCategory::Movie, ArtworkKind::Poster).await.unwrap();
    assert_eq!(titles(&doc.entries), vec!["Alien"]);
}

#[tokio::test]
async fn test_scan_records_sibling_flags() {
    let lib = Library::new(&["Heat"]);
    lib.touch("Heat/logo.png");
    lib.touch("Heat/backdrop.jpg");

    lib.orchestrator.run_full_scan(MediaCategory::Movie, ArtworkKind::Poster).await.unwrap();
    let doc = lib.store().load(MediaCategory::Movie, ArtworkKind::Poster).await.unwrap();
    let heat = &doc.entries[0];

    assert!(!heat.poster.present);
    assert!(heat.logo.present);
    assert!(heat.backdrop.present);
    assert_eq!(heat.logo.url, None);
}

#[tokio::test]
async fn test_resume_skips_checkpointed_directories() {
    let lib = Library::new(&["Alien", "Brazil", "Casablanca", "Dune", "Heat"]);

    // The checkpoint claims Alien has a poster; the disk says otherwise.
    let mut alien = ScanEntry::new("Alien", lib.root.path().join("Alien"));
    alien.poster.present = true;
    let brazil = ScanEntry::new("Brazil", lib.root.path().join("Brazil"));
    let visited: BTreeSet<String> = ["Alien", "Brazil"].iter().map(|s| s.to_string()).collect();
    lib.store()
        .save_checkpoint(MediaCategory::Movie, ArtworkKind::Poster, &[alien, brazil], &visited)
        .await
        .unwrap();

    let total = lib.orchestrator.run_full_scan(MediaCategory::Movie, ArtworkKind::Poster).await.unwrap();
    assert_eq!(total, 5);

    let doc = lib.store().load(MediaCategory::Movie, ArtworkKind::Poster).await.unwrap();
    assert_eq!(titles(&doc.entries), vec!["Alien", "Brazil", "Casablanca", "Dune", "Heat"]);
    assert!(doc.entries[0].poster.present, "checkpointed entry was rescanned");
    assert!(lib.store().load_checkpoint(MediaCategory::Movie, ArtworkKind::Poster).await.is_none());
}

#[tokio::test]
async fn test_failed_scan_checkpoints_then_resumes() {
    let lib = Library::with_interval(&["Alien", "Brazil", "Casablanca"], 1);
    let cache_path = lib.store().cache_path(MediaCategory::Movie, ArtworkKind::Poster);
    block_cache_path(&cache_path);

    let err = lib.orchestrator.run_full_scan(MediaCategory::Movie, ArtworkKind::Poster).await;
    assert!(err.is_err());

    let progress = lib.orchestrator.context().progress(MOVIE_POSTER).unwrap();
    assert_eq!(progress.status, ScanStatus::Error);
    assert!(progress.error.is_some());

    let checkpoint = lib
        .store()
        .load_checkpoint(MediaCategory::Movie, ArtworkKind::Poster)
        .await
        .unwrap();
    assert_eq!(checkpoint.visited.len(), 3);
    assert_eq!(checkpoint.entries.len(), 3);

    // Appears after the interruption; a resumed scan must not revisit Alien.
    lib.touch("Alien/poster.jpg");
    std::fs::remove_dir_all(&cache_path).unwrap();

    let total = lib.orchestrator.run_full_scan(MediaCategory::Movie, ArtworkKind::Poster).await.unwrap();
    assert_eq!(total, 3);

    let doc = lib.store().load(MediaCategory::Movie, ArtworkKind::Poster).await.unwrap();
    assert_eq!(titles(&doc.entries), vec!["Alien", "Brazil", "Casablanca"]);
    assert!(!doc.entries[0].poster.present);
    assert_eq!(
        lib.orchestrator.context().progress(MOVIE_POSTER).unwrap().status,
        ScanStatus::Complete
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_start_one_scan() {
    let lib = Library::new(&["Alien", "Brazil", "Casablanca", "Dune", "Heat", "Ran"]);

    let (a, b) = tokio::join!(
        lib.orchestrator.request(MediaCategory::Movie, ArtworkKind::Poster),
        lib.orchestrator.request(MediaCategory::Movie, ArtworkKind::Poster),
    );
    assert_matches!(a, ScanData::InProgress(_) | ScanData::Present(_));
    assert_matches!(b, ScanData::InProgress(_) | ScanData::Present(_));

    assert_eq!(lib.wait_for_scan(MOVIE_POSTER).await, ScanStatus::Complete);
    assert_eq!(lib.orchestrator.context().scans_started(), 1);

    let data = lib.orchestrator.request(MediaCategory::Movie, ArtworkKind::Poster).await;
    assert_matches!(data, ScanData::Present(doc) if doc.total == 6);
    assert_eq!(lib.orchestrator.context().scans_started(), 1);
}

#[tokio::test]
async fn test_request_during_scan_reports_progress() {
    let lib = Library::new(&["Alien"]);

    let first = lib.orchestrator.request(MediaCategory::Movie, ArtworkKind::Logo).await;
    assert_matches!(first, ScanData::InProgress(p) if p.status == ScanStatus::Scanning);

    lib.wait_for_scan((MediaCategory::Movie, ArtworkKind::Logo)).await;
    let second = lib.orchestrator.request(MediaCategory::Movie, ArtworkKind::Logo).await;
    assert_matches!(second, ScanData::Present(doc) if doc.artwork == ArtworkKind::Logo);
}

#[tokio::test]
async fn test_sibling_caches_are_derived_not_rescanned() {
    let lib = Library::new(&["Alien", "Brazil"]);
    lib.touch("Alien/backdrop.jpg");
    lib.orchestrator.run_full_scan(MediaCategory::Movie, ArtworkKind::Poster).await.unwrap();

    let data = lib.orchestrator.request(MediaCategory::Movie, ArtworkKind::Backdrop).await;
    let ScanData::Present(doc) = data else {
        panic!("expected a derived cache");
    };
    assert_eq!(titles(&doc.entries), vec!["Alien", "Brazil"]);
    assert!(doc.entries[0].backdrop.present);
    assert_eq!(doc.entries[0].backdrop.url.as_deref(), Some("/artwork/Alien/backdrop.jpg"));
    assert_eq!(doc.entries[1].backdrop.url, None);
    assert_eq!(lib.orchestrator.context().scans_started(), 0);
}
