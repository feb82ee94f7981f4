//! Scan orchestration and the concurrency guard
//!
//! Requests never wait for a scan. A missing cache is derived from a sibling
//! when possible, otherwise exactly one background scan is started per
//! (media, artwork) key and callers poll its progress until the cache lands.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::artwork::{ArtworkKind, MediaCategory};
use super::backfill::{PendingThumbnail, ThumbnailBackfill};
use super::filesystem::MountHealth;
use super::scan_cache::{ScanCacheDocument, ScanCacheStore, UnavailabilityDocument};
use super::scanner::{DirectoryScanner, ScanEntry, ScanMode};
use super::text_utils::sort_key;

pub type ScanKey = (MediaCategory, ArtworkKind);

/// Full-scan pacing
#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// Directories scanned between checkpoints
    pub checkpoint_interval: usize,
    /// Pause after each checkpoint to let the mount recover
    pub throttle: Duration,
    /// Pause between thumbnail backfill entries
    pub backfill_pacing: Duration,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            checkpoint_interval: 10,
            throttle: Duration::from_millis(500),
            backfill_pacing: Duration::from_millis(500),
        }
    }
}

/// Root folders per media category, in configured order
#[derive(Debug, Clone, Default)]
pub struct LibraryRoots {
    pub movie: Vec<PathBuf>,
    pub tv: Vec<PathBuf>,
}

impl LibraryRoots {
    pub fn for_media(&self, media: MediaCategory) -> &[PathBuf] {
        match media {
            MediaCategory::Movie => &self.movie,
            MediaCategory::Tv => &self.tv,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Scanning,
    Complete,
    Error,
}

/// In-memory progress of a scan, never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanProgress {
    pub status: ScanStatus,
    pub scanned: usize,
    pub total: usize,
    pub started_at: DateTime<Local>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScanProgress {
    fn started() -> Self {
        Self {
            status: ScanStatus::Scanning,
            scanned: 0,
            total: 0,
            started_at: Local::now(),
            error: None,
        }
    }
}

/// Answer to a data request
#[derive(Debug, Clone)]
pub enum ScanData {
    Present(ScanCacheDocument),
    InProgress(ScanProgress),
}

#[derive(Debug, Default)]
struct GuardState {
    progress: HashMap<ScanKey, ScanProgress>,
    /// Keys whose scan is being started right now
    starting: HashSet<ScanKey>,
    backfill_started: HashSet<ScanKey>,
    scans_started: u64,
}

/// Process-wide scan state: mount health, progress table and the start guard.
///
/// One instance lives from startup to shutdown and is shared by every
/// orchestrator handle.
#[derive(Debug, Default)]
pub struct ScanContext {
    health: Arc<MountHealth>,
    state: Mutex<GuardState>,
}

impl ScanContext {
    pub fn new(health: Arc<MountHealth>) -> Self {
        Self { health, state: Mutex::default() }
    }

    pub fn health(&self) -> &Arc<MountHealth> {
        &self.health
    }

    pub fn progress(&self, key: ScanKey) -> Option<ScanProgress> {
        self.state.lock().progress.get(&key).cloned()
    }

    /// Number of background scans launched since startup
    pub fn scans_started(&self) -> u64 {
        self.state.lock().scans_started
    }

    fn update_progress(&self, key: ScanKey, f: impl FnOnce(&mut ScanProgress)) {
        if let Some(progress) = self.state.lock().progress.get_mut(&key) {
            f(progress);
        }
    }

    /// Claim the right to start a scan for `key`, or report why not.
    fn try_claim(self: &Arc<Self>, key: ScanKey) -> Result<StartClaim, ScanProgress> {
        let mut state = self.state.lock();
        if let Some(progress) = state.progress.get(&key)
            && progress.status == ScanStatus::Scanning
        {
            return Err(progress.clone());
        }
        if !state.starting.insert(key) {
            return Err(ScanProgress::started());
        }
        Ok(StartClaim { context: self.clone(), key })
    }
}

/// Held while deciding whether to start a scan; released on drop.
struct StartClaim {
    context: Arc<ScanContext>,
    key: ScanKey,
}

impl StartClaim {
    /// Record the scan as running. Consumes the claim.
    fn launch(self) -> ScanProgress {
        let progress = ScanProgress::started();
        {
            let mut state = self.context.state.lock();
            state.progress.insert(self.key, progress.clone());
            state.scans_started += 1;
        }
        progress
    }
}

impl Drop for StartClaim {
    fn drop(&mut self) {
        self.context.state.lock().starting.remove(&self.key);
    }
}

/// Outcome of an incremental refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncrementalSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub total: usize,
}

/// Directories scanned so far in one full scan
#[derive(Debug, Default)]
struct ScanRun {
    entries: Vec<ScanEntry>,
    visited: BTreeSet<String>,
}

#[derive(Clone)]
pub struct ScanOrchestrator {
    context: Arc<ScanContext>,
    store: Arc<ScanCacheStore>,
    scanner: DirectoryScanner,
    backfill: ThumbnailBackfill,
    roots: Arc<LibraryRoots>,
    settings: ScanSettings,
}

impl ScanOrchestrator {
    pub fn new(
        context: Arc<ScanContext>,
        store: Arc<ScanCacheStore>,
        scanner: DirectoryScanner,
        backfill: ThumbnailBackfill,
        roots: LibraryRoots,
        settings: ScanSettings,
    ) -> Self {
        Self {
            context,
            store,
            scanner,
            backfill,
            roots: Arc::new(roots),
            settings,
        }
    }

    pub fn context(&self) -> &Arc<ScanContext> {
        &self.context
    }

    pub fn store(&self) -> &Arc<ScanCacheStore> {
        &self.store
    }

    pub fn roots(&self) -> &LibraryRoots {
        &self.roots
    }

    /// Cached data for the key, or the progress of the scan producing it.
    pub async fn request(&self, media: MediaCategory, kind: ArtworkKind) -> ScanData {
        let key = (media, kind);

        if let Some(doc) = self.store.load(media, kind).await {
            self.maybe_backfill(key, &doc.entries);
            return ScanData::Present(doc);
        }

        if let Some(doc) = self.store.derive_from(media, kind).await {
            if let Err(e) = self.store.save(media, kind, doc.entries.clone(), doc.total).await {
                warn!(media = %media, artwork = %kind, error = %e, "Failed to persist derived cache");
            }
            self.maybe_backfill(key, &doc.entries);
            return ScanData::Present(doc);
        }

        let claim = match self.context.try_claim(key) {
            Ok(claim) => claim,
            Err(progress) => return ScanData::InProgress(progress),
        };

        // Another scan may have finished since the first check.
        if let Some(doc) = self.store.load(media, kind).await {
            drop(claim);
            return ScanData::Present(doc);
        }

        let progress = claim.launch();
        info!(media = %media, artwork = %kind, "Starting background scan");

        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.run_full_scan(media, kind).await {
                error!(media = %media, artwork = %kind, error = %e, "Background scan failed");
            }
        });

        ScanData::InProgress(progress)
    }

    /// Walk every root for `kind`, resuming from a checkpoint when present.
    ///
    /// On failure the work done so far is checkpointed and progress is marked
    /// as errored.
    pub async fn run_full_scan(&self, media: MediaCategory, kind: ArtworkKind) -> Result<usize> {
        let key = (media, kind);
        {
            let mut state = self.context.state.lock();
            let progress = state.progress.entry(key).or_insert_with(ScanProgress::started);
            if progress.status != ScanStatus::Scanning {
                *progress = ScanProgress::started();
            }
        }

        let mut run = match self.store.load_checkpoint(media, kind).await {
            Some(cp) => {
                info!(
                    media = %media,
                    artwork = %kind,
                    resumed = cp.entries.len(),
                    "Resuming scan from checkpoint"
                );
                ScanRun { entries: cp.entries, visited: cp.visited }
            }
            None => ScanRun::default(),
        };

        let result = self.scan_all(media, kind, &mut run).await;
        match result {
            Ok(total) => {
                self.context.update_progress(key, |p| {
                    p.status = ScanStatus::Complete;
                    p.scanned = total;
                });
                info!(media = %media, artwork = %kind, total, "Scan complete");
                Ok(total)
            }
            Err(e) => {
                if let Err(cp_err) = self
                    .store
                    .save_checkpoint(media, kind, &run.entries, &run.visited)
                    .await
                {
                    warn!(error = %cp_err, "Failed to checkpoint failed scan");
                }
                let message = format!("{:#}", e);
                self.context.update_progress(key, |p| {
                    p.status = ScanStatus::Error;
                    p.error = Some(message);
                });
                Err(e)
            }
        }
    }

    async fn scan_all(
        &self,
        media: MediaCategory,
        kind: ArtworkKind,
        run: &mut ScanRun,
    ) -> Result<usize> {
        let key = (media, kind);
        self.store
            .save_checkpoint(media, kind, &run.entries, &run.visited)
            .await
            .context("Failed to write initial checkpoint")?;

        let unavailable = self.store.unavailability().await;
        let already = run.visited.len();
        self.context.update_progress(key, |p| p.scanned = already);

        let mut since_checkpoint = 0;
        for root in self.roots.for_media(media) {
            let names = self.scanner.enumerate_root(root).await;
            debug!(root = %root.display(), directories = names.len(), "Enumerated root");
            self.context.update_progress(key, |p| p.total += names.len());

            for name in names {
                if run.visited.contains(&name) {
                    continue;
                }

                let entry = self
                    .scan_one(&name, root.join(&name), media, kind, ScanMode::Lightweight, &unavailable)
                    .await;
                run.entries.push(entry);
                run.visited.insert(name);

                let scanned = run.visited.len();
                self.context.update_progress(key, |p| p.scanned = scanned);

                since_checkpoint += 1;
                if since_checkpoint >= self.settings.checkpoint_interval.max(1) {
                    since_checkpoint = 0;
                    self.store
                        .save_checkpoint(media, kind, &run.entries, &run.visited)
                        .await
                        .context("Failed to write checkpoint")?;
                    tokio::time::sleep(self.settings.throttle).await;
                }
            }
        }

        let mut entries = run.entries.clone();
        entries.sort_by_cached_key(|e| sort_key(&e.title));
        let total = entries.len();
        let pending = PendingThumbnail::collect(&entries, kind);

        self.store
            .save(media, kind, entries, total)
            .await
            .context("Failed to save scan cache")?;
        if let Err(e) = self.store.delete_checkpoint(media, kind).await {
            warn!(error = %e, "Failed to delete checkpoint");
        }

        self.start_backfill(key, pending);
        Ok(total)
    }

    async fn scan_one(
        &self,
        name: &str,
        path: PathBuf,
        media: MediaCategory,
        kind: ArtworkKind,
        mode: ScanMode,
        unavailable: &UnavailabilityDocument,
    ) -> ScanEntry {
        let mut entry = self
            .scanner
            .scan_directory(name, &path, kind, media, None, mode)
            .await;
        unavailable.apply(&mut entry);
        entry
    }

    fn maybe_backfill(&self, key: ScanKey, entries: &[ScanEntry]) {
        let pending = PendingThumbnail::collect(entries, key.1);
        self.start_backfill(key, pending);
    }

    /// Start the backfill for `key` unless one already ran this process.
    fn start_backfill(&self, key: ScanKey, pending: Vec<PendingThumbnail>) {
        if pending.is_empty() {
            return;
        }
        if !self.context.state.lock().backfill_started.insert(key) {
            return;
        }

        let backfill = self.backfill.clone();
        let (media, kind) = key;
        tokio::spawn(async move {
            backfill.run(media, kind, pending).await;
        });
    }

    /// Drop the cache and checkpoint so the next request scans from scratch.
    pub async fn refresh(&self, media: MediaCategory, kind: ArtworkKind) -> Result<()> {
        let key = (media, kind);
        self.store.delete(media, kind).await.context("Failed to delete scan cache")?;
        self.store
            .delete_checkpoint(media, kind)
            .await
            .context("Failed to delete checkpoint")?;

        let mut state = self.context.state.lock();
        state.backfill_started.remove(&key);
        if state
            .progress
            .get(&key)
            .is_some_and(|p| p.status != ScanStatus::Scanning)
        {
            state.progress.remove(&key);
        }
        info!(media = %media, artwork = %kind, "Scan cache cleared");
        Ok(())
    }

    /// Reconcile an existing cache with the current directory set. `None`
    /// when there is no cache to reconcile.
    pub async fn incremental_refresh(
        &self,
        media: MediaCategory,
        kind: ArtworkKind,
    ) -> Result<Option<IncrementalSummary>> {
        let Some(doc) = self.store.load(media, kind).await else {
            return Ok(None);
        };

        let mut current: Vec<(String, PathBuf)> = Vec::new();
        let mut seen = HashSet::new();
        for root in self.roots.for_media(media) {
            for name in self.scanner.enumerate_root(root).await {
                if seen.insert(name.clone()) {
                    current.push((name.clone(), root.join(&name)));
                }
            }
        }

        let cached: HashSet<&str> = doc.entries.iter().map(|e| e.title.as_str()).collect();
        let removed: Vec<String> = doc
            .entries
            .iter()
            .filter(|e| !seen.contains(&e.title))
            .map(|e| e.title.clone())
            .collect();
        let new_dirs: Vec<(String, PathBuf)> = current
            .into_iter()
            .filter(|(name, _)| !cached.contains(name.as_str()))
            .collect();

        let mut entries: Vec<ScanEntry> = doc
            .entries
            .iter()
            .filter(|e| seen.contains(&e.title))
            .cloned()
            .collect();

        let unavailable = self.store.unavailability().await;
        let mut added = Vec::with_capacity(new_dirs.len());
        for (name, path) in new_dirs {
            let entry = self
                .scan_one(&name, path, media, kind, ScanMode::Full, &unavailable)
                .await;
            entries.push(entry);
            added.push(name);
        }

        entries.sort_by_cached_key(|e| sort_key(&e.title));
        let total = entries.len();
        if !added.is_empty() || !removed.is_empty() {
            self.store
                .save(media, kind, entries, total)
                .await
                .context("Failed to save refreshed cache")?;
        }

        info!(
            media = %media,
            artwork = %kind,
            added = added.len(),
            removed = removed.len(),
            "Incremental refresh complete"
        );
        Ok(Some(IncrementalSummary { added, removed, total }))
    }
}
