//! Scan cache store
//!
//! One cache document per (media category, artwork kind), plus a checkpoint
//! document per key for resumable scans and a single unavailability document
//! keyed by directory name.
//!
//! The three caches of a media category are projections of the same
//! directory set. Every entry carries the presence and availability flags of
//! all three kinds, and writes that change a flag are mirrored into the
//! sibling caches so the projections never drift.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::artwork::{artwork_url, dir_name_of, ArtworkKind, MediaCategory};
use super::documents::{
    read_document, remove_document, write_document, FileLocks, StoreError, DOCUMENT_VERSION,
};
use super::scanner::{ArtworkState, ScanEntry};
use super::thumbnails::ThumbnailCache;

/// Persisted result of a full scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanCacheDocument {
    pub version: u32,
    pub media: MediaCategory,
    pub artwork: ArtworkKind,
    pub entries: Vec<ScanEntry>,
    pub total: usize,
    pub generated_at: DateTime<Local>,
}

/// Partial scan state for resuming an interrupted scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanCheckpoint {
    pub version: u32,
    pub media: MediaCategory,
    pub artwork: ArtworkKind,
    pub entries: Vec<ScanEntry>,
    pub visited: BTreeSet<String>,
    pub updated_at: DateTime<Local>,
}

/// Directory name -> artwork kind -> provider has none
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailabilityDocument {
    pub version: u32,
    #[serde(default)]
    pub directories: BTreeMap<String, BTreeMap<ArtworkKind, bool>>,
}

impl UnavailabilityDocument {
    pub fn is_unavailable(&self, dir_name: &str, kind: ArtworkKind) -> bool {
        self.directories
            .get(dir_name)
            .and_then(|kinds| kinds.get(&kind))
            .copied()
            .unwrap_or(false)
    }

    /// Copy the recorded flags into a freshly scanned entry
    pub fn apply(&self, entry: &mut ScanEntry) {
        if let Some(kinds) = self.directories.get(&entry.title) {
            for (kind, flag) in kinds {
                entry.artwork_mut(*kind).unavailable = *flag;
            }
        }
    }
}

/// Summary counts for a cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub total: usize,
    pub with_artwork: usize,
    pub missing_artwork: usize,
}

impl ScanStats {
    pub fn from_entries(entries: &[ScanEntry], kind: ArtworkKind) -> Self {
        let with_artwork = entries.iter().filter(|e| e.has(kind)).count();
        Self {
            total: entries.len(),
            with_artwork,
            missing_artwork: entries.len() - with_artwork,
        }
    }
}

/// File-backed store for scan caches, checkpoints and unavailability records
#[derive(Debug)]
pub struct ScanCacheStore {
    dir: PathBuf,
    unavailable_path: PathBuf,
    thumbnails: ThumbnailCache,
    locks: FileLocks,
}

impl ScanCacheStore {
    pub fn new(data_path: &Path, thumbnails: ThumbnailCache) -> Self {
        Self {
            dir: data_path.join("scan_cache"),
            unavailable_path: data_path.join("artwork_unavailable.json"),
            thumbnails,
            locks: FileLocks::new(),
        }
    }

    pub fn cache_path(&self, media: MediaCategory, kind: ArtworkKind) -> PathBuf {
        self.dir.join(format!("{}_{}.json", media, kind))
    }

    pub fn checkpoint_path(&self, media: MediaCategory, kind: ArtworkKind) -> PathBuf {
        self.dir.join(format!("{}_{}.checkpoint.json", media, kind))
    }

    async fn read_cache(&self, path: &Path) -> Option<ScanCacheDocument> {
        match read_document::<ScanCacheDocument>(path).await {
            Ok(doc) => doc,
            Err(e) => {
                warn!(error = %e, "Unreadable scan cache, treating as absent");
                None
            }
        }
    }

    /// Load a cache. A cache with no entries counts as absent.
    pub async fn load(&self, media: MediaCategory, kind: ArtworkKind) -> Option<ScanCacheDocument> {
        let doc = self.read_cache(&self.cache_path(media, kind)).await?;
        if doc.entries.is_empty() && doc.total == 0 {
            debug!(media = %media, artwork = %kind, "Ignoring empty scan cache");
            return None;
        }
        Some(doc)
    }

    pub async fn save(
        &self,
        media: MediaCategory,
        kind: ArtworkKind,
        entries: Vec<ScanEntry>,
        total: usize,
    ) -> Result<(), StoreError> {
        let path = self.cache_path(media, kind);
        let _guard = self.locks.lock(&path).await;
        let doc = ScanCacheDocument {
            version: DOCUMENT_VERSION,
            media,
            artwork: kind,
            entries,
            total,
            generated_at: Local::now(),
        };
        write_document(&path, &doc).await?;
        info!(media = %media, artwork = %kind, total = total, "Saved scan cache");
        Ok(())
    }

    pub async fn delete(&self, media: MediaCategory, kind: ArtworkKind) -> Result<(), StoreError> {
        let path = self.cache_path(media, kind);
        let _guard = self.locks.lock(&path).await;
        remove_document(&path).await
    }

    /// Build the `kind` cache from a populated sibling cache without touching
    /// the mount. Thumbnails come from the local mirror only.
    pub async fn derive_from(
        &self,
        media: MediaCategory,
        kind: ArtworkKind,
    ) -> Option<ScanCacheDocument> {
        for sibling in kind.siblings() {
            let Some(source) = self.load(media, sibling).await else {
                continue;
            };
            if source.entries.is_empty() {
                continue;
            }

            let mut entries = Vec::with_capacity(source.entries.len());
            for src in &source.entries {
                let mut entry = ScanEntry {
                    title: src.title.clone(),
                    path: src.path.clone(),
                    clean_id: src.clean_id.clone(),
                    tmdb_id: src.tmdb_id,
                    poster: src.poster.flags_only(),
                    logo: src.logo.flags_only(),
                    backdrop: src.backdrop.flags_only(),
                };
                if entry.has(kind) {
                    let thumb = self.thumbnails.cached_url(media, &entry.title, kind).await;
                    let state = entry.artwork_mut(kind);
                    state.url = Some(artwork_url(
                        &src.title,
                        &kind.artwork_file(kind.primary_extension()),
                    ));
                    state.thumb = thumb;
                }
                entries.push(entry);
            }

            info!(
                media = %media,
                artwork = %kind,
                source = %sibling,
                entries = entries.len(),
                "Derived scan cache from sibling"
            );
            return Some(ScanCacheDocument {
                version: DOCUMENT_VERSION,
                media,
                artwork: kind,
                entries,
                total: source.total,
                generated_at: Local::now(),
            });
        }
        None
    }

    /// Apply `f` to the entry matching `directory` in the `kind` cache, under
    /// the file lock. Returns whether an entry was changed.
    async fn modify_entry<F>(
        &self,
        media: MediaCategory,
        kind: ArtworkKind,
        directory: &Path,
        f: F,
    ) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut ScanEntry),
    {
        let path = self.cache_path(media, kind);
        let _guard = self.locks.lock(&path).await;
        let Some(mut doc) = self.read_cache(&path).await else {
            return Ok(false);
        };
        let Some(entry) = doc.entries.iter_mut().find(|e| e.matches_directory(directory)) else {
            return Ok(false);
        };
        f(entry);
        write_document(&path, &doc).await?;
        Ok(true)
    }

    /// Record a freshly downloaded `kind` artwork for `directory`.
    ///
    /// The target cache gets the flag, URL and thumbnail; sibling caches only
    /// get the presence flag.
    pub async fn update_single_entry(
        &self,
        media: MediaCategory,
        kind: ArtworkKind,
        directory: &Path,
        thumb_url: Option<String>,
    ) -> Result<bool, StoreError> {
        let dir_name = dir_name_of(directory);
        let url = artwork_url(&dir_name, &kind.artwork_file(kind.primary_extension()));
        let today = Local::now().format("%Y-%m-%d").to_string();

        let updated = self
            .modify_entry(media, kind, directory, |entry| {
                let state = entry.artwork_mut(kind);
                state.present = true;
                state.url = Some(url);
                state.thumb = thumb_url;
                state.last_modified = Some(today);
            })
            .await?;

        for sibling in kind.siblings() {
            self.modify_entry(media, sibling, directory, |entry| {
                entry.artwork_mut(kind).present = true;
            })
            .await?;
        }

        if updated {
            debug!(media = %media, artwork = %kind, directory = %dir_name, "Updated cache entry");
        } else {
            debug!(media = %media, artwork = %kind, directory = %dir_name, "No cache entry to update");
        }
        Ok(updated)
    }

    /// Write the `kind` unavailability flag of `dir_name` into every cache.
    pub async fn propagate_unavailability(
        &self,
        dir_name: &str,
        kind: ArtworkKind,
        unavailable: bool,
    ) -> Result<usize, StoreError> {
        let mut touched = 0;
        for media in MediaCategory::ALL {
            for cache_kind in ArtworkKind::ALL {
                let path = self.cache_path(media, cache_kind);
                let _guard = self.locks.lock(&path).await;
                let Some(mut doc) = self.read_cache(&path).await else {
                    continue;
                };
                let mut changed = false;
                for entry in doc.entries.iter_mut().filter(|e| e.title == dir_name) {
                    let state: &mut ArtworkState = entry.artwork_mut(kind);
                    if state.unavailable != unavailable {
                        state.unavailable = unavailable;
                        changed = true;
                    }
                }
                if changed {
                    write_document(&path, &doc).await?;
                    touched += 1;
                }
            }
        }
        debug!(directory = %dir_name, artwork = %kind, unavailable, caches = touched, "Propagated unavailability");
        Ok(touched)
    }

    /// Fill in thumbnail URLs by title, keeping existing ones.
    pub async fn patch_thumbnails(
        &self,
        media: MediaCategory,
        kind: ArtworkKind,
        thumbs: &HashMap<String, String>,
    ) -> Result<usize, StoreError> {
        if thumbs.is_empty() {
            return Ok(0);
        }
        let path = self.cache_path(media, kind);
        let _guard = self.locks.lock(&path).await;
        let Some(mut doc) = self.read_cache(&path).await else {
            return Ok(0);
        };

        let mut patched = 0;
        for entry in &mut doc.entries {
            if let Some(url) = thumbs.get(&entry.title) {
                let state = entry.artwork_mut(kind);
                if state.thumb.is_none() {
                    state.thumb = Some(url.clone());
                    patched += 1;
                }
            }
        }
        if patched > 0 {
            write_document(&path, &doc).await?;
        }
        Ok(patched)
    }

    pub async fn load_checkpoint(
        &self,
        media: MediaCategory,
        kind: ArtworkKind,
    ) -> Option<ScanCheckpoint> {
        match read_document::<ScanCheckpoint>(&self.checkpoint_path(media, kind)).await {
            Ok(cp) => cp,
            Err(e) => {
                warn!(error = %e, "Unreadable scan checkpoint, starting over");
                None
            }
        }
    }

    pub async fn save_checkpoint(
        &self,
        media: MediaCategory,
        kind: ArtworkKind,
        entries: &[ScanEntry],
        visited: &BTreeSet<String>,
    ) -> Result<(), StoreError> {
        let path = self.checkpoint_path(media, kind);
        let _guard = self.locks.lock(&path).await;
        let checkpoint = ScanCheckpoint {
            version: DOCUMENT_VERSION,
            media,
            artwork: kind,
            entries: entries.to_vec(),
            visited: visited.clone(),
            updated_at: Local::now(),
        };
        write_document(&path, &checkpoint).await
    }

    pub async fn delete_checkpoint(
        &self,
        media: MediaCategory,
        kind: ArtworkKind,
    ) -> Result<(), StoreError> {
        let path = self.checkpoint_path(media, kind);
        let _guard = self.locks.lock(&path).await;
        remove_document(&path).await
    }

    pub async fn unavailability(&self) -> UnavailabilityDocument {
        match read_document::<UnavailabilityDocument>(&self.unavailable_path).await {
            Ok(Some(doc)) => doc,
            Ok(None) => UnavailabilityDocument {
                version: DOCUMENT_VERSION,
                ..Default::default()
            },
            Err(e) => {
                warn!(error = %e, "Unreadable unavailability records, starting empty");
                UnavailabilityDocument {
                    version: DOCUMENT_VERSION,
                    ..Default::default()
                }
            }
        }
    }

    /// Record the flag and mirror it into every cache.
    pub async fn set_unavailable(
        &self,
        dir_name: &str,
        kind: ArtworkKind,
        unavailable: bool,
    ) -> Result<(), StoreError> {
        {
            let _guard = self.locks.lock(&self.unavailable_path).await;
            let mut doc = self.unavailability().await;
            if unavailable {
                doc.directories
                    .entry(dir_name.to_string())
                    .or_default()
                    .insert(kind, true);
            } else if let Some(kinds) = doc.directories.get_mut(dir_name) {
                kinds.remove(&kind);
                if kinds.is_empty() {
                    doc.directories.remove(dir_name);
                }
            }
            write_document(&self.unavailable_path, &doc).await?;
        }
        self.propagate_unavailability(dir_name, kind, unavailable).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    fn store(data: &Path) -> ScanCacheStore {
        ScanCacheStore::new(data, ThumbnailCache::new(data.join("thumbnails")))
    }

    fn entry(title: &str, poster: bool, logo: bool, backdrop: bool) -> ScanEntry {
        let mut e = ScanEntry::new(title, format!("/movies/{}", title));
        e.poster.present = poster;
        e.logo.present = logo;
        e.backdrop.present = backdrop;
        e
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let data = tempfile::tempdir().unwrap();
        let store = store(data.path());
        let mut alien = entry("Alien", true, false, true);
        alien.poster.url = Some("/artwork/Alien/poster.jpg".into());
        let entries = vec![alien, entry("Brazil", false, false, false)];

        store.save(MediaCategory::Movie, ArtworkKind::Poster, entries.clone(), 2).await.unwrap();

        let doc = store.load(MediaCategory::Movie, ArtworkKind::Poster).await.unwrap();
        assert_eq!(doc.entries, entries);
        assert_eq!(doc.total, 2);
        assert_eq!(doc.version, DOCUMENT_VERSION);
        assert!(store.load(MediaCategory::Tv, ArtworkKind::Poster).await.is_none());
    }

    #[tokio::test]
    async fn test_empty_cache_counts_as_absent() {
        let data = tempfile::tempdir().unwrap();
        let store = store(data.path());

        store.save(MediaCategory::Movie, ArtworkKind::Logo, Vec::new(), 0).await.unwrap();
        assert!(store.cache_path(MediaCategory::Movie, ArtworkKind::Logo).exists());
        assert!(store.load(MediaCategory::Movie, ArtworkKind::Logo).await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_cache_counts_as_absent() {
        let data = tempfile::tempdir().unwrap();
        let store = store(data.path());
        let path = store.cache_path(MediaCategory::Movie, ArtworkKind::Poster);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"[1, 2").unwrap();

        assert!(store.load(MediaCategory::Movie, ArtworkKind::Poster).await.is_none());
    }

    #[tokio::test]
    async fn test_derive_backdrop_from_poster() {
        let data = tempfile::tempdir().unwrap();
        let store = store(data.path());
        let mut alien = entry("Alien", true, true, true);
        alien.poster.thumb = Some("/thumbnails/movie/Alien/poster-thumb.jpg".into());
        alien.poster.dimensions = Some("1000x1500".into());
        alien.logo.unavailable = true;
        let brazil = entry("Brazil", true, false, false);
        store
            .save(MediaCategory::Movie, ArtworkKind::Poster, vec![alien.clone(), brazil.clone()], 2)
            .await
            .unwrap();

        let mirrored = data.path().join("thumbnails/movie/Alien");
        std::fs::create_dir_all(&mirrored).unwrap();
        std::fs::write(mirrored.join("backdrop-thumb.jpg"), b"jpg").unwrap();

        assert!(store.load(MediaCategory::Movie, ArtworkKind::Backdrop).await.is_none());
        let derived = store.derive_from(MediaCategory::Movie, ArtworkKind::Backdrop).await.unwrap();

        assert_eq!(derived.artwork, ArtworkKind::Backdrop);
        assert_eq!(derived.total, 2);
        for (d, s) in derived.entries.iter().zip([&alien, &brazil]) {
            assert_eq!(d.title, s.title);
            assert_eq!(d.path, s.path);
            assert_eq!(d.clean_id, s.clean_id);
            for kind in ArtworkKind::ALL {
                assert_eq!(d.has(kind), s.has(kind));
                assert_eq!(d.artwork(kind).unavailable, s.artwork(kind).unavailable);
            }
        }

        let alien_backdrop = &derived.entries[0].backdrop;
        assert_eq!(alien_backdrop.url.as_deref(), Some("/artwork/Alien/backdrop.jpg"));
        assert_eq!(
            alien_backdrop.thumb.as_deref(),
            Some("/thumbnails/movie/Alien/backdrop-thumb.jpg")
        );
        assert_eq!(derived.entries[0].poster.thumb, None);
        assert_eq!(derived.entries[1].backdrop, ArtworkState::default());
    }

    #[tokio::test]
    async fn test_derive_needs_a_sibling() {
        let data = tempfile::tempdir().unwrap();
        let store = store(data.path());
        store.save(MediaCategory::Tv, ArtworkKind::Poster, vec![entry("Lost", true, false, false)], 1).await.unwrap();

        assert!(store.derive_from(MediaCategory::Movie, ArtworkKind::Logo).await.is_none());
        assert!(store.derive_from(MediaCategory::Tv, ArtworkKind::Logo).await.is_some());
    }

    #[tokio::test]
    async fn test_update_single_entry_touches_siblings_flag_only() {
        let data = tempfile::tempdir().unwrap();
        let store = store(data.path());
        for kind in ArtworkKind::ALL {
            store
                .save(MediaCategory::Movie, kind, vec![entry("Alien", false, false, false), entry("Brazil", false, false, false)], 2)
                .await
                .unwrap();
        }

        let thumb = "/thumbnails/movie/Alien/logo-thumb.png".to_string();
        let updated = store
            .update_single_entry(MediaCategory::Movie, ArtworkKind::Logo, Path::new("/movies/Alien"), Some(thumb.clone()))
            .await
            .unwrap();
        assert!(updated);

        for kind in ArtworkKind::ALL {
            let doc = store.load(MediaCategory::Movie, kind).await.unwrap();
            let alien = &doc.entries[0];
            assert!(alien.logo.present, "{} cache missing logo flag", kind);
            assert!(!doc.entries[1].logo.present);
            if kind == ArtworkKind::Logo {
                assert_eq!(alien.logo.thumb.as_deref(), Some(thumb.as_str()));
                assert_eq!(alien.logo.url.as_deref(), Some("/artwork/Alien/logo.png"));
            } else {
                assert_eq!(alien.logo.thumb, None);
                assert_eq!(alien.logo.url, None);
            }
        }
    }

    #[tokio::test]
    async fn test_update_single_entry_without_target_cache_still_updates_siblings() {
        let data = tempfile::tempdir().unwrap();
        let store = store(data.path());
        store.save(MediaCategory::Movie, ArtworkKind::Poster, vec![entry("Alien", false, false, false)], 1).await.unwrap();

        let updated = store
            .update_single_entry(MediaCategory::Movie, ArtworkKind::Backdrop, Path::new("/movies/Alien"), None)
            .await
            .unwrap();

        assert!(!updated);
        let poster = store.load(MediaCategory::Movie, ArtworkKind::Poster).await.unwrap();
        assert!(poster.entries[0].backdrop.present);
    }

    #[tokio::test]
    async fn test_set_unavailable_propagates_to_every_cache() {
        let data = tempfile::tempdir().unwrap();
        let store = store(data.path());
        store.save(MediaCategory::Movie, ArtworkKind::Poster, vec![entry("Alien", true, false, false)], 1).await.unwrap();
        store.save(MediaCategory::Movie, ArtworkKind::Backdrop, vec![entry("Alien", true, false, false)], 1).await.unwrap();

        store.set_unavailable("Alien", ArtworkKind::Logo, true).await.unwrap();
        assert!(store.unavailability().await.is_unavailable("Alien", ArtworkKind::Logo));
        for kind in [ArtworkKind::Poster, ArtworkKind::Backdrop] {
            let doc = store.load(MediaCategory::Movie, kind).await.unwrap();
            assert!(doc.entries[0].logo.unavailable);
        }

        store.set_unavailable("Alien", ArtworkKind::Logo, false).await.unwrap();
        assert_eq!(store.unavailability().await.directories, BTreeMap::new());
        let doc = store.load(MediaCategory::Movie, ArtworkKind::Poster).await.unwrap();
        assert!(!doc.entries[0].logo.unavailable);
    }

    #[tokio::test]
    async fn test_checkpoint_lifecycle() {
        let data = tempfile::tempdir().unwrap();
        let store = store(data.path());
        let visited: BTreeSet<String> = ["Alien".to_string()].into();

        store
            .save_checkpoint(MediaCategory::Tv, ArtworkKind::Poster, &[entry("Alien", true, false, false)], &visited)
            .await
            .unwrap();
        let cp = store.load_checkpoint(MediaCategory::Tv, ArtworkKind::Poster).await.unwrap();
        assert_eq!(cp.visited, visited);
        assert_eq!(cp.entries.len(), 1);

        store.delete_checkpoint(MediaCategory::Tv, ArtworkKind::Poster).await.unwrap();
        assert_matches!(store.load_checkpoint(MediaCategory::Tv, ArtworkKind::Poster).await, None);
    }

    #[tokio::test]
    async fn test_patch_thumbnails_keeps_existing() {
        let data = tempfile::tempdir().unwrap();
        let store = store(data.path());
        let mut alien = entry("Alien", true, false, false);
        alien.poster.thumb = Some("/old".into());
        store
            .save(MediaCategory::Movie, ArtworkKind::Poster, vec![alien, entry("Brazil", true, false, false)], 2)
            .await
            .unwrap();

        let thumbs = HashMap::from([
            ("Alien".to_string(), "/new-alien".to_string()),
            ("Brazil".to_string(), "/new-brazil".to_string()),
        ]);
        let patched = store.patch_thumbnails(MediaCategory::Movie, ArtworkKind::Poster, &thumbs).await.unwrap();

        assert_eq!(patched, 1);
        let doc = store.load(MediaCategory::Movie, ArtworkKind::Poster).await.unwrap();
        assert_eq!(doc.entries[0].poster.thumb.as_deref(), Some("/old"));
        assert_eq!(doc.entries[1].poster.thumb.as_deref(), Some("/new-brazil"));
    }

    #[test]
    fn test_stats() {
        let entries = vec![entry("A", true, false, false), entry("B", false, false, false)];
        assert_eq!(
            ScanStats::from_entries(&entries, ArtworkKind::Poster),
            ScanStats { total: 2, with_artwork: 1, missing_artwork: 1 }
        );
    }
}
