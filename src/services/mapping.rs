//! Provider identifier to local directory mapping
//!
//! Remembers which directory a TMDB id was resolved to, plus per-artwork
//! "provider has none" flags so the provider is not asked again. Stored as
//! `tmdb_directory_mapping.json` keyed by `"{media}_{id}"`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::artwork::{ArtworkKind, MediaCategory};
use super::documents::{read_value, write_document, FileLocks, StoreError, DOCUMENT_VERSION};
use super::filesystem::RemoteFs;
use super::matcher;
use super::scanner::is_hidden;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    pub last_checked: NaiveDate,
    /// `false` means confirmed absent on the provider; no key means unknown
    #[serde(default)]
    pub artwork_availability: BTreeMap<ArtworkKind, bool>,
}

impl DirectoryMapping {
    fn new(directory: Option<PathBuf>) -> Self {
        Self {
            directory,
            last_checked: Local::now().date_naive(),
            artwork_availability: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingDocument {
    pub version: u32,
    #[serde(default)]
    pub mappings: BTreeMap<String, DirectoryMapping>,
}

/// Value shapes found in files written before the document was versioned
#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyValue {
    Directory(String),
    Mapping {
        #[serde(default)]
        directory: Option<PathBuf>,
        #[serde(default)]
        last_checked: Option<NaiveDate>,
        #[serde(default)]
        artwork_availability: BTreeMap<String, bool>,
    },
}

impl From<LegacyValue> for DirectoryMapping {
    fn from(value: LegacyValue) -> Self {
        match value {
            LegacyValue::Directory(dir) => DirectoryMapping::new(Some(PathBuf::from(dir))),
            LegacyValue::Mapping { directory, last_checked, artwork_availability } => {
                DirectoryMapping {
                    directory,
                    last_checked: last_checked.unwrap_or_else(|| Local::now().date_naive()),
                    artwork_availability: artwork_availability
                        .into_iter()
                        .filter_map(|(k, v)| k.parse::<ArtworkKind>().ok().map(|k| (k, v)))
                        .collect(),
                }
            }
        }
    }
}

fn mapping_key(id: u64, media: MediaCategory) -> String {
    format!("{}_{}", media, id)
}

/// Persistent id to directory associations
#[derive(Debug)]
pub struct DirectoryMappingStore {
    path: PathBuf,
    fs: RemoteFs,
    locks: FileLocks,
}

impl DirectoryMappingStore {
    pub fn new(data_path: &Path, fs: RemoteFs) -> Self {
        Self {
            path: data_path.join("tmdb_directory_mapping.json"),
            fs,
            locks: FileLocks::new(),
        }
    }

    async fn read(&self) -> MappingDocument {
        let empty = || MappingDocument { version: DOCUMENT_VERSION, ..Default::default() };

        let value = match read_value(&self.path).await {
            Ok(Some(v)) => v,
            Ok(None) => return empty(),
            Err(e) => {
                warn!(error = %e, "Unreadable directory mapping, starting empty");
                return empty();
            }
        };

        if let Some(version) = value.get("version").and_then(|v| v.as_u64()) {
            if version != u64::from(DOCUMENT_VERSION) {
                warn!(version, "Unsupported directory mapping version, starting empty");
                return empty();
            }
            return serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(error = %e, "Malformed directory mapping, starting empty");
                empty()
            });
        }

        match serde_json::from_value::<BTreeMap<String, LegacyValue>>(value) {
            Ok(legacy) => {
                info!(entries = legacy.len(), "Migrating legacy directory mapping");
                MappingDocument {
                    version: DOCUMENT_VERSION,
                    mappings: legacy.into_iter().map(|(k, v)| (k, v.into())).collect(),
                }
            }
            Err(e) => {
                warn!(error = %e, "Malformed legacy directory mapping, starting empty");
                empty()
            }
        }
    }

    /// Read-modify-write under the file lock
    async fn update<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut MappingDocument) -> (T, bool),
    {
        let _guard = self.locks.lock(&self.path).await;
        let mut doc = self.read().await;
        let (result, changed) = f(&mut doc);
        if changed {
            write_document(&self.path, &doc).await?;
        }
        Ok(result)
    }

    pub async fn get(&self, id: u64, media: MediaCategory) -> Option<DirectoryMapping> {
        self.read().await.mappings.remove(&mapping_key(id, media))
    }

    /// Remember `directory` for `id`, keeping known availability flags.
    pub async fn save_mapping(
        &self,
        id: u64,
        media: MediaCategory,
        directory: &Path,
    ) -> Result<(), StoreError> {
        let key = mapping_key(id, media);
        self.update(|doc| {
            let mapping = doc
                .mappings
                .entry(key.clone())
                .or_insert_with(|| DirectoryMapping::new(None));
            mapping.directory = Some(directory.to_path_buf());
            mapping.last_checked = Local::now().date_naive();
            ((), true)
        })
        .await?;
        debug!(key = %key, directory = %directory.display(), "Saved directory mapping");
        Ok(())
    }

    /// Stored directory, pruning the mapping if the directory is gone.
    ///
    /// A mapping is only pruned when the mount says the path is missing; an
    /// unreachable mount leaves it in place.
    pub async fn mapped_directory(&self, id: u64, media: MediaCategory) -> Option<PathBuf> {
        let directory = self.get(id, media).await?.directory?;
        match self.fs.dir_status(&directory).await {
            Some(true) => return Some(directory),
            Some(false) => {}
            None => {
                warn!(directory = %directory.display(), "Mount unreachable, keeping mapping");
                return None;
            }
        }

        info!(directory = %directory.display(), "Mapped directory no longer exists, removing mapping");
        let key = mapping_key(id, media);
        if let Err(e) = self
            .update(|doc| ((), doc.mappings.remove(&key).is_some()))
            .await
        {
            warn!(error = %e, "Failed to prune stale mapping");
        }
        None
    }

    /// Resolve the local directory of `id`.
    ///
    /// Tries the caller's hint, then the stored mapping, then a fuzzy match of
    /// `title` across `roots`. Any hit is persisted.
    pub async fn resolve(
        &self,
        id: u64,
        media: MediaCategory,
        title: &str,
        roots: &[PathBuf],
        hint: Option<&Path>,
    ) -> Option<PathBuf> {
        if let Some(hint) = hint {
            if self.fs.is_dir(hint).await {
                self.persist(id, media, hint).await;
                return Some(hint.to_path_buf());
            }
            debug!(hint = %hint.display(), "Directory hint does not exist, ignoring");
        }

        if let Some(dir) = self.mapped_directory(id, media).await {
            return Some(dir);
        }

        let dir = self.locate(title, roots).await?;
        self.persist(id, media, &dir).await;
        Some(dir)
    }

    /// Fuzzy match `title` against the directories of `roots`, without
    /// consulting or writing any mapping.
    pub async fn locate(&self, title: &str, roots: &[PathBuf]) -> Option<PathBuf> {
        let mut candidates: Vec<(String, PathBuf)> = Vec::new();
        for root in roots {
            for entry in self.fs.list_entries(root).await {
                if entry.is_dir && !is_hidden(&entry.name) {
                    candidates.push((entry.name.clone(), root.join(&entry.name)));
                }
            }
        }

        let Some((name, score)) =
            matcher::accepted_match(title, candidates.iter().map(|(n, _)| n.as_str()))
        else {
            info!(title = %title, "No directory matched");
            return None;
        };

        let dir = candidates
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p.clone())?;
        info!(title = %title, directory = %dir.display(), score, "Fuzzy matched directory");
        Some(dir)
    }

    async fn persist(&self, id: u64, media: MediaCategory, dir: &Path) {
        if let Err(e) = self.save_mapping(id, media, dir).await {
            warn!(error = %e, "Failed to persist directory mapping");
        }
    }

    /// `Some(false)` if known absent on the provider, `None` if unknown.
    pub async fn availability(
        &self,
        id: u64,
        media: MediaCategory,
        kind: ArtworkKind,
    ) -> Option<bool> {
        self.get(id, media)
            .await
            .and_then(|m| m.artwork_availability.get(&kind).copied())
    }

    pub async fn set_availability(
        &self,
        id: u64,
        media: MediaCategory,
        kind: ArtworkKind,
        available: bool,
    ) -> Result<(), StoreError> {
        let key = mapping_key(id, media);
        self.update(|doc| {
            let mapping = doc
                .mappings
                .entry(key)
                .or_insert_with(|| DirectoryMapping::new(None));
            mapping.artwork_availability.insert(kind, available);
            mapping.last_checked = Local::now().date_naive();
            ((), true)
        })
        .await
    }

    /// Forget the availability flag so the provider is asked again.
    pub async fn reset_availability(
        &self,
        id: u64,
        media: MediaCategory,
        kind: ArtworkKind,
    ) -> Result<(), StoreError> {
        let key = mapping_key(id, media);
        self.update(|doc| {
            let Some(mapping) = doc.mappings.get_mut(&key) else {
                return ((), false);
            };
            let changed = mapping.artwork_availability.remove(&kind).is_some();
            if changed {
                mapping.last_checked = Local::now().date_naive();
            }
            ((), changed)
        })
        .await
    }

    /// Every id mapped to a directory for `media`, keyed by path
    pub async fn ids_by_directory(&self, media: MediaCategory) -> BTreeMap<PathBuf, u64> {
        let prefix = format!("{}_", media);
        self.read()
            .await
            .mappings
            .into_iter()
            .filter_map(|(k, m)| {
                let id = k.strip_prefix(&prefix)?.parse().ok()?;
                Some((m.directory?, id))
            })
            .collect()
    }
}
