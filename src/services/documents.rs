//! Versioned JSON documents on local disk
//!
//! Writes serialise to `{file}.tmp` and rename over the target so a crash
//! never leaves a half-written document behind. Read-modify-write spans take
//! the per-file lock from [FileLocks].

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::sync::OwnedMutexGuard;

/// Schema version written into every document
pub const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed document '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("document '{path}' has version {found}, expected {}", DOCUMENT_VERSION)]
    Version { path: PathBuf, found: u64 },
}

/// Read a versioned document. `Ok(None)` when the file does not exist.
pub async fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io { path: path.to_path_buf(), source });
        }
    };

    let value: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|source| StoreError::Json { path: path.to_path_buf(), source })?;

    let found = value.get("version").and_then(|v| v.as_u64()).unwrap_or(0);
    if found != u64::from(DOCUMENT_VERSION) {
        return Err(StoreError::Version { path: path.to_path_buf(), found });
    }

    serde_json::from_value(value)
        .map(Some)
        .map_err(|source| StoreError::Json { path: path.to_path_buf(), source })
}

/// Read a raw JSON value, for documents that predate versioning.
pub async fn read_value(path: &Path) -> Result<Option<serde_json::Value>, StoreError> {
    match fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Json { path: path.to_path_buf(), source }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StoreError::Io { path: path.to_path_buf(), source }),
    }
}

/// Atomically replace `path` with the JSON form of `doc`.
pub async fn write_document<T: Serialize>(path: &Path, doc: &T) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io { path: path.to_path_buf(), source };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let data = serde_json::to_vec_pretty(doc)
        .map_err(|source| StoreError::Json { path: path.to_path_buf(), source })?;

    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    fs::write(&temp, &data).await.map_err(io_err)?;
    if let Err(source) = fs::rename(&temp, path).await {
        let _ = fs::remove_file(&temp).await;
        return Err(io_err(source));
    }
    Ok(())
}

/// Remove a document; a missing file is not an error.
pub async fn remove_document(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StoreError::Io { path: path.to_path_buf(), source }),
    }
}

/// One async mutex per document path
#[derive(Debug, Default)]
pub struct FileLocks {
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the lock for `path` until the guard drops.
    pub async fn lock(&self, path: &Path) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .entry(path.to_path_buf())
            .or_default()
            .clone();
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        version: u32,
        name: String,
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        let doc = Doc { version: DOCUMENT_VERSION, name: "alien".into() };

        write_document(&path, &doc).await.unwrap();
        assert!(!dir.path().join("nested").join("doc.json.tmp").exists());
        assert_eq!(read_document::<Doc>(&path).await.unwrap(), Some(doc));
    }

    #[tokio::test]
    async fn test_missing_document_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(read_document::<Doc>(&dir.path().join("none.json")).await, Ok(None));
        remove_document(&dir.path().join("none.json")).await.unwrap();
    }

    #[tokio::test]
    async fn test_version_mismatch_and_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.json");
        std::fs::write(&old, br#"{"name":"x"}"#).unwrap();
        assert_matches!(read_document::<Doc>(&old).await, Err(StoreError::Version { found: 0, .. }));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, b"{not json").unwrap();
        assert_matches!(read_document::<Doc>(&bad).await, Err(StoreError::Json { .. }));
    }

    #[tokio::test]
    async fn test_file_lock_serialises_holders() {
        let locks = Arc::new(FileLocks::new());
        let path = PathBuf::from("/data/a.json");

        let guard = locks.lock(&path).await;
        let contender = {
            let locks = locks.clone();
            let path = path.clone();
            tokio::spawn(async move {
                let _g = locks.lock(&path).await;
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }
}
