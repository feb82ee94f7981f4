//! Resilient filesystem access for the media roots
//!
//! The media roots usually live on an SMB mount that intermittently answers
//! with "resource temporarily unavailable". Every operation here goes through
//! one retry policy: transient errors are retried with linear backoff and feed
//! a shared [MountHealth] tracker, permanent errors short-circuit immediately.
//!
//! Read-path operations never fail: they degrade to an empty listing, `false`
//! or `None`. Only [RemoteFs::write_bytes] surfaces a terminal error, because
//! artwork downloads need to tell the user the save did not happen.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::backoff::Backoff;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

/// Retry and health-tracking policy for remote mount access
#[derive(Debug, Clone)]
pub struct FsPolicy {
    /// Attempts for directory listings (the scan depends on them)
    pub list_attempts: u32,
    /// Attempts for existence / metadata probes
    pub probe_attempts: u32,
    /// Attempts for reads, writes and removals
    pub io_attempts: u32,
    /// Linear retry step: attempt `n` waits `n * retry_step`
    pub retry_step: Duration,
    /// Consecutive transient errors before a mount-wide backoff is imposed
    pub error_threshold: u32,
    /// Mount-wide backoff grows by this much per consecutive error
    pub backoff_step: Duration,
    /// Upper bound for the mount-wide backoff
    pub backoff_cap: Duration,
}

impl Default for FsPolicy {
    fn default() -> Self {
        Self {
            list_attempts: 8,
            probe_attempts: 3,
            io_attempts: 5,
            retry_step: Duration::from_secs(1),
            error_threshold: 3,
            backoff_step: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

impl FsPolicy {
    /// Policy with every delay shrunk to milliseconds, for tests.
    pub fn fast() -> Self {
        Self {
            retry_step: Duration::from_millis(1),
            backoff_step: Duration::from_millis(5),
            backoff_cap: Duration::from_millis(30),
            ..Self::default()
        }
    }

    /// Mount-wide backoff after `errors` consecutive transient failures
    pub fn backoff_window(&self, errors: u32) -> Duration {
        self.backoff_step.saturating_mul(errors).min(self.backoff_cap)
    }
}

/// Errors surfaced by the write path
#[derive(Debug, Error)]
pub enum FsError {
    #[error("{op} on '{path}' still failing after {attempts} attempts: {source}")]
    Exhausted {
        op: &'static str,
        path: PathBuf,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error("{op} on '{path}' failed: {source}")]
    Permanent {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Whether an I/O error is worth retrying on a flaky network mount.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ResourceBusy
    )
}

/// Linear backoff: the `n`th retry waits `n * step`, up to `max_attempts` total tries.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    step: Duration,
    max_attempts: u32,
    failures: u32,
}

impl LinearBackoff {
    pub fn new(step: Duration, max_attempts: u32) -> Self {
        Self {
            step,
            max_attempts: max_attempts.max(1),
            failures: 0,
        }
    }
}

impl Backoff for LinearBackoff {
    fn reset(&mut self) {
        self.failures = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.max_attempts {
            return None;
        }
        Some(self.step.saturating_mul(self.failures))
    }
}

#[derive(Debug, Default)]
struct HealthState {
    consecutive_errors: u32,
    backoff_until: Option<Instant>,
}

/// Mount health shared by every [RemoteFs] handle.
///
/// Owned by the application context rather than held in a global so tests
/// can run isolated mounts side by side.
#[derive(Debug, Default)]
pub struct MountHealth {
    state: Mutex<HealthState>,
}

impl MountHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.state.lock().consecutive_errors
    }

    /// Time left before the mount may be touched again
    pub fn backoff_remaining(&self) -> Option<Duration> {
        let state = self.state.lock();
        state
            .backoff_until
            .and_then(|until| until.checked_duration_since(Instant::now()))
            .filter(|d| !d.is_zero())
    }

    fn record_success(&self) {
        let mut state = self.state.lock();
        state.consecutive_errors = 0;
    }

    fn record_transient(&self, policy: &FsPolicy) {
        let mut state = self.state.lock();
        state.consecutive_errors += 1;
        if state.consecutive_errors >= policy.error_threshold {
            let window = policy.backoff_window(state.consecutive_errors);
            state.backoff_until = Some(Instant::now() + window);
            warn!(
                consecutive_errors = state.consecutive_errors,
                backoff_ms = window.as_millis() as u64,
                "Remote mount unhealthy, backing off"
            );
        }
    }
}

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub is_dir: bool,
}

/// Retrying accessor for the (possibly remote) media roots
#[derive(Debug, Clone)]
pub struct RemoteFs {
    policy: FsPolicy,
    health: Arc<MountHealth>,
}

impl RemoteFs {
    pub fn new(policy: FsPolicy, health: Arc<MountHealth>) -> Self {
        Self { policy, health }
    }

    pub fn health(&self) -> &Arc<MountHealth> {
        &self.health
    }

    /// Sleep until the mount-wide backoff deadline (if any) has passed
    async fn wait_for_mount(&self) {
        if let Some(remaining) = self.health.backoff_remaining() {
            debug!(wait_ms = remaining.as_millis() as u64, "Waiting for remote mount backoff");
            tokio::time::sleep(remaining).await;
        }
    }

    /// Run `op` under the retry policy.
    async fn with_retry<T, F, Fut>(
        &self,
        op: &'static str,
        path: &Path,
        attempts: u32,
        f: F,
    ) -> Result<T, FsError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = io::Result<T>>,
    {
        let mut backoff = LinearBackoff::new(self.policy.retry_step, attempts);
        let mut tries = 0;

        loop {
            self.wait_for_mount().await;
            tries += 1;

            match f().await {
                Ok(value) => {
                    self.health.record_success();
                    return Ok(value);
                }
                Err(e) if is_transient(&e) => {
                    self.health.record_transient(&self.policy);
                    match backoff.next_backoff() {
                        Some(delay) => {
                            debug!(
                                op = op,
                                path = %path.display(),
                                attempt = tries,
                                retry_in_ms = delay.as_millis() as u64,
                                error = %e,
                                "Transient filesystem error, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            return Err(FsError::Exhausted {
                                op,
                                path: path.to_path_buf(),
                                attempts: tries,
                                source: e,
                            });
                        }
                    }
                }
                Err(e) => {
                    return Err(FsError::Permanent {
                        op,
                        path: path.to_path_buf(),
                        source: e,
                    });
                }
            }
        }
    }

    /// Names in a directory. Empty on any failure.
    pub async fn list(&self, path: &Path) -> Vec<String> {
        match self
            .with_retry("list", path, self.policy.list_attempts, || read_dir_names(path))
            .await
        {
            Ok(names) => names,
            Err(e) => {
                log_degraded(&e);
                Vec::new()
            }
        }
    }

    /// Entries of a directory with their kind. Empty on any failure.
    pub async fn list_entries(&self, path: &Path) -> Vec<DirEntryInfo> {
        match self
            .with_retry("list", path, self.policy.list_attempts, || read_dir_entries(path))
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                log_degraded(&e);
                Vec::new()
            }
        }
    }

    pub async fn exists(&self, path: &Path) -> bool {
        self.with_retry("exists", path, self.policy.probe_attempts, || fs::try_exists(path))
            .await
            .unwrap_or(false)
    }

    pub async fn is_dir(&self, path: &Path) -> bool {
        self.dir_status(path).await.unwrap_or(false)
    }

    /// `Some(true)` for a directory, `Some(false)` when the path is definitely
    /// not one, `None` when the mount could not say.
    pub async fn dir_status(&self, path: &Path) -> Option<bool> {
        let result = self
            .with_retry("metadata", path, self.policy.probe_attempts, || fs::metadata(path))
            .await
            .map(|m| m.is_dir());
        dir_verdict(result)
    }

    /// Last-modified time of a file, `None` on any failure.
    pub async fn modified(&self, path: &Path) -> Option<DateTime<Local>> {
        let meta = self
            .with_retry("metadata", path, self.policy.probe_attempts, || fs::metadata(path))
            .await
            .ok()?;
        meta.modified().ok().map(DateTime::<Local>::from)
    }

    /// Read a whole file, `None` on any failure.
    pub async fn read_bytes(&self, path: &Path) -> Option<Vec<u8>> {
        match self
            .with_retry("read", path, self.policy.io_attempts, || fs::read(path))
            .await
        {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                log_degraded(&e);
                None
            }
        }
    }

    /// Write a whole file, surfacing the failure once retries are exhausted.
    pub async fn write_bytes(&self, path: &Path, data: &[u8]) -> Result<(), FsError> {
        self.with_retry("write", path, self.policy.io_attempts, || fs::write(path, data))
            .await
    }

    /// Remove a file. A missing file counts as removed.
    pub async fn remove_file(&self, path: &Path) -> bool {
        match self
            .with_retry("remove", path, self.policy.io_attempts, || fs::remove_file(path))
            .await
        {
            Ok(()) => true,
            Err(FsError::Permanent { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                true
            }
            Err(e) => {
                log_degraded(&e);
                false
            }
        }
    }

    /// Copy a (remote) file to a local destination, creating parent
    /// directories. Never fails; returns whether the copy landed.
    pub async fn copy_to_local(&self, src: &Path, dest: &Path) -> bool {
        let Some(bytes) = self.read_bytes(src).await else {
            return false;
        };

        if let Some(parent) = dest.parent()
            && let Err(e) = fs::create_dir_all(parent).await
        {
            warn!(path = %parent.display(), error = %e, "Failed to create local cache directory");
            return false;
        }

        match fs::write(dest, &bytes).await {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %dest.display(), error = %e, "Failed to write local copy");
                false
            }
        }
    }
}

fn dir_verdict(result: Result<bool, FsError>) -> Option<bool> {
    match result {
        Ok(is_dir) => Some(is_dir),
        Err(FsError::Permanent { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            Some(false)
        }
        Err(e) => {
            log_degraded(&e);
            None
        }
    }
}

fn log_degraded(err: &FsError) {
    match err {
        FsError::Permanent { source, .. } if source.kind() == io::ErrorKind::NotFound => {
            debug!(error = %err, "Filesystem path missing")
        }
        _ => warn!(error = %err, "Filesystem operation degraded to empty result"),
    }
}

async fn read_dir_names(path: &Path) -> io::Result<Vec<String>> {
    let mut dir = fs::read_dir(path).await?;
    let mut names = Vec::new();
    while let Some(entry) = dir.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    Ok(names)
}

async fn read_dir_entries(path: &Path) -> io::Result<Vec<DirEntryInfo>> {
    let mut dir = fs::read_dir(path).await?;
    let mut entries = Vec::new();
    while let Some(entry) = dir.next_entry().await? {
        let file_type = entry.file_type().await?;
        let is_dir = if file_type.is_symlink() {
            fs::metadata(entry.path())
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false)
        } else {
            file_type.is_dir()
        };
        entries.push(DirEntryInfo {
            name: entry.file_name().to_string_lossy().to_string(),
            is_dir,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> RemoteFs {
        RemoteFs::new(FsPolicy::fast(), Arc::new(MountHealth::new()))
    }

    #[test]
    fn test_linear_backoff_sequence() {
        let mut backoff = LinearBackoff::new(Duration::from_secs(1), 4);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(3)));
        assert_eq!(backoff.next_backoff(), None);

        backoff.reset();
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_backoff_window_is_capped() {
        let policy = FsPolicy::default();
        assert_eq!(policy.backoff_window(3), Duration::from_secs(15));
        assert_eq!(policy.backoff_window(6), Duration::from_secs(30));
        assert_eq!(policy.backoff_window(40), Duration::from_secs(30));
    }

    #[test]
    fn test_is_transient() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::NotFound)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[test]
    fn test_health_backoff_after_threshold() {
        let policy = FsPolicy::fast();
        let health = MountHealth::new();

        health.record_transient(&policy);
        health.record_transient(&policy);
        assert!(health.backoff_remaining().is_none());

        health.record_transient(&policy);
        assert_eq!(health.consecutive_errors(), 3);
        let remaining = health.backoff_remaining().expect("backoff set");
        assert!(remaining <= policy.backoff_window(3));

        health.record_success();
        assert_eq!(health.consecutive_errors(), 0);
    }

    #[tokio::test]
    async fn test_calls_wait_out_mount_backoff() {
        let policy = FsPolicy {
            backoff_step: Duration::from_millis(50),
            backoff_cap: Duration::from_millis(200),
            ..FsPolicy::fast()
        };
        let fs = RemoteFs::new(policy.clone(), Arc::new(MountHealth::new()));
        let dir = tempfile::tempdir().unwrap();

        for _ in 0..3 {
            fs.health().record_transient(&policy);
        }
        let remaining = fs.health().backoff_remaining().expect("backoff set");
        assert!(remaining > Duration::from_millis(100));

        let started = Instant::now();
        assert!(fs.exists(dir.path()).await);
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(fs.health().consecutive_errors(), 0);
        assert!(fs.health().backoff_remaining().is_none());
    }

    #[test]
    fn test_dir_verdict_tells_missing_from_unknown() {
        let path = PathBuf::from("/remote/Alien");
        assert_eq!(dir_verdict(Ok(true)), Some(true));
        assert_eq!(
            dir_verdict(Err(FsError::Permanent {
                op: "metadata",
                path: path.clone(),
                source: io::Error::from(io::ErrorKind::NotFound),
            })),
            Some(false)
        );
        assert_eq!(
            dir_verdict(Err(FsError::Exhausted {
                op: "metadata",
                path: path.clone(),
                attempts: 3,
                source: io::Error::from(io::ErrorKind::WouldBlock),
            })),
            None
        );
        assert_eq!(
            dir_verdict(Err(FsError::Permanent {
                op: "metadata",
                path,
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            })),
            None
        );
    }

    #[tokio::test]
    async fn test_dir_status_on_real_paths() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("poster.jpg");
        std::fs::write(&file, b"x").unwrap();

        let fs = remote();
        assert_eq!(fs.dir_status(dir.path()).await, Some(true));
        assert_eq!(fs.dir_status(&file).await, Some(false));
        assert_eq!(fs.dir_status(&dir.path().join("missing")).await, Some(false));
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_and_count() {
        let fs = remote();
        let path = PathBuf::from("/remote/flaky");

        let result: Result<(), FsError> = fs
            .with_retry("list", &path, 3, || async {
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            })
            .await;

        assert!(matches!(result, Err(FsError::Exhausted { attempts: 3, .. })));
        assert_eq!(fs.health().consecutive_errors(), 3);
    }

    #[tokio::test]
    async fn test_retry_recovers_and_resets_health() {
        let fs = remote();
        let path = PathBuf::from("/remote/flaky");
        let calls = std::sync::atomic::AtomicU32::new(0);

        let result = fs
            .with_retry("list", &path, 5, || {
                let n = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(io::Error::from(io::ErrorKind::WouldBlock))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(fs.health().consecutive_errors(), 0);
    }

    #[tokio::test]
    async fn test_permanent_error_short_circuits_without_counting() {
        let fs = remote();
        let path = PathBuf::from("/remote/denied");
        let calls = std::sync::atomic::AtomicU32::new(0);

        let result: Result<(), FsError> = fs
            .with_retry("list", &path, 5, || {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Err(io::Error::from(io::ErrorKind::PermissionDenied)) }
            })
            .await;

        assert!(matches!(result, Err(FsError::Permanent { .. })));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(fs.health().consecutive_errors(), 0);
    }

    #[tokio::test]
    async fn test_list_degrades_on_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("poster.jpg");
        std::fs::write(&file, b"x").unwrap();

        let fs = remote();
        assert!(fs.list(&file).await.is_empty());
        assert!(fs.list(&dir.path().join("missing")).await.is_empty());
        assert_eq!(fs.list(dir.path()).await, vec!["poster.jpg".to_string()]);
    }

    #[tokio::test]
    async fn test_list_entries_marks_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("Alien")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let mut entries = remote().list_entries(dir.path()).await;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            entries,
            vec![
                DirEntryInfo { name: "Alien".into(), is_dir: true },
                DirEntryInfo { name: "notes.txt".into(), is_dir: false },
            ]
        );
    }

    #[tokio::test]
    async fn test_write_read_remove_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logo.png");
        let fs = remote();

        fs.write_bytes(&path, b"png").await.unwrap();
        assert!(fs.exists(&path).await);
        assert!(!fs.is_dir(&path).await);
        assert_eq!(fs.read_bytes(&path).await.as_deref(), Some(&b"png"[..]));
        assert!(fs.modified(&path).await.is_some());

        assert!(fs.remove_file(&path).await);
        assert!(!fs.exists(&path).await);
        assert!(fs.remove_file(&path).await, "missing file counts as removed");
    }

    #[tokio::test]
    async fn test_write_into_missing_directory_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("poster.jpg");

        let err = remote().write_bytes(&path, b"x").await.unwrap_err();
        assert!(matches!(err, FsError::Permanent { op: "write", .. }));
    }

    #[tokio::test]
    async fn test_copy_to_local_creates_parents() {
        let src_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("poster-thumb.jpg");
        std::fs::write(&src, b"thumb").unwrap();

        let dest = dest_dir.path().join("movie").join("Alien").join("poster-thumb.jpg");
        assert!(remote().copy_to_local(&src, &dest).await);
        assert_eq!(std::fs::read(&dest).unwrap(), b"thumb");

        assert!(!remote().copy_to_local(&src_dir.path().join("missing"), &dest).await);
    }
}
