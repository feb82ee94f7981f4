//! Application configuration management

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::services::filesystem::FsPolicy;
use crate::services::orchestrator::ScanSettings;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,

    /// TMDB API key
    pub tmdb_api_key: Option<String>,

    /// Slack incoming webhook for download notifications
    pub slack_webhook_url: Option<String>,

    /// Movie root folders, in configured order
    pub movie_folders: Vec<PathBuf>,

    /// TV show root folders, in configured order
    pub tv_folders: Vec<PathBuf>,

    /// Directory holding scan caches, checkpoints and the mapping documents
    pub data_path: PathBuf,

    /// Local mirror of remote thumbnail files
    pub thumbnail_cache_path: PathBuf,

    /// Full-scan pacing
    pub scan: ScanSettings,

    /// Remote mount retry/backoff policy
    pub fs: FsPolicy,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let data_path = PathBuf::from(env::var("DATA_PATH").unwrap_or_else(|_| "./data".to_string()));

        let thumbnail_cache_path = env::var("THUMBNAIL_CACHE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_path.join("thumbnails"));

        let movie_folders = parse_folders(
            &env::var("MOVIE_FOLDERS").unwrap_or_else(|_| "/movies,/kids-movies,/anime".to_string()),
        );
        let tv_folders =
            parse_folders(&env::var("TV_FOLDERS").unwrap_or_else(|_| "/tv,/kids-tv".to_string()));

        let defaults = ScanSettings::default();
        let scan = ScanSettings {
            checkpoint_interval: env::var("SCAN_CHECKPOINT_INTERVAL")
                .ok()
                .map(|v| v.parse().context("Invalid SCAN_CHECKPOINT_INTERVAL"))
                .transpose()?
                .unwrap_or(defaults.checkpoint_interval),
            throttle: env_millis("SCAN_THROTTLE_MS")?.unwrap_or(defaults.throttle),
            backfill_pacing: env_millis("BACKFILL_PACING_MS")?.unwrap_or(defaults.backfill_pacing),
        };

        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .context("Invalid PORT")?,

            tmdb_api_key: env::var("TMDB_API_KEY").ok().filter(|k| !k.is_empty()),

            slack_webhook_url: env::var("SLACK_WEBHOOK_URL").ok().filter(|u| !u.is_empty()),

            movie_folders,
            tv_folders,
            data_path,
            thumbnail_cache_path,
            scan,
            fs: FsPolicy::default(),
        })
    }
}

fn env_millis(name: &str) -> Result<Option<Duration>> {
    env::var(name)
        .ok()
        .map(|v| {
            v.parse::<u64>()
                .map(Duration::from_millis)
                .with_context(|| format!("Invalid {}", name))
        })
        .transpose()
}

/// Split a comma-separated folder list, dropping blanks and roots that are
/// not mounted.
fn parse_folders(raw: &str) -> Vec<PathBuf> {
    raw.split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .filter_map(|f| {
            if Path::new(f).exists() {
                Some(PathBuf::from(f))
            } else {
                tracing::warn!(folder = %f, "Configured root folder does not exist, skipping");
                None
            }
        })
        .collect()
}
