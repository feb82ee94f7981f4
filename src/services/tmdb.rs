//! TMDB (The Movie Database) API client for search and artwork listings
//!
//! Base URL: https://api.themoviedb.org/3
//!
//! Every failure (missing key, network error, non-2xx, bad JSON) is logged and
//! turned into an empty result. Calls are not retried.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::artwork::{ArtworkKind, MediaCategory};
use super::rate_limiter::RateLimitedClient;

const DEFAULT_BASE_URL: &str = "https://api.themoviedb.org/3";
pub const IMAGE_BASE_URL: &str = "https://image.tmdb.org/t/p/original";

/// TMDB API client with rate limiting
pub struct TmdbClient {
    client: RateLimitedClient,
    base_url: String,
    api_key: Option<String>,
}

/// Search hit, movie or TV
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TmdbSearchResult {
    pub id: u64,
    #[serde(alias = "name")]
    pub title: String,
    #[serde(default, alias = "first_air_date")]
    pub release_date: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
}

impl TmdbSearchResult {
    pub fn year(&self) -> Option<i32> {
        self.release_date
            .as_ref()
            .and_then(|d| d.get(..4))
            .and_then(|y| y.parse().ok())
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<TmdbSearchResult>,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    #[serde(alias = "name")]
    title: String,
}

/// Raw image record from `/{media}/{id}/images`
#[derive(Debug, Clone, Deserialize)]
pub struct TmdbImage {
    pub file_path: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub iso_639_1: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    posters: Vec<TmdbImage>,
    #[serde(default)]
    logos: Vec<TmdbImage>,
    #[serde(default)]
    backdrops: Vec<TmdbImage>,
}

impl ImagesResponse {
    fn take(self, kind: ArtworkKind) -> Vec<TmdbImage> {
        match kind {
            ArtworkKind::Poster => self.posters,
            ArtworkKind::Logo => self.logos,
            ArtworkKind::Backdrop => self.backdrops,
        }
    }
}

/// Artwork choice offered to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtworkImage {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub language: Option<String>,
}

impl ArtworkImage {
    pub fn size(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Keep English or language-neutral images, largest first.
pub fn select_images(images: Vec<TmdbImage>) -> Vec<ArtworkImage> {
    let mut selected: Vec<ArtworkImage> = images
        .into_iter()
        .filter(|img| matches!(img.iso_639_1.as_deref(), None | Some("en")))
        .map(|img| ArtworkImage {
            url: format!("{}{}", IMAGE_BASE_URL, img.file_path),
            width: img.width,
            height: img.height,
            language: img.iso_639_1,
        })
        .collect();
    selected.sort_by_key(|img| std::cmp::Reverse(u64::from(img.width) * u64::from(img.height)));
    selected
}

impl TmdbClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: RateLimitedClient::for_tmdb(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
        }
    }

    /// Point the client at another server (tests, proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        extra: &[(&str, &str)],
    ) -> Result<T> {
        let api_key = self.api_key.as_deref().context("TMDB API key not configured")?;
        let url = format!("{}{}", self.base_url, path);

        let mut query: Vec<(&str, &str)> = vec![("api_key", api_key)];
        query.extend_from_slice(extra);

        let response = self.client.get_with_query(&url, &query).await?;
        if !response.status().is_success() {
            anyhow::bail!("TMDB request {} failed with status: {}", path, response.status());
        }
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse TMDB response for {}", path))
    }

    async fn run_search(&self, path: &str, query: &str, extra: &[(&str, &str)]) -> Vec<TmdbSearchResult> {
        let mut params = vec![("query", query)];
        params.extend_from_slice(extra);

        match self.get_json::<SearchResponse>(path, &params).await {
            Ok(r) => {
                debug!(query = %query, count = r.results.len(), "TMDB search returned results");
                r.results
            }
            Err(e) => {
                warn!(query = %query, error = %e, "TMDB search failed");
                Vec::new()
            }
        }
    }

    pub async fn search_movies(&self, query: &str) -> Vec<TmdbSearchResult> {
        self.run_search("/search/movie", query, &[]).await
    }

    pub async fn search_tv(&self, query: &str) -> Vec<TmdbSearchResult> {
        self.run_search(
            "/search/tv",
            query,
            &[("include_adult", "false"), ("language", "en-US"), ("page", "1")],
        )
        .await
    }

    pub async fn search(&self, media: MediaCategory, query: &str) -> Vec<TmdbSearchResult> {
        match media {
            MediaCategory::Movie => self.search_movies(query).await,
            MediaCategory::Tv => self.search_tv(query).await,
        }
    }

    /// Title of a movie or show, `None` on any failure
    pub async fn get_details(&self, id: u64, media: MediaCategory) -> Option<String> {
        match self
            .get_json::<DetailsResponse>(&format!("/{}/{}", media, id), &[])
            .await
        {
            Ok(d) => Some(d.title),
            Err(e) => {
                warn!(tmdb_id = id, media = %media, error = %e, "TMDB details lookup failed");
                None
            }
        }
    }

    /// Artwork choices of `kind`, English or neutral, largest first
    pub async fn get_images(
        &self,
        id: u64,
        media: MediaCategory,
        kind: ArtworkKind,
    ) -> Vec<ArtworkImage> {
        match self
            .get_json::<ImagesResponse>(&format!("/{}/{}/images", media, id), &[])
            .await
        {
            Ok(images) => {
                let selected = select_images(images.take(kind));
                debug!(tmdb_id = id, artwork = %kind, count = selected.len(), "TMDB images fetched");
                selected
            }
            Err(e) => {
                warn!(tmdb_id = id, artwork = %kind, error = %e, "TMDB image listing failed");
                Vec::new()
            }
        }
    }
}
