//! API route definitions
//!
//! Thin JSON routes over [ArtworkManager](crate::services::ArtworkManager).
//! Full-resolution artwork is served from the media roots, thumbnails from the
//! local mirror.

pub mod artwork;
pub mod health;
pub mod scan;

use axum::http::StatusCode;

use crate::services::{ArtworkKind, MediaCategory};

/// Parse the `{media}/{artwork}` path segments shared by most routes.
pub(crate) fn parse_key(media: &str, artwork: &str) -> Result<(MediaCategory, ArtworkKind), (StatusCode, String)> {
    let media = media.parse::<MediaCategory>().map_err(|e| (StatusCode::BAD_REQUEST, e))?;
    let kind = artwork.parse::<ArtworkKind>().map_err(|e| (StatusCode::BAD_REQUEST, e))?;
    Ok((media, kind))
}

/// Render an error with its whole context chain on one line.
pub(crate) fn error_text(err: &anyhow::Error) -> String {
    format!("{:#}", err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_error_text_keeps_context() {
        let err = std::fs::read("/definitely/missing/cache.json")
            .context("Failed to read scan cache")
            .unwrap_err();
        let text = error_text(&err);
        assert!(text.starts_with("Failed to read scan cache: "), "{}", text);
        assert!(text.len() > "Failed to read scan cache: ".len());
    }

    #[test]
    fn test_parse_key_rejects_unknown_media() {
        assert!(parse_key("movie", "poster").is_ok());
        assert_eq!(parse_key("books", "poster").unwrap_err().0, StatusCode::BAD_REQUEST);
    }
}
