//! Thumbnail generation for downloaded artwork
//!
//! Posters and backdrops are centre-cropped to their display aspect ratio and
//! re-encoded as JPEG. Logos keep their aspect ratio and alpha channel and are
//! written as PNG.

use std::io::Cursor;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader};

use crate::services::artwork::ArtworkKind;

const JPEG_QUALITY: u8 = 90;
const LOGO_MAX_WIDTH: u32 = 500;

/// Target geometry of a thumbnail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailShape {
    /// Centre crop to the target aspect ratio, then resize exactly
    Crop { width: u32, height: u32 },
    /// Shrink to at most this width, keeping the aspect ratio
    FitWidth { max_width: u32 },
}

impl ThumbnailShape {
    pub fn for_kind(kind: ArtworkKind) -> Self {
        match kind {
            ArtworkKind::Poster => ThumbnailShape::Crop { width: 300, height: 450 },
            ArtworkKind::Backdrop => ThumbnailShape::Crop { width: 300, height: 169 },
            ArtworkKind::Logo => ThumbnailShape::FitWidth { max_width: LOGO_MAX_WIDTH },
        }
    }
}

/// Build the encoded thumbnail for `kind` from full-resolution image bytes.
///
/// CPU bound; call from `spawn_blocking`.
pub fn create_thumbnail(kind: ArtworkKind, source: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(source).context("Failed to decode artwork")?;

    let thumb = match ThumbnailShape::for_kind(kind) {
        ThumbnailShape::Crop { width, height } => {
            center_crop(&img, width as f64 / height as f64).resize_exact(
                width,
                height,
                FilterType::Lanczos3,
            )
        }
        ThumbnailShape::FitWidth { max_width } => {
            let (w, h) = img.dimensions();
            if w > max_width {
                let new_height = ((max_width as f64) * (h as f64) / (w as f64)).round().max(1.0);
                img.resize_exact(max_width, new_height as u32, FilterType::Lanczos3)
            } else {
                img
            }
        }
    };

    let mut out = Vec::new();
    match kind {
        ArtworkKind::Logo => {
            thumb
                .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
                .context("Failed to encode PNG thumbnail")?;
        }
        ArtworkKind::Poster | ArtworkKind::Backdrop => {
            let rgb = DynamicImage::ImageRgb8(thumb.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY))
                .context("Failed to encode JPEG thumbnail")?;
        }
    }
    Ok(out)
}

/// Crop the centre of `img` to `target_ratio` (width / height).
fn center_crop(img: &DynamicImage, target_ratio: f64) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }
    let ratio = w as f64 / h as f64;

    if ratio > target_ratio {
        let new_w = ((h as f64 * target_ratio).round() as u32).clamp(1, w);
        let left = (w - new_w) / 2;
        img.crop_imm(left, 0, new_w, h)
    } else if ratio < target_ratio {
        let new_h = ((w as f64 / target_ratio).round() as u32).clamp(1, h);
        let top = (h - new_h) / 2;
        img.crop_imm(0, top, w, new_h)
    } else {
        img.clone()
    }
}

/// Read "WIDTHxHEIGHT" from encoded image bytes without decoding pixels.
pub fn image_dimensions(bytes: &[u8]) -> Option<String> {
    let (w, h) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()?;
    Some(format!("{}x{}", w, h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([200, 10, 10, 128])));
        let mut out = Vec::new();
        match format {
            ImageFormat::Png => img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png).unwrap(),
            _ => DynamicImage::ImageRgb8(img.to_rgb8())
                .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
                .unwrap(),
        }
        out
    }

    #[test]
    fn test_poster_thumbnail_is_300x450_jpeg() {
        let source = encoded(1000, 1000, ImageFormat::Jpeg);
        let thumb = create_thumbnail(ArtworkKind::Poster, &source).unwrap();

        assert_eq!(image::guess_format(&thumb).unwrap(), ImageFormat::Jpeg);
        assert_eq!(image_dimensions(&thumb).as_deref(), Some("300x450"));
    }

    #[test]
    fn test_backdrop_thumbnail_is_16_by_9() {
        let source = encoded(800, 800, ImageFormat::Png);
        let thumb = create_thumbnail(ArtworkKind::Backdrop, &source).unwrap();
        assert_eq!(image_dimensions(&thumb).as_deref(), Some("300x169"));
    }

    #[test]
    fn test_logo_thumbnail_keeps_alpha_and_ratio() {
        let source = encoded(1000, 200, ImageFormat::Png);
        let thumb = create_thumbnail(ArtworkKind::Logo, &source).unwrap();

        assert_eq!(image::guess_format(&thumb).unwrap(), ImageFormat::Png);
        assert_eq!(image_dimensions(&thumb).as_deref(), Some("500x100"));
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert!(decoded.color().has_alpha());
    }

    #[test]
    fn test_small_logo_is_not_upscaled() {
        let source = encoded(120, 40, ImageFormat::Png);
        let thumb = create_thumbnail(ArtworkKind::Logo, &source).unwrap();
        assert_eq!(image_dimensions(&thumb).as_deref(), Some("120x40"));
    }

    #[test]
    fn test_center_crop_wide_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(900, 300));
        let cropped = center_crop(&img, 2.0 / 3.0);
        assert_eq!(cropped.dimensions(), (200, 300));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(create_thumbnail(ArtworkKind::Poster, b"not an image").is_err());
        assert_eq!(image_dimensions(b"not an image"), None);
    }
}
