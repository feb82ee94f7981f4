//! Image processing

pub mod thumbnail;

pub use thumbnail::{ThumbnailShape, create_thumbnail, image_dimensions};
