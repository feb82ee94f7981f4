//! Mediarr - artwork manager for movie and TV libraries on network mounts
//!
//! Scans media directories for poster, logo and backdrop files, keeps the
//! results in resumable on-disk caches and downloads replacement artwork from
//! TMDB.

pub mod api;
pub mod app;
pub mod config;
pub mod media;
pub mod services;

pub use app::{AppState, build_app};
pub use config::Config;
