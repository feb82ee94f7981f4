//! Shared title normalization utilities
//!
//! Two different normalizations live here and must not be confused:
//! [slugify] keeps word boundaries as dashes and is used for display anchors,
//! while [normalize_title] drops every separator and is used for comparison.

use once_cell::sync::Lazy;
use regex::Regex;

static NON_ALNUM_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("static regex"));

/// Generate a URL-friendly, anchor-safe id from a title.
///
/// Runs of non-alphanumeric characters collapse to a single dash and the result
/// is trimmed of leading/trailing dashes.
///
/// # Example
/// ```ignore
/// assert_eq!(slugify("The Matrix (1999)"), "the-matrix-1999");
/// ```
pub fn slugify(title: &str) -> String {
    NON_ALNUM_RUN
        .replace_all(&title.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// Remove a leading "The " (any case) from a title.
pub fn strip_leading_the(title: &str) -> &str {
    match title.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("the ") => &title[4..],
        _ => title,
    }
}

/// Ordering key for library listings: case-insensitive, leading "The " ignored.
pub fn sort_key(title: &str) -> String {
    strip_leading_the(&title.to_lowercase()).to_string()
}

/// Normalize a title for fuzzy comparison.
///
/// Lowercases, drops a leading article "the" and strips every non-alphanumeric
/// character, so "The Matrix (1999)" and "Matrix 1999" both become "matrix1999".
pub fn normalize_title(title: &str) -> String {
    let lower = title.to_lowercase();
    let trimmed = lower.trim_start();
    let without_article = strip_leading_the(trimmed);
    without_article
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}
