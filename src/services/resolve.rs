//! Candidate filtering and original-image resolution.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

/// Query parameters that only select a rendition size.
pub const SIZE_PARAMS: &[&str] = &[
    "w", "h", "width", "height", "size", "s", "resize", "crop", "fit",
];

/// Extension used when a locator does not name one.
pub const FALLBACK_EXTENSION: &str = "jpg";

static IMAGE_EXTENSION: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)\.(jpg|jpeg|png|gif|webp|bmp|svg)($|\?)").ok());

static THUMBNAIL_SUFFIX: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)_(thumb|small|medium|large|\d+x\d+|\d+w|\d+h)\.").ok());

/// Returns true if `url` names a supported image format.
///
/// Matches `.jpg`, `.jpeg`, `.png`, `.gif`, `.webp`, `.bmp` and `.svg` at the
/// end of the locator or right before its query string.
#[must_use]
pub fn is_supported_image(url: &str) -> bool {
    IMAGE_EXTENSION
        .as_ref()
        .is_some_and(|re| re.is_match(url))
}

/// Lowercase image extension of `url`, or `"jpg"`.
#[must_use]
pub fn image_extension(url: &str) -> String {
    IMAGE_EXTENSION
        .as_ref()
        .and_then(|re| re.captures(url))
        .and_then(|caps| caps.get(1))
        .map_or_else(
            || FALLBACK_EXTENSION.to_string(),
            |ext| ext.as_str().to_ascii_lowercase(),
        )
}

/// Rewrites a thumbnail locator to the full-size image it was cut from.
///
/// - drops size-selecting query parameters ([`SIZE_PARAMS`])
/// - removes the first `_thumb`, `_small`, `_medium`, `_large`, `_<W>x<H>`,
///   `_<N>w` or `_<N>h` suffix before an extension
/// - maps `/thumb/` to `/original/` and `/thumbnails/` to `/images/`
///
/// Input that does not parse is returned unchanged.
///
/// # Example
///
/// ```rust
/// use imgdedup::services::original_image_url;
///
/// assert_eq!(
///     original_image_url("https://a.com/thumb/cat_300x200.jpg?w=300&id=7"),
///     "https://a.com/original/cat.jpg?id=7"
/// );
/// ```
#[must_use]
pub fn original_image_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    if url.cannot_be_a_base() {
        return raw.to_string();
    }

    if url.query_pairs().any(|(name, _)| is_size_param(&name)) {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(name, _)| !is_size_param(name))
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
    }

    let mut path = url.path().to_string();
    if let Some(re) = THUMBNAIL_SUFFIX.as_ref() {
        path = re.replace(&path, ".").into_owned();
    }
    path = path.replace("/thumb/", "/original/");
    path = path.replace("/thumbnails/", "/images/");
    url.set_path(&path);

    String::from(url)
}

fn is_size_param(name: &str) -> bool {
    SIZE_PARAMS.contains(&name)
}
