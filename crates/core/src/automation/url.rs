//! Video link helpers.

use once_cell::sync::Lazy;
use regex_lite::Regex;

static VIDEO_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?:youtube\.com/(?:[^/]+/.+/|(?:v|e(?:mbed)?|shorts|live)/|.*[?&]v=)|youtu\.be/)([^"&?/\s]{11})"#,
    )
    .unwrap()
});

/// Extract the 11-character video id from a watch, short, embed or
/// `youtu.be` link.
pub fn extract_video_id(url: &str) -> Option<String> {
    VIDEO_ID_RE
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Shorts cannot be clipped.
pub fn is_shorts_url(url: &str) -> bool {
    url.contains("/shorts/")
}

/// Returns true for the usual `watch?v=` and `youtu.be` shapes.
///
/// Anything else is still attempted. This only drives logging.
pub fn is_standard_watch_url(url: &str) -> bool {
    url.contains("youtube.com/watch") || url.contains("youtu.be/")
}
