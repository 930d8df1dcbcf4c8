use tracing::debug;

use super::ClipFailure;
use crate::automation::url::{is_shorts_url, is_standard_watch_url};
use crate::automation::VideoDetails;

/// Decide whether a video can be clipped at all, without touching automation.
///
/// Unknown link shapes and missing metadata are let through; only known
/// restrictions reject.
pub fn screen(
    video_link: &str,
    details: Option<&VideoDetails>,
    min_duration_secs: u64,
) -> Result<(), ClipFailure> {
    if is_shorts_url(video_link) {
        return Err(ClipFailure::ShortsNotSupported);
    }

    if !is_standard_watch_url(video_link) {
        debug!("Non-standard video link, attempting anyway: {}", video_link);
    }

    let Some(details) = details else {
        return Ok(());
    };

    if let Some(duration_secs) = details.duration_secs {
        if duration_secs < min_duration_secs {
            return Err(ClipFailure::VideoTooShort { duration_secs });
        }
    }

    if details.clips_disabled {
        return Err(ClipFailure::ClipsDisabled);
    }

    if details.age_restricted {
        return Err(ClipFailure::AgeRestricted);
    }

    Ok(())
}
