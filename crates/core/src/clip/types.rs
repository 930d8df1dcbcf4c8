use serde::Serialize;
use thiserror::Error;

/// Why a clip attempt did not produce a clip.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum ClipFailure {
    #[error("video too short for a clip ({duration_secs}s)")]
    VideoTooShort { duration_secs: u64 },

    #[error("creator disabled clips")]
    ClipsDisabled,

    #[error("video is age restricted")]
    AgeRestricted,

    #[error("shorts cannot be clipped")]
    ShortsNotSupported,

    #[error("no automation account available")]
    NoAccountAvailable,

    #[error("clip button not found on the page")]
    ClipButtonNotDetected,

    #[error("automation error: {0}")]
    AutomationError(String),

    #[error("interrupted: {0}")]
    Interrupted(String),

    /// Another order held the video's lock for longer than the wait budget.
    #[error("timed out waiting for another order's clip")]
    DedupWaitTimedOut,
}

impl ClipFailure {
    /// Ineligible videos. Never retried.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ClipFailure::VideoTooShort { .. }
                | ClipFailure::ClipsDisabled
                | ClipFailure::AgeRestricted
                | ClipFailure::ShortsNotSupported
        )
    }

    /// Temporary failures worth another attempt in the same run.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClipFailure::NoAccountAvailable
                | ClipFailure::ClipButtonNotDetected
                | ClipFailure::AutomationError(_)
        )
    }

    /// Short label for metrics and audit.
    pub fn kind(&self) -> &'static str {
        match self {
            ClipFailure::VideoTooShort { .. } => "video_too_short",
            ClipFailure::ClipsDisabled => "clips_disabled",
            ClipFailure::AgeRestricted => "age_restricted",
            ClipFailure::ShortsNotSupported => "shorts_not_supported",
            ClipFailure::NoAccountAvailable => "no_account_available",
            ClipFailure::ClipButtonNotDetected => "clip_button_not_detected",
            ClipFailure::AutomationError(_) => "automation_error",
            ClipFailure::Interrupted(_) => "interrupted",
            ClipFailure::DedupWaitTimedOut => "dedup_wait_timed_out",
        }
    }
}

/// Outcome of the eligibility screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityReason {
    Eligible,
    ShortsNotSupported,
    VideoTooShort,
    ClipsDisabled,
    AgeRestricted,
    /// Clip creation is switched off for this worker.
    ClipsOff,
    /// The screen did not run (the clip came from the dedup cache).
    NotChecked,
}

impl From<&ClipFailure> for EligibilityReason {
    fn from(failure: &ClipFailure) -> Self {
        match failure {
            ClipFailure::ShortsNotSupported => EligibilityReason::ShortsNotSupported,
            ClipFailure::VideoTooShort { .. } => EligibilityReason::VideoTooShort,
            ClipFailure::ClipsDisabled => EligibilityReason::ClipsDisabled,
            ClipFailure::AgeRestricted => EligibilityReason::AgeRestricted,
            _ => EligibilityReason::Eligible,
        }
    }
}

/// Where the clip URL came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipSource {
    /// Created by this order's automation session.
    Created,
    /// Found in the result cache.
    Reused,
    /// Published by another order while this one waited.
    ReusedAfterWait,
    /// No clip.
    None,
}

impl ClipSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipSource::Created => "created",
            ClipSource::Reused => "reused",
            ClipSource::ReusedAfterWait => "reused_after_wait",
            ClipSource::None => "none",
        }
    }
}

/// Result of one clip attempt, or of a whole clip run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClipAttemptResult {
    pub success: bool,
    pub clip_url: Option<String>,
    pub eligible: bool,
    pub eligibility_reason: EligibilityReason,
    pub failure: Option<ClipFailure>,
    /// Derived from `failure`. Permanent failures are never retried.
    pub permanent: bool,
    pub account_used: Option<String>,
    pub attempt_number: u32,
    pub source: ClipSource,
}

impl ClipAttemptResult {
    pub fn created(clip_url: String, account_id: String, attempt_number: u32) -> Self {
        Self {
            success: true,
            clip_url: Some(clip_url),
            eligible: true,
            eligibility_reason: EligibilityReason::Eligible,
            failure: None,
            permanent: false,
            account_used: Some(account_id),
            attempt_number,
            source: ClipSource::Created,
        }
    }

    pub fn reused(clip_url: String, source: ClipSource) -> Self {
        Self {
            success: true,
            clip_url: Some(clip_url),
            eligible: true,
            eligibility_reason: EligibilityReason::NotChecked,
            failure: None,
            permanent: false,
            account_used: None,
            attempt_number: 0,
            source,
        }
    }

    pub fn failed(failure: ClipFailure, account_id: Option<String>, attempt_number: u32) -> Self {
        let eligibility_reason = EligibilityReason::from(&failure);
        Self {
            success: false,
            clip_url: None,
            eligible: !failure.is_permanent(),
            eligibility_reason,
            permanent: failure.is_permanent(),
            failure: Some(failure),
            account_used: account_id,
            attempt_number,
            source: ClipSource::None,
        }
    }

    /// Clip creation switched off in configuration.
    pub fn disabled() -> Self {
        Self {
            success: false,
            clip_url: None,
            eligible: false,
            eligibility_reason: EligibilityReason::ClipsOff,
            failure: None,
            permanent: false,
            account_used: None,
            attempt_number: 0,
            source: ClipSource::None,
        }
    }

    /// Returns true when another attempt in this run may help.
    pub fn should_retry(&self) -> bool {
        !self.success && self.failure.as_ref().is_some_and(|f| f.is_retryable())
    }
}

/// Final result of a clip run and how many automation attempts it used.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClipRun {
    pub result: ClipAttemptResult,
    pub attempts: u32,
}

impl ClipRun {
    pub fn clip_created(&self) -> bool {
        self.result.success
    }

    pub fn clip_url(&self) -> Option<&str> {
        self.result.clip_url.as_deref()
    }
}
