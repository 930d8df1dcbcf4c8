//! Clip attempt engine: eligibility, account selection and automation calls,
//! with per-video dedup and bounded retries.

mod eligibility;
mod engine;
mod types;

pub use eligibility::screen;
pub use engine::ClipAttemptEngine;
pub use types::{ClipAttemptResult, ClipFailure, ClipRun, ClipSource, EligibilityReason};
