//! Per-video deduplication of clip creation.
//!
//! Orders that reference the same video share one clip. The first order to
//! claim a video's lock creates the clip and publishes its URL; concurrent
//! orders poll for that URL instead of starting their own automation
//! session. Locks and results live in a [`KeyValueStore`](crate::kv::KeyValueStore)
//! so the coordination spans worker processes.

mod coordinator;

pub use coordinator::{video_key, ClaimOutcome, DedupClaim, DedupCoordinator};
