//! Testing utilities and mock implementations of the external collaborators.
//!
//! The mocks let the whole fulfillment pipeline run in-process, without a
//! browser farm, metadata API or traffic router.
//!
//! # Example
//!
//! ```rust,ignore
//! use viewrelay_core::testing::{MockBrowserAutomation, MockAccountPool, MockTrafficRouter};
//!
//! let automation = MockBrowserAutomation::new();
//! let accounts = MockAccountPool::with_accounts(2);
//! let router = MockTrafficRouter::new();
//!
//! // Configure behavior
//! automation.push_outcome(Ok(None)).await; // first attempt: no clip button
//! router.set_result(TrafficRoutingResult::failed("no budget")).await;
//!
//! // Wire into Collaborators...
//! ```

mod mock_accounts;
mod mock_automation;
mod mock_metadata;
mod mock_traffic_router;

pub use mock_accounts::MockAccountPool;
pub use mock_automation::{MockBrowserAutomation, RecordedClipCall};
pub use mock_metadata::MockVideoMetadata;
pub use mock_traffic_router::{MockTrafficRouter, RecordedIntegration};

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::Utc;

    use crate::automation::{url, VideoDetails};
    use crate::order::{CreateOrderRequest, Order, OrderSnapshot, OrderStatus};

    /// A standard watch link.
    pub const WATCH_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    /// Video id of [`WATCH_URL`].
    pub const VIDEO_ID: &str = "dQw4w9WgXcQ";

    /// Request for a new order owned by `user-1`.
    pub fn create_order_request(video_link: &str, target_views: u64) -> CreateOrderRequest {
        CreateOrderRequest {
            user_id: "user-1".to_string(),
            video_link: video_link.to_string(),
            target_views,
        }
    }

    /// A pending order that was never stored.
    pub fn order(video_link: &str, target_views: u64) -> Order {
        let now = Utc::now();
        Order {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: "user-1".to_string(),
            video_link: video_link.to_string(),
            video_id: None,
            target_views,
            start_count: None,
            status: OrderStatus::Pending,
            coefficient: None,
            required_clicks: None,
            clip_url: None,
            error_message: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Snapshot of an order that just started processing.
    pub fn order_snapshot(order_id: &str, video_link: &str) -> OrderSnapshot {
        OrderSnapshot {
            order_id: order_id.to_string(),
            user_id: "user-1".to_string(),
            video_link: video_link.to_string(),
            video_id: url::extract_video_id(video_link),
            target_views: 1000,
        }
    }

    /// Clippable video details with the given duration.
    pub fn video_details(duration_secs: u64) -> VideoDetails {
        VideoDetails {
            title: Some("Never Gonna Give You Up".to_string()),
            channel: Some("Rick Astley".to_string()),
            duration_secs: Some(duration_secs),
            clips_disabled: false,
            age_restricted: false,
        }
    }
}
