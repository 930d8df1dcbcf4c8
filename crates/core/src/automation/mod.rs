//! Collaborators the fulfillment pipeline drives: video metadata, browser
//! automation, automation accounts and traffic routing.
//!
//! Real clients live outside this crate. `adapters` holds the minimal
//! built-in implementations the worker binary runs with.

mod adapters;
mod types;
pub mod url;

pub use adapters::{
    ConfiguredAccountPool, DisabledAutomation, UnconfiguredTrafficRouter, UrlMetadataProvider,
};
pub use types::{AutomationAccount, TrafficRoutingResult, VideoDetails};

use async_trait::async_trait;
use thiserror::Error;

use crate::order::Order;

/// Errors from the browser automation service.
#[derive(Debug, Clone, Error)]
pub enum AutomationError {
    /// The session was cancelled before it produced a result.
    #[error("Automation cancelled")]
    Cancelled,

    /// No automation backend is reachable.
    #[error("Automation unavailable: {0}")]
    Unavailable(String),

    #[error("Automation failed: {0}")]
    Failed(String),
}

/// Errors from the video metadata provider.
#[derive(Debug, Clone, Error)]
pub enum MetadataError {
    #[error("Video not found: {0}")]
    NotFound(String),

    #[error("Metadata lookup failed: {0}")]
    Lookup(String),
}

/// Errors from the account pool.
#[derive(Debug, Error)]
pub enum AccountPoolError {
    #[error("Account pool error: {0}")]
    Backend(String),
}

/// Errors from the traffic router.
#[derive(Debug, Clone, Error)]
pub enum TrafficRoutingError {
    #[error("Traffic routing request failed: {0}")]
    Request(String),

    #[error("Traffic routing timed out after {0}s")]
    Timeout(u64),
}

/// Looks up video identity and public metadata.
#[async_trait]
pub trait VideoMetadataProvider: Send + Sync {
    /// Extract the video id from a link.
    fn extract_video_id(&self, url: &str) -> Option<String> {
        url::extract_video_id(url)
    }

    /// Current public view count. `None` when the provider cannot tell.
    async fn view_count(&self, video_id: &str) -> Result<Option<u64>, MetadataError>;

    /// Title, channel and restriction hints. `None` when unknown.
    async fn video_details(&self, video_id: &str) -> Result<Option<VideoDetails>, MetadataError>;
}

/// Drives a browser session that creates a clip on the video page.
#[async_trait]
pub trait BrowserAutomation: Send + Sync {
    /// Create a clip of `video_url` signed in as `account`.
    ///
    /// With `title = None` the implementation derives a title from the page.
    /// `Ok(None)` means the clip control was not found on the page.
    async fn create_clip(
        &self,
        video_url: &str,
        account: &AutomationAccount,
        title: Option<&str>,
    ) -> Result<Option<String>, AutomationError>;

    /// Returns true when the automation backend is reachable.
    async fn test_connection(&self) -> bool;
}

/// Hands out automation identities.
#[async_trait]
pub trait AccountPool: Send + Sync {
    /// Pick an account that still has capacity, if any.
    async fn select_available_account(
        &self,
    ) -> Result<Option<AutomationAccount>, AccountPoolError>;

    /// Count one successful clip against `account`.
    async fn record_usage(&self, account: &AutomationAccount) -> Result<(), AccountPoolError>;
}

/// External system that directs click traffic to a target URL.
#[async_trait]
pub trait TrafficRouter: Send + Sync {
    /// Set up routing of `order.required_clicks` clicks to `target_url`.
    ///
    /// Called at most once per finish phase and never retried synchronously.
    async fn create_integration(
        &self,
        order: &Order,
        video_id: Option<&str>,
        clip_created: bool,
        target_url: &str,
    ) -> Result<TrafficRoutingResult, TrafficRoutingError>;
}
