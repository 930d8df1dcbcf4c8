//! Mock traffic router for testing.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::automation::{TrafficRouter, TrafficRoutingError, TrafficRoutingResult};
use crate::order::Order;

/// A recorded integration request for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedIntegration {
    pub order_id: String,
    pub video_id: Option<String>,
    pub clip_created: bool,
    pub target_url: String,
    pub coefficient: Option<f64>,
    pub required_clicks: Option<u64>,
}

/// Mock implementation of the TrafficRouter trait.
///
/// Succeeds with one campaign unless told otherwise. An error set with
/// `set_error` wins over the configured result until `clear_error`.
#[derive(Debug)]
pub struct MockTrafficRouter {
    calls: Arc<RwLock<Vec<RecordedIntegration>>>,
    result: Arc<RwLock<TrafficRoutingResult>>,
    error: Arc<RwLock<Option<TrafficRoutingError>>>,
    delay: Arc<RwLock<Duration>>,
}

impl Default for MockTrafficRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTrafficRouter {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(RwLock::new(Vec::new())),
            result: Arc::new(RwLock::new(TrafficRoutingResult::succeeded(1))),
            error: Arc::new(RwLock::new(None)),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
        }
    }

    /// Get all recorded integration requests.
    pub async fn calls(&self) -> Vec<RecordedIntegration> {
        self.calls.read().await.clone()
    }

    /// Set the result returned by every call.
    pub async fn set_result(&self, result: TrafficRoutingResult) {
        *self.result.write().await = result;
    }

    /// Fail every call with `error`.
    pub async fn set_error(&self, error: TrafficRoutingError) {
        *self.error.write().await = Some(error);
    }

    pub async fn clear_error(&self) {
        *self.error.write().await = None;
    }

    /// Make every call take `delay` before answering.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }
}

#[async_trait]
impl TrafficRouter for MockTrafficRouter {
    async fn create_integration(
        &self,
        order: &Order,
        video_id: Option<&str>,
        clip_created: bool,
        target_url: &str,
    ) -> Result<TrafficRoutingResult, TrafficRoutingError> {
        self.calls.write().await.push(RecordedIntegration {
            order_id: order.id.clone(),
            video_id: video_id.map(String::from),
            clip_created,
            target_url: target_url.to_string(),
            coefficient: order.coefficient,
            required_clicks: order.required_clicks,
        });

        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.error.read().await.clone() {
            return Err(error);
        }
        Ok(self.result.read().await.clone())
    }
}
