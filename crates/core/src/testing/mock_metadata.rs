//! Mock video metadata provider for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::automation::{MetadataError, VideoDetails, VideoMetadataProvider};

/// Mock implementation of the VideoMetadataProvider trait.
///
/// Unknown videos have no details and no view count. Id extraction uses the
/// default URL parser.
#[derive(Debug)]
pub struct MockVideoMetadata {
    details: Arc<RwLock<HashMap<String, VideoDetails>>>,
    view_counts: Arc<RwLock<HashMap<String, u64>>>,
    /// If set, the next lookup fails with this error.
    next_error: Arc<RwLock<Option<MetadataError>>>,
}

impl Default for MockVideoMetadata {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVideoMetadata {
    pub fn new() -> Self {
        Self {
            details: Arc::new(RwLock::new(HashMap::new())),
            view_counts: Arc::new(RwLock::new(HashMap::new())),
            next_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Set the details returned for `video_id`.
    pub async fn set_details(&self, video_id: &str, details: VideoDetails) {
        self.details
            .write()
            .await
            .insert(video_id.to_string(), details);
    }

    /// Set the view count returned for `video_id`.
    pub async fn set_view_count(&self, video_id: &str, count: u64) {
        self.view_counts
            .write()
            .await
            .insert(video_id.to_string(), count);
    }

    /// Make the next lookup fail.
    pub async fn set_next_error(&self, error: MetadataError) {
        *self.next_error.write().await = Some(error);
    }

    async fn take_error(&self) -> Result<(), MetadataError> {
        match self.next_error.write().await.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl VideoMetadataProvider for MockVideoMetadata {
    async fn view_count(&self, video_id: &str) -> Result<Option<u64>, MetadataError> {
        self.take_error().await?;
        Ok(self.view_counts.read().await.get(video_id).copied())
    }

    async fn video_details(&self, video_id: &str) -> Result<Option<VideoDetails>, MetadataError> {
        self.take_error().await?;
        Ok(self.details.read().await.get(video_id).cloned())
    }
}
