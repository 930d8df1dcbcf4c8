use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::kv::KeyValueStore;

/// KV key of an order's monitoring snapshot.
pub fn monitoring_key(order_id: &str) -> String {
    format!("order:monitoring:{}", order_id)
}

/// What the delivery monitor needs to track an order's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringSnapshot {
    pub order_id: String,
    pub start_count: Option<u64>,
    pub target_views: u64,
    pub required_clicks: u64,
    pub coefficient: f64,
    pub clip_created: bool,
    pub status: String,
    pub started_at: DateTime<Utc>,
}

impl MonitoringSnapshot {
    /// Write the snapshot in the background. Failures are logged and dropped.
    pub fn publish(self, kv: Arc<dyn KeyValueStore>, ttl: Duration) {
        tokio::spawn(async move {
            let key = monitoring_key(&self.order_id);
            let json = match serde_json::to_string(&self) {
                Ok(json) => json,
                Err(e) => {
                    debug!("Could not encode monitoring snapshot for {}: {}", key, e);
                    return;
                }
            };
            if let Err(e) = kv.set(&key, &json, ttl).await {
                debug!("Could not store monitoring snapshot {}: {}", key, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;

    #[tokio::test]
    async fn test_publish_writes_json() {
        let kv = Arc::new(MemoryKvStore::new());
        let snapshot = MonitoringSnapshot {
            order_id: "o-1".to_string(),
            start_count: Some(120),
            target_views: 1000,
            required_clicks: 3000,
            coefficient: 3.0,
            clip_created: true,
            status: "monitoring".to_string(),
            started_at: Utc::now(),
        };

        snapshot.clone().publish(kv.clone(), Duration::from_secs(60));

        let mut stored = None;
        for _ in 0..20 {
            tokio::task::yield_now().await;
            stored = kv.get(&monitoring_key("o-1")).await.unwrap();
            if stored.is_some() {
                break;
            }
        }
        let parsed: MonitoringSnapshot = serde_json::from_str(&stored.unwrap()).unwrap();
        assert_eq!(parsed, snapshot);
    }
}
