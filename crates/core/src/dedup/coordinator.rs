use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::DedupConfig;
use crate::kv::KeyValueStore;
use crate::metrics;

fn lock_key(video_key: &str) -> String {
    format!("clip:lock:{}", video_key)
}

fn result_key(video_key: &str) -> String {
    format!("clip:url:{}", video_key)
}

fn order_clip_key(order_id: &str) -> String {
    format!("order:clip:{}", order_id)
}

/// Identity of a video for dedup purposes.
///
/// The video id when known, otherwise a digest of the link so two orders
/// with the exact same unparseable link still share work.
pub fn video_key(video_id: Option<&str>, video_link: &str) -> String {
    match video_id {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
            let digest = Sha256::digest(video_link.trim().as_bytes());
            let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
            format!("url-{}", hex)
        }
    }
}

/// Result of trying to take a video's lock.
pub enum ClaimOutcome {
    /// This caller owns the clip attempt for the video.
    Claimed(DedupClaim),
    /// Another order holds the lock.
    Contended,
    /// The KV store could not be reached. Callers proceed without a lock.
    Unavailable,
}

/// Lock ownership and result cache per video.
#[derive(Clone)]
pub struct DedupCoordinator {
    kv: Arc<dyn KeyValueStore>,
    config: DedupConfig,
}

impl DedupCoordinator {
    pub fn new(kv: Arc<dyn KeyValueStore>, config: DedupConfig) -> Self {
        Self { kv, config }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Cached clip URL for the video, if one was published.
    pub async fn try_reuse(&self, video_key: &str) -> Option<String> {
        match self.kv.get(&result_key(video_key)).await {
            Ok(Some(url)) => {
                metrics::DEDUP_EVENTS.with_label_values(&["reused"]).inc();
                info!("Reusing cached clip for video {}", video_key);
                Some(url)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Clip cache lookup failed for video {}: {}", video_key, e);
                None
            }
        }
    }

    /// Atomically take the video's lock for `owner`.
    pub async fn try_claim(&self, video_key: &str, owner: &str) -> ClaimOutcome {
        let key = lock_key(video_key);
        match self
            .kv
            .set_if_absent(&key, owner, self.config.lock_ttl())
            .await
        {
            Ok(true) => {
                metrics::DEDUP_EVENTS.with_label_values(&["claimed"]).inc();
                debug!("Order {} claimed clip lock for video {}", owner, video_key);
                let heartbeat = tokio::spawn(keep_lock_alive(
                    Arc::clone(&self.kv),
                    key.clone(),
                    owner.to_string(),
                    self.config.lock_ttl(),
                ));
                ClaimOutcome::Claimed(DedupClaim {
                    kv: Arc::clone(&self.kv),
                    lock_key: key,
                    result_key: result_key(video_key),
                    owner: owner.to_string(),
                    result_ttl: self.config.result_ttl(),
                    heartbeat,
                    released: false,
                })
            }
            Ok(false) => {
                metrics::DEDUP_EVENTS.with_label_values(&["contended"]).inc();
                info!(
                    "Clip for video {} is already being created by another order",
                    video_key
                );
                ClaimOutcome::Contended
            }
            Err(e) => {
                metrics::DEDUP_EVENTS.with_label_values(&["unavailable"]).inc();
                warn!(
                    "Clip lock unavailable for video {}, continuing without it: {}",
                    video_key, e
                );
                ClaimOutcome::Unavailable
            }
        }
    }

    /// Poll the result cache until a URL appears or `max_wait` elapses.
    pub async fn wait_for_result(&self, video_key: &str, max_wait: Duration) -> Option<String> {
        let key = result_key(video_key);
        let deadline = Instant::now() + max_wait;
        let poll = self.config.poll_interval();

        loop {
            match self.kv.get(&key).await {
                Ok(Some(url)) => {
                    metrics::DEDUP_EVENTS.with_label_values(&["wait_hit"]).inc();
                    info!("Clip for video {} became available while waiting", video_key);
                    return Some(url);
                }
                Ok(None) => {}
                Err(e) => debug!("Clip cache poll failed for video {}: {}", video_key, e),
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }

        metrics::DEDUP_EVENTS
            .with_label_values(&["wait_timeout"])
            .inc();
        warn!(
            "Timed out after {:?} waiting for clip of video {}",
            max_wait, video_key
        );
        None
    }

    /// Remember which clip an order used. Best effort.
    pub async fn remember_order_clip(&self, order_id: &str, clip_url: &str) {
        if let Err(e) = self
            .kv
            .set(&order_clip_key(order_id), clip_url, self.config.result_ttl())
            .await
        {
            debug!("Could not cache clip for order {}: {}", order_id, e);
        }
    }
}

/// Renew the lock every third of its TTL while it still names `owner`.
///
/// Keeps a clip attempt that outlives `lock_ttl` from being joined by a
/// second creator. Stops once the lock is lost.
async fn keep_lock_alive(
    kv: Arc<dyn KeyValueStore>,
    lock_key: String,
    owner: String,
    ttl: Duration,
) {
    let period = (ttl / 3).max(Duration::from_millis(1));
    loop {
        tokio::time::sleep(period).await;
        match kv.extend_if_equals(&lock_key, &owner, ttl).await {
            Ok(true) => debug!("Order {} renewed {}", owner, lock_key),
            Ok(false) => {
                metrics::DEDUP_EVENTS.with_label_values(&["lock_lost"]).inc();
                warn!("Order {} lost {} before finishing", owner, lock_key);
                return;
            }
            Err(e) => warn!("Failed to renew {} for order {}: {}", lock_key, owner, e),
        }
    }
}

/// Ownership of one video's clip lock.
///
/// The lock is renewed in the background for as long as the claim lives.
/// Dropping a claim without calling [`DedupClaim::release`] (for example when
/// the owning task is cancelled) schedules the release on the runtime.
pub struct DedupClaim {
    kv: Arc<dyn KeyValueStore>,
    lock_key: String,
    result_key: String,
    owner: String,
    result_ttl: Duration,
    heartbeat: JoinHandle<()>,
    released: bool,
}

impl DedupClaim {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Publish the clip URL for every order referencing this video.
    pub async fn publish_result(&self, clip_url: &str) -> bool {
        match self.kv.set(&self.result_key, clip_url, self.result_ttl).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to publish clip for {}: {}", self.result_key, e);
                false
            }
        }
    }

    /// Free the lock now rather than waiting for its TTL.
    ///
    /// Only deletes the lock while it still names this owner, so a lock
    /// that expired and was taken over is left alone.
    pub async fn release(mut self) {
        self.released = true;
        self.heartbeat.abort();
        release_lock(self.kv.as_ref(), &self.lock_key, &self.owner).await;
    }
}

async fn release_lock(kv: &dyn KeyValueStore, lock_key: &str, owner: &str) {
    match kv.delete_if_equals(lock_key, owner).await {
        Ok(true) => debug!("Order {} released {}", owner, lock_key),
        Ok(false) => debug!("{} no longer held by order {}", lock_key, owner),
        Err(e) => warn!(
            "Failed to release {} for order {}, it will expire: {}",
            lock_key, owner, e
        ),
    }
}

impl Drop for DedupClaim {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.heartbeat.abort();
        let kv = Arc::clone(&self.kv);
        let lock_key = std::mem::take(&mut self.lock_key);
        let owner = std::mem::take(&mut self.owner);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    release_lock(kv.as_ref(), &lock_key, &owner).await;
                });
            }
            Err(_) => warn!("No runtime to release {}, it will expire", lock_key),
        }
    }
}
