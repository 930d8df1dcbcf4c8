use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::eligibility::screen;
use super::{ClipAttemptResult, ClipFailure, ClipRun, ClipSource};
use crate::automation::{
    AccountPool, AutomationError, BrowserAutomation, VideoDetails, VideoMetadataProvider,
};
use crate::config::FulfillmentConfig;
use crate::dedup::{video_key, ClaimOutcome, DedupCoordinator};
use crate::metrics;
use crate::order::OrderSnapshot;
use crate::pool::ResourcePoolGuard;

/// Creates (or reuses) a clip for an order's video.
pub struct ClipAttemptEngine {
    metadata: Arc<dyn VideoMetadataProvider>,
    automation: Arc<dyn BrowserAutomation>,
    accounts: Arc<dyn AccountPool>,
    pool: ResourcePoolGuard,
    dedup: DedupCoordinator,
    config: FulfillmentConfig,
}

impl ClipAttemptEngine {
    pub fn new(
        metadata: Arc<dyn VideoMetadataProvider>,
        automation: Arc<dyn BrowserAutomation>,
        accounts: Arc<dyn AccountPool>,
        pool: ResourcePoolGuard,
        dedup: DedupCoordinator,
        config: FulfillmentConfig,
    ) -> Self {
        Self {
            metadata,
            automation,
            accounts,
            pool,
            dedup,
            config,
        }
    }

    pub fn pool(&self) -> &ResourcePoolGuard {
        &self.pool
    }

    /// Run the full clip flow for one order.
    ///
    /// 1. Screen eligibility (no dedup or automation for ineligible videos).
    /// 2. Reuse a cached clip for the video when one exists.
    /// 3. Claim the video's lock, or wait for the holder's result.
    /// 4. Attempt up to `max_clip_attempts` times with a fixed delay,
    ///    stopping early on permanent failures and interruptions.
    /// 5. Publish the clip on success and release the lock.
    pub async fn create_clip(&self, snapshot: &OrderSnapshot) -> ClipRun {
        let started = Instant::now();
        let run = self.run(snapshot).await;
        metrics::CLIP_DURATION
            .with_label_values(&[run.result.source.as_str()])
            .observe(started.elapsed().as_secs_f64());
        run
    }

    async fn run(&self, snapshot: &OrderSnapshot) -> ClipRun {
        let details = self.fetch_details(snapshot).await;

        if let Err(failure) = screen(
            &snapshot.video_link,
            details.as_ref(),
            self.config.min_video_duration_secs,
        ) {
            info!(
                "Order {} video not eligible for a clip: {}",
                snapshot.order_id, failure
            );
            metrics::CLIP_ATTEMPTS
                .with_label_values(&[failure.kind()])
                .inc();
            return ClipRun {
                result: ClipAttemptResult::failed(failure, None, 1),
                attempts: 1,
            };
        }

        let key = video_key(snapshot.video_id.as_deref(), &snapshot.video_link);

        if let Some(url) = self.dedup.try_reuse(&key).await {
            self.dedup.remember_order_clip(&snapshot.order_id, &url).await;
            return ClipRun {
                result: ClipAttemptResult::reused(url, ClipSource::Reused),
                attempts: 0,
            };
        }

        let claim = match self.dedup.try_claim(&key, &snapshot.order_id).await {
            ClaimOutcome::Claimed(claim) => Some(claim),
            ClaimOutcome::Unavailable => None,
            ClaimOutcome::Contended => {
                let waited = self
                    .dedup
                    .wait_for_result(&key, self.dedup.config().max_wait())
                    .await;
                let result = match waited {
                    Some(url) => {
                        self.dedup.remember_order_clip(&snapshot.order_id, &url).await;
                        ClipAttemptResult::reused(url, ClipSource::ReusedAfterWait)
                    }
                    None => ClipAttemptResult::failed(ClipFailure::DedupWaitTimedOut, None, 0),
                };
                return ClipRun {
                    result,
                    attempts: 0,
                };
            }
        };

        let max_attempts = self.config.max_clip_attempts.max(1);
        let mut attempts = 0;
        let mut result;
        loop {
            attempts += 1;
            result = self.attempt(snapshot, details.as_ref(), attempts).await;

            if result.success || !result.should_retry() || attempts >= max_attempts {
                break;
            }

            debug!(
                "Order {} clip attempt {}/{} failed, retrying in {:?}",
                snapshot.order_id,
                attempts,
                max_attempts,
                self.config.retry_delay()
            );
            tokio::time::sleep(self.config.retry_delay()).await;
        }

        if let Some(claim) = claim {
            if let Some(url) = result.clip_url.as_deref() {
                claim.publish_result(url).await;
            }
            claim.release().await;
        }

        if let Some(url) = result.clip_url.as_deref() {
            self.dedup.remember_order_clip(&snapshot.order_id, url).await;
        } else if let Some(failure) = result.failure.as_ref() {
            warn!(
                "Order {} proceeding without clip after {} attempt(s): {}",
                snapshot.order_id, attempts, failure
            );
        }

        ClipRun { result, attempts }
    }

    /// One clip attempt: screen, pick an account, hold a pool slot for the
    /// automation call and classify what comes back.
    pub async fn attempt(
        &self,
        snapshot: &OrderSnapshot,
        details: Option<&VideoDetails>,
        attempt_number: u32,
    ) -> ClipAttemptResult {
        let result = self.attempt_inner(snapshot, details, attempt_number).await;
        let label = match &result.failure {
            Some(failure) => failure.kind(),
            None => "success",
        };
        metrics::CLIP_ATTEMPTS.with_label_values(&[label]).inc();
        result
    }

    async fn attempt_inner(
        &self,
        snapshot: &OrderSnapshot,
        details: Option<&VideoDetails>,
        attempt_number: u32,
    ) -> ClipAttemptResult {
        if let Err(failure) = screen(
            &snapshot.video_link,
            details,
            self.config.min_video_duration_secs,
        ) {
            return ClipAttemptResult::failed(failure, None, attempt_number);
        }

        let account = match self.accounts.select_available_account().await {
            Ok(Some(account)) => account,
            Ok(None) => {
                return ClipAttemptResult::failed(
                    ClipFailure::NoAccountAvailable,
                    None,
                    attempt_number,
                )
            }
            Err(e) => {
                warn!("Account pool error for order {}: {}", snapshot.order_id, e);
                return ClipAttemptResult::failed(
                    ClipFailure::NoAccountAvailable,
                    None,
                    attempt_number,
                );
            }
        };

        let permit = match self.pool.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                return ClipAttemptResult::failed(
                    ClipFailure::Interrupted(e.to_string()),
                    Some(account.id),
                    attempt_number,
                )
            }
        };

        info!(
            "Order {} clip attempt {} using account {}",
            snapshot.order_id, attempt_number, account.id
        );
        let title = details.and_then(|d| d.title.as_deref());
        let outcome = self
            .automation
            .create_clip(&snapshot.video_link, &account, title)
            .await;
        permit.release();

        match outcome {
            Ok(Some(url)) if !url.trim().is_empty() => {
                if let Err(e) = self.accounts.record_usage(&account).await {
                    warn!("Failed to record usage for account {}: {}", account.id, e);
                }
                info!("Order {} clip created: {}", snapshot.order_id, url);
                ClipAttemptResult::created(url, account.id, attempt_number)
            }
            Ok(_) => ClipAttemptResult::failed(
                ClipFailure::ClipButtonNotDetected,
                Some(account.id),
                attempt_number,
            ),
            Err(AutomationError::Cancelled) => ClipAttemptResult::failed(
                ClipFailure::Interrupted("automation cancelled".to_string()),
                Some(account.id),
                attempt_number,
            ),
            Err(e) => ClipAttemptResult::failed(
                ClipFailure::AutomationError(e.to_string()),
                Some(account.id),
                attempt_number,
            ),
        }
    }

    async fn fetch_details(&self, snapshot: &OrderSnapshot) -> Option<VideoDetails> {
        let video_id = snapshot.video_id.as_deref()?;
        let lookup = self.metadata.video_details(video_id);
        match tokio::time::timeout(self.config.metadata_timeout(), lookup).await {
            Ok(Ok(details)) => details,
            Ok(Err(e)) => {
                debug!(
                    "Metadata lookup failed for order {}, screening on URL only: {}",
                    snapshot.order_id, e
                );
                None
            }
            Err(_) => {
                warn!(
                    "Metadata lookup for order {} timed out, screening on URL only",
                    snapshot.order_id
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::DedupConfig;
    use crate::kv::{KeyValueStore, MemoryKvStore};
    use crate::testing::{fixtures, MockAccountPool, MockBrowserAutomation, MockVideoMetadata};

    struct Harness {
        engine: ClipAttemptEngine,
        automation: Arc<MockBrowserAutomation>,
        accounts: Arc<MockAccountPool>,
        metadata: Arc<MockVideoMetadata>,
        kv: Arc<MemoryKvStore>,
    }

    fn harness() -> Harness {
        let automation = Arc::new(MockBrowserAutomation::new());
        let accounts = Arc::new(MockAccountPool::with_accounts(1));
        let metadata = Arc::new(MockVideoMetadata::new());
        let kv = Arc::new(MemoryKvStore::new());
        let dedup = DedupCoordinator::new(
            kv.clone(),
            DedupConfig {
                poll_interval_ms: 10,
                max_wait_secs: 1,
                ..DedupConfig::default()
            },
        );
        let config = FulfillmentConfig {
            retry_delay_ms: 1,
            ..FulfillmentConfig::default()
        };
        let engine = ClipAttemptEngine::new(
            metadata.clone(),
            automation.clone(),
            accounts.clone(),
            ResourcePoolGuard::new(2),
            dedup,
            config,
        );
        Harness {
            engine,
            automation,
            accounts,
            metadata,
            kv,
        }
    }

    #[tokio::test]
    async fn test_success_publishes_and_releases() {
        let h = harness();
        let snapshot = fixtures::order_snapshot("order-1", fixtures::WATCH_URL);

        let run = h.engine.create_clip(&snapshot).await;

        assert!(run.clip_created());
        assert_eq!(run.attempts, 1);
        assert_eq!(run.result.source, ClipSource::Created);
        assert_eq!(h.automation.call_count().await, 1);
        assert_eq!(h.accounts.usage_count().await, 1);

        let video = fixtures::VIDEO_ID;
        assert_eq!(
            h.kv.get(&format!("clip:url:{}", video)).await.unwrap(),
            run.result.clip_url
        );
        assert!(h
            .kv
            .get(&format!("clip:lock:{}", video))
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            h.kv.get("order:clip:order-1").await.unwrap(),
            run.result.clip_url
        );
        assert_eq!(h.engine.pool().status().in_use, 0);
    }

    #[tokio::test]
    async fn test_cached_clip_is_reused_without_automation() {
        let h = harness();
        h.kv.set(
            &format!("clip:url:{}", fixtures::VIDEO_ID),
            "https://clip/cached",
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        let run = h
            .engine
            .create_clip(&fixtures::order_snapshot("order-1", fixtures::WATCH_URL))
            .await;

        assert_eq!(run.clip_url(), Some("https://clip/cached"));
        assert_eq!(run.result.source, ClipSource::Reused);
        assert_eq!(run.attempts, 0);
        assert_eq!(h.automation.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_temporary_failures_exhaust_attempts() {
        let h = harness();
        h.automation
            .fail_always(AutomationError::Failed("driver crashed".to_string()))
            .await;

        let run = h
            .engine
            .create_clip(&fixtures::order_snapshot("order-1", fixtures::WATCH_URL))
            .await;

        assert!(!run.clip_created());
        assert_eq!(run.attempts, 3);
        assert_eq!(h.automation.call_count().await, 3);
        assert!(matches!(
            run.result.failure,
            Some(ClipFailure::AutomationError(_))
        ));
        assert!(h
            .kv
            .get(&format!("clip:lock:{}", fixtures::VIDEO_ID))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_retry_recovers_after_missing_button() {
        let h = harness();
        h.automation.push_outcome(Ok(None)).await;

        let run = h
            .engine
            .create_clip(&fixtures::order_snapshot("order-1", fixtures::WATCH_URL))
            .await;

        assert!(run.clip_created());
        assert_eq!(run.attempts, 2);
        assert_eq!(run.result.attempt_number, 2);
    }

    #[tokio::test]
    async fn test_shorts_short_circuit() {
        let h = harness();
        let run = h
            .engine
            .create_clip(&fixtures::order_snapshot(
                "order-1",
                "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            ))
            .await;

        assert_eq!(run.attempts, 1);
        assert!(run.result.permanent);
        assert_eq!(run.result.failure, Some(ClipFailure::ShortsNotSupported));
        assert_eq!(h.automation.call_count().await, 0);
        assert_eq!(h.kv.len().await, 0);
    }

    #[tokio::test]
    async fn test_short_video_rejected_from_metadata() {
        let h = harness();
        h.metadata
            .set_details(fixtures::VIDEO_ID, fixtures::video_details(30))
            .await;

        let run = h
            .engine
            .create_clip(&fixtures::order_snapshot("order-1", fixtures::WATCH_URL))
            .await;

        assert_eq!(
            run.result.failure,
            Some(ClipFailure::VideoTooShort { duration_secs: 30 })
        );
        assert_eq!(h.automation.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_no_account_is_retried() {
        let h = harness();
        h.accounts.set_exhausted(true).await;

        let run = h
            .engine
            .create_clip(&fixtures::order_snapshot("order-1", fixtures::WATCH_URL))
            .await;

        assert_eq!(run.attempts, 3);
        assert_eq!(run.result.failure, Some(ClipFailure::NoAccountAvailable));
        assert_eq!(h.automation.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_cancellation_is_not_retried() {
        let h = harness();
        h.automation.push_outcome(Err(AutomationError::Cancelled)).await;

        let run = h
            .engine
            .create_clip(&fixtures::order_snapshot("order-1", fixtures::WATCH_URL))
            .await;

        assert_eq!(run.attempts, 1);
        assert!(matches!(
            run.result.failure,
            Some(ClipFailure::Interrupted(_))
        ));
    }

    #[tokio::test]
    async fn test_contended_video_times_out_without_automation() {
        let h = harness();
        h.kv.set(
            &format!("clip:lock:{}", fixtures::VIDEO_ID),
            "someone-else",
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        let run = h
            .engine
            .create_clip(&fixtures::order_snapshot("order-1", fixtures::WATCH_URL))
            .await;

        assert_eq!(run.result.failure, Some(ClipFailure::DedupWaitTimedOut));
        assert_eq!(run.attempts, 0);
        assert_eq!(h.automation.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_releases_lock_and_slot() {
        let h = harness();
        h.automation.set_delay(Duration::from_secs(60)).await;
        let snapshot = fixtures::order_snapshot("order-1", fixtures::WATCH_URL);

        let timed_out = tokio::time::timeout(
            Duration::from_millis(50),
            h.engine.create_clip(&snapshot),
        )
        .await;
        assert!(timed_out.is_err());

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.engine.pool().status().in_use, 0);
        assert!(h
            .kv
            .get(&format!("clip:lock:{}", fixtures::VIDEO_ID))
            .await
            .unwrap()
            .is_none());
    }
}
