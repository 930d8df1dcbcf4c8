//! Fulfillment orchestrator.
//!
//! Runs one order end to end:
//! - Start: short transaction, `Pending` to `Processing`
//! - Clip: long, outside any transaction, bounded by the clip deadline
//! - Finish: traffic routing plus a short transaction to `InProgress`
//!
//! Any failure along the way parks the order in `Holding`.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use super::monitoring::MonitoringSnapshot;
use super::transactions::OrderTransactions;
use super::types::{FinishRequest, FulfillmentOutcome, TransitionError};
use crate::audit::{AuditEvent, AuditHandle};
use crate::automation::{AccountPool, BrowserAutomation, TrafficRouter, VideoMetadataProvider};
use crate::clip::{ClipAttemptEngine, ClipAttemptResult, ClipFailure, ClipRun};
use crate::coefficient::DeliveryPlan;
use crate::config::{CoefficientConfig, Config, FulfillmentConfig};
use crate::dedup::{video_key, DedupCoordinator};
use crate::kv::KeyValueStore;
use crate::metrics;
use crate::order::{OrderSnapshot, OrderStore};
use crate::pool::ResourcePoolGuard;

/// External systems the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub orders: Arc<dyn OrderStore>,
    pub kv: Arc<dyn KeyValueStore>,
    pub metadata: Arc<dyn VideoMetadataProvider>,
    pub automation: Arc<dyn BrowserAutomation>,
    pub accounts: Arc<dyn AccountPool>,
    pub router: Arc<dyn TrafficRouter>,
}

/// Drives a single order through start, clip and finish.
pub struct FulfillmentOrchestrator {
    transactions: OrderTransactions,
    engine: ClipAttemptEngine,
    metadata: Arc<dyn VideoMetadataProvider>,
    kv: Arc<dyn KeyValueStore>,
    config: FulfillmentConfig,
    coefficients: CoefficientConfig,
    audit: Option<AuditHandle>,
}

impl FulfillmentOrchestrator {
    /// Create an orchestrator with its own automation pool and dedup
    /// coordinator. Share one instance across all workers of a process.
    pub fn new(config: &Config, deps: Collaborators) -> Self {
        let pool = ResourcePoolGuard::new(config.automation.pool_capacity);
        let dedup = DedupCoordinator::new(Arc::clone(&deps.kv), config.dedup.clone());
        let engine = ClipAttemptEngine::new(
            Arc::clone(&deps.metadata),
            deps.automation,
            deps.accounts,
            pool,
            dedup,
            config.fulfillment.clone(),
        );
        let transactions = OrderTransactions::new(
            deps.orders,
            Arc::clone(&deps.metadata),
            deps.router,
            config.fulfillment.clone(),
        );

        Self {
            transactions,
            engine,
            metadata: deps.metadata,
            kv: deps.kv,
            config: config.fulfillment.clone(),
            coefficients: config.coefficient,
            audit: None,
        }
    }

    /// Record transitions and clip outcomes in the audit trail.
    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.transactions = self.transactions.with_audit(audit.clone());
        self.audit = Some(audit);
        self
    }

    /// Automation pool shared by every order this orchestrator runs.
    pub fn pool(&self) -> &ResourcePoolGuard {
        self.engine.pool()
    }

    pub fn transactions(&self) -> &OrderTransactions {
        &self.transactions
    }

    /// Process one order. Never fails: every error ends in an outcome.
    pub async fn run(&self, order_id: &str) -> FulfillmentOutcome {
        let outcome = match AssertUnwindSafe(self.run_phases(order_id))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Order {} fulfillment panicked: {}", order_id, message);
                self.hold(order_id, format!("fulfillment failed: {}", message))
                    .await
            }
        };

        metrics::ORDERS_TOTAL
            .with_label_values(&[outcome.label()])
            .inc();
        debug!("Order {} finished with outcome {}", order_id, outcome.label());
        outcome
    }

    async fn run_phases(&self, order_id: &str) -> FulfillmentOutcome {
        let snapshot = match self.transactions.start_processing(order_id).await {
            Ok(snapshot) => snapshot,
            Err(TransitionError::NotFound(_)) => {
                warn!("Order {} not found, nothing to process", order_id);
                return FulfillmentOutcome::NotFound;
            }
            Err(TransitionError::InvalidStatus { status, .. }) => {
                info!("Order {} is {}, not processing again", order_id, status);
                return FulfillmentOutcome::Rejected { status };
            }
            Err(e) => return self.fail(order_id, "start processing", &e).await,
        };

        let start_count = self.fetch_start_count(&snapshot).await;

        let run = self.clip_phase(&snapshot).await;
        self.audit_clip(&snapshot, &run).await;

        let plan = DeliveryPlan::calculate(
            snapshot.target_views,
            run.clip_created(),
            &self.coefficients,
        );
        let request = FinishRequest {
            clip_created: run.clip_created(),
            clip_url: run.clip_url().map(String::from),
            coefficient: plan.coefficient,
            required_clicks: plan.required_clicks,
            start_count,
        };

        match self.transactions.finish_processing(order_id, request).await {
            Ok(finish) => {
                MonitoringSnapshot {
                    order_id: snapshot.order_id.clone(),
                    start_count,
                    target_views: snapshot.target_views,
                    required_clicks: plan.required_clicks,
                    coefficient: plan.coefficient,
                    clip_created: run.clip_created(),
                    status: "monitoring".to_string(),
                    started_at: Utc::now(),
                }
                .publish(Arc::clone(&self.kv), self.config.monitoring_ttl());

                FulfillmentOutcome::Completed {
                    coefficient: plan.coefficient,
                    required_clicks: plan.required_clicks,
                    clip_url: finish.order.clip_url,
                    routing_warning: finish.routing_warning,
                }
            }
            Err(TransitionError::NotFound(_)) => {
                warn!("Order {} disappeared before finishing", order_id);
                FulfillmentOutcome::NotFound
            }
            Err(TransitionError::InvalidStatus { status, .. }) => {
                warn!(
                    "Order {} moved to {} while its clip was being made, leaving it",
                    order_id, status
                );
                FulfillmentOutcome::Superseded { status }
            }
            Err(e) => self.fail(order_id, "finish processing", &e).await,
        }
    }

    /// Current view count, also persisted so it is visible during the clip
    /// phase. Failures only cost the number.
    async fn fetch_start_count(&self, snapshot: &OrderSnapshot) -> Option<u64> {
        let video_id = snapshot.video_id.as_deref()?;
        let lookup = self.metadata.view_count(video_id);
        let count = match tokio::time::timeout(self.config.metadata_timeout(), lookup).await {
            Ok(Ok(count)) => count?,
            Ok(Err(e)) => {
                warn!(
                    "Order {} could not read start view count: {}",
                    snapshot.order_id, e
                );
                return None;
            }
            Err(_) => {
                warn!(
                    "Order {} view count lookup timed out after {:?}",
                    snapshot.order_id,
                    self.config.metadata_timeout()
                );
                return None;
            }
        };

        if let Err(e) = self
            .transactions
            .record_start_count(&snapshot.order_id, count)
            .await
        {
            warn!(
                "Order {} could not record start count {}: {}",
                snapshot.order_id, count, e
            );
        }
        Some(count)
    }

    async fn clip_phase(&self, snapshot: &OrderSnapshot) -> ClipRun {
        if !self.config.clip_enabled {
            debug!("Order {} skipping clip, clips are disabled", snapshot.order_id);
            return ClipRun {
                result: ClipAttemptResult::disabled(),
                attempts: 0,
            };
        }

        let deadline = self.config.clip_deadline();
        match tokio::time::timeout(deadline, self.engine.create_clip(snapshot)).await {
            Ok(run) => run,
            Err(_) => {
                warn!(
                    "Order {} clip phase exceeded {}s, continuing without clip",
                    snapshot.order_id,
                    deadline.as_secs()
                );
                ClipRun {
                    result: ClipAttemptResult::failed(
                        ClipFailure::Interrupted(format!(
                            "clip deadline of {}s exceeded",
                            deadline.as_secs()
                        )),
                        None,
                        0,
                    ),
                    attempts: 0,
                }
            }
        }
    }

    async fn audit_clip(&self, snapshot: &OrderSnapshot, run: &ClipRun) {
        let Some(audit) = &self.audit else {
            return;
        };
        audit
            .emit(AuditEvent::ClipResolved {
                order_id: snapshot.order_id.clone(),
                video_key: video_key(snapshot.video_id.as_deref(), &snapshot.video_link),
                source: run.result.source.as_str().to_string(),
                attempts: run.attempts,
                clip_url: run.result.clip_url.clone(),
                failure: run.result.failure.as_ref().map(|f| f.to_string()),
            })
            .await;
    }

    async fn fail(
        &self,
        order_id: &str,
        phase: &str,
        error: &TransitionError,
    ) -> FulfillmentOutcome {
        error!("Order {} {} failed: {}", order_id, phase, error);
        self.hold(order_id, format!("{} failed: {}", phase, error))
            .await
    }

    async fn hold(&self, order_id: &str, reason: String) -> FulfillmentOutcome {
        match self.transactions.fail_processing(order_id, &reason).await {
            Ok(()) => FulfillmentOutcome::Held { reason },
            Err(e) => {
                error!(
                    "Order {} could not be moved to holding ({}): {}",
                    order_id, reason, e
                );
                FulfillmentOutcome::Unrecorded {
                    error: format!("{}; holding failed: {}", reason, e),
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::{
        MetadataError, TrafficRoutingError, TrafficRoutingResult, VideoDetails,
        VideoMetadataProvider,
    };
    use crate::kv::MemoryKvStore;
    use crate::order::{Order, OrderStatus, SqliteOrderStore};
    use crate::testing::{fixtures, MockAccountPool, MockBrowserAutomation, MockVideoMetadata};
    use async_trait::async_trait;
    use std::time::Duration;

    struct PanickingRouter;

    #[async_trait]
    impl TrafficRouter for PanickingRouter {
        async fn create_integration(
            &self,
            _order: &Order,
            _video_id: Option<&str>,
            _clip_created: bool,
            _target_url: &str,
        ) -> Result<TrafficRoutingResult, TrafficRoutingError> {
            panic!("router exploded");
        }
    }

    /// Metadata provider whose lookups never answer.
    struct HangingMetadata;

    #[async_trait]
    impl VideoMetadataProvider for HangingMetadata {
        async fn view_count(&self, _video_id: &str) -> Result<Option<u64>, MetadataError> {
            std::future::pending().await
        }

        async fn video_details(
            &self,
            _video_id: &str,
        ) -> Result<Option<VideoDetails>, MetadataError> {
            std::future::pending().await
        }
    }

    fn orchestrator(
        config: &Config,
        store: Arc<SqliteOrderStore>,
        automation: Arc<MockBrowserAutomation>,
        router: Arc<dyn TrafficRouter>,
    ) -> FulfillmentOrchestrator {
        FulfillmentOrchestrator::new(
            config,
            Collaborators {
                orders: store,
                kv: Arc::new(MemoryKvStore::new()),
                metadata: Arc::new(MockVideoMetadata::new()),
                automation,
                accounts: Arc::new(MockAccountPool::with_accounts(1)),
                router,
            },
        )
    }

    #[tokio::test]
    async fn test_panic_in_phase_holds_order() {
        let store = Arc::new(SqliteOrderStore::in_memory().unwrap());
        let order = store
            .create(fixtures::create_order_request(fixtures::WATCH_URL, 100))
            .unwrap();
        let orchestrator = orchestrator(
            &Config::default(),
            store.clone(),
            Arc::new(MockBrowserAutomation::new()),
            Arc::new(PanickingRouter),
        );

        let outcome = orchestrator.run(&order.id).await;

        match outcome {
            FulfillmentOutcome::Held { reason } => assert!(reason.contains("router exploded")),
            other => panic!("expected Held, got {:?}", other),
        }
        let stored = store.get(&order.id).unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Holding);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clip_deadline_continues_without_clip() {
        let store = Arc::new(SqliteOrderStore::in_memory().unwrap());
        let order = store
            .create(fixtures::create_order_request(fixtures::WATCH_URL, 100))
            .unwrap();
        let mut config = Config::default();
        config.fulfillment.clip_deadline_secs = 5;
        let automation = Arc::new(MockBrowserAutomation::new());
        automation.set_delay(Duration::from_secs(60)).await;
        let orchestrator = orchestrator(
            &config,
            store.clone(),
            automation,
            Arc::new(crate::testing::MockTrafficRouter::new()),
        );

        let outcome = orchestrator.run(&order.id).await;

        match outcome {
            FulfillmentOutcome::Completed {
                coefficient,
                clip_url,
                ..
            } => {
                assert_eq!(coefficient, 4.0);
                assert!(clip_url.is_none());
            }
            other => panic!("expected Completed, got {:?}", other),
        }
        assert_eq!(orchestrator.pool().status().in_use, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_metadata_provider_does_not_stall_order() {
        let store = Arc::new(SqliteOrderStore::in_memory().unwrap());
        let order = store
            .create(fixtures::create_order_request(fixtures::WATCH_URL, 100))
            .unwrap();
        let config = Config::default();
        let orchestrator = FulfillmentOrchestrator::new(
            &config,
            Collaborators {
                orders: store.clone(),
                kv: Arc::new(MemoryKvStore::new()),
                metadata: Arc::new(HangingMetadata),
                automation: Arc::new(MockBrowserAutomation::new()),
                accounts: Arc::new(MockAccountPool::with_accounts(1)),
                router: Arc::new(crate::testing::MockTrafficRouter::new()),
            },
        );

        let outcome = tokio::time::timeout(Duration::from_secs(3600), orchestrator.run(&order.id))
            .await
            .expect("order run finished");

        match outcome {
            FulfillmentOutcome::Completed { clip_url, .. } => assert!(clip_url.is_some()),
            other => panic!("expected Completed, got {:?}", other),
        }
        let stored = store.get(&order.id).unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::InProgress);
        assert!(stored.start_count.is_none());
    }
}
