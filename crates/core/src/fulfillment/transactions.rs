//! Short, transactional phases of order fulfillment.
//!
//! Each phase loads the order, applies only the fields it owns and saves
//! with an optimistic version check. On a version conflict the order is
//! reloaded and the same fields are applied again.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::types::{FinishOutcome, FinishRequest, TransitionError};
use crate::audit::{AuditEvent, AuditHandle};
use crate::automation::{TrafficRouter, VideoMetadataProvider};
use crate::config::FulfillmentConfig;
use crate::metrics;
use crate::order::{
    Order, OrderError, OrderSnapshot, OrderStatus, OrderStore, ROUTING_WARNING_PREFIX,
};

/// Performs the start, finish and fail transitions of an order.
pub struct OrderTransactions {
    store: Arc<dyn OrderStore>,
    metadata: Arc<dyn VideoMetadataProvider>,
    router: Arc<dyn TrafficRouter>,
    config: FulfillmentConfig,
    audit: Option<AuditHandle>,
}

impl OrderTransactions {
    pub fn new(
        store: Arc<dyn OrderStore>,
        metadata: Arc<dyn VideoMetadataProvider>,
        router: Arc<dyn TrafficRouter>,
        config: FulfillmentConfig,
    ) -> Self {
        Self {
            store,
            metadata,
            router,
            config,
            audit: None,
        }
    }

    /// Emit order transitions to the audit trail.
    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    /// Move a `Pending` (or stale `Processing`) order to `Processing`.
    ///
    /// Derives and caches the video id on first start. Any other status is
    /// refused with [`TransitionError::InvalidStatus`] and left untouched.
    pub async fn start_processing(&self, order_id: &str) -> Result<OrderSnapshot, TransitionError> {
        let metadata = Arc::clone(&self.metadata);
        let (from, order) = self.apply("start", order_id, |order| {
            if !order.status.is_startable() {
                return Err(TransitionError::InvalidStatus {
                    order_id: order.id.clone(),
                    status: order.status,
                });
            }
            if order.video_id.is_none() {
                order.video_id = metadata.extract_video_id(&order.video_link);
            }
            order.status = OrderStatus::Processing;
            Ok(())
        })?;

        if from == OrderStatus::Processing {
            info!("Order {} resumed from a previous processing run", order.id);
        } else {
            info!("Order {} started processing", order.id);
        }
        self.audit_transition(&order, from, None).await;

        Ok(order.snapshot())
    }

    /// Best-effort record of the view count observed at start.
    ///
    /// Only written while the order is still `Processing`.
    pub async fn record_start_count(&self, order_id: &str, count: u64) -> Result<(), TransitionError> {
        self.apply("start_count", order_id, |order| {
            if order.status != OrderStatus::Processing {
                return Err(TransitionError::InvalidStatus {
                    order_id: order.id.clone(),
                    status: order.status,
                });
            }
            order.start_count = Some(count);
            Ok(())
        })?;
        debug!("Order {} start count {}", order_id, count);
        Ok(())
    }

    /// Route traffic for the order and move it to `InProgress`.
    ///
    /// The traffic router is called once, bounded by
    /// `traffic_routing_timeout`. Its failure never fails the phase: the
    /// order still advances, carrying a `WARNING:` error message.
    pub async fn finish_processing(
        &self,
        order_id: &str,
        request: FinishRequest,
    ) -> Result<FinishOutcome, TransitionError> {
        let current = self
            .store
            .get(order_id)?
            .ok_or_else(|| TransitionError::NotFound(order_id.to_string()))?;
        if current.status != OrderStatus::Processing {
            return Err(TransitionError::InvalidStatus {
                order_id: current.id,
                status: current.status,
            });
        }

        let routing_warning = self.route_traffic(current, &request).await;

        let (from, order) = self.apply("finish", order_id, |order| {
            if order.status != OrderStatus::Processing {
                return Err(TransitionError::InvalidStatus {
                    order_id: order.id.clone(),
                    status: order.status,
                });
            }
            order.coefficient = Some(request.coefficient);
            order.required_clicks = Some(request.required_clicks);
            if let Some(url) = &request.clip_url {
                order.clip_url = Some(url.clone());
            }
            if let Some(count) = request.start_count {
                order.start_count = Some(count);
            }
            if let Some(warning) = &routing_warning {
                order.error_message = Some(warning.clone());
            }
            order.status = OrderStatus::InProgress;
            Ok(())
        })?;

        info!(
            "Order {} in progress: coefficient {}, {} clicks, clip {}",
            order.id,
            request.coefficient,
            request.required_clicks,
            request.clip_url.as_deref().unwrap_or("none")
        );
        self.audit_transition(&order, from, routing_warning.clone())
            .await;
        if let (Some(audit), Some(message)) = (&self.audit, &routing_warning) {
            audit
                .emit(AuditEvent::TrafficRoutingFailed {
                    order_id: order.id.clone(),
                    coefficient: request.coefficient,
                    required_clicks: request.required_clicks,
                    message: message.clone(),
                })
                .await;
        }

        Ok(FinishOutcome {
            order,
            routing_warning,
        })
    }

    /// Park the order in `Holding` with `message`.
    ///
    /// A missing order, or one that already left `Pending`/`Processing`, is
    /// logged and left alone.
    pub async fn fail_processing(&self, order_id: &str, message: &str) -> Result<(), TransitionError> {
        let result = self.apply("fail", order_id, |order| {
            if !order.status.is_startable() {
                return Err(TransitionError::InvalidStatus {
                    order_id: order.id.clone(),
                    status: order.status,
                });
            }
            order.status = OrderStatus::Holding;
            order.error_message = Some(message.to_string());
            Ok(())
        });

        match result {
            Ok((from, order)) => {
                warn!("Order {} moved to holding: {}", order.id, message);
                self.audit_transition(&order, from, Some(message.to_string()))
                    .await;
                Ok(())
            }
            Err(TransitionError::NotFound(_)) => {
                warn!("Order {} vanished before it could be held", order_id);
                Ok(())
            }
            Err(TransitionError::InvalidStatus { status, .. }) => {
                warn!(
                    "Order {} not held, already {} (failure was: {})",
                    order_id, status, message
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Call the traffic router once. Returns the warning to persist, if any.
    async fn route_traffic(&self, mut order: Order, request: &FinishRequest) -> Option<String> {
        order.coefficient = Some(request.coefficient);
        order.required_clicks = Some(request.required_clicks);
        order.clip_url = request.clip_url.clone().or(order.clip_url);
        let target_url = order
            .clip_url
            .clone()
            .unwrap_or_else(|| order.video_link.clone());

        let timeout = self.config.traffic_routing_timeout();
        let call = self.router.create_integration(
            &order,
            order.video_id.as_deref(),
            request.clip_created,
            &target_url,
        );

        let (label, failure) = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) if result.success => {
                info!(
                    "Order {} traffic routed to {} ({} campaigns)",
                    order.id, target_url, result.campaigns_created
                );
                ("success", None)
            }
            Ok(Ok(result)) => ("rejected", Some(result.message)),
            Ok(Err(e)) => ("error", Some(e.to_string())),
            Err(_) => (
                "timeout",
                Some(format!("no response within {}s", timeout.as_secs())),
            ),
        };
        metrics::TRAFFIC_ROUTING.with_label_values(&[label]).inc();

        failure.map(|reason| {
            warn!("Order {} traffic routing failed: {}", order.id, reason);
            format!(
                "{} traffic routing failed: {}. Order moved to in_progress with coefficient {}; set up routing manually",
                ROUTING_WARNING_PREFIX, reason, request.coefficient
            )
        })
    }

    /// Load, mutate and save with conflict retries.
    ///
    /// Returns the status the order had before the mutation and the saved
    /// order.
    fn apply<F>(
        &self,
        phase: &'static str,
        order_id: &str,
        mut mutate: F,
    ) -> Result<(OrderStatus, Order), TransitionError>
    where
        F: FnMut(&mut Order) -> Result<(), TransitionError>,
    {
        let attempts = self.config.max_conflict_retries + 1;
        for attempt in 1..=attempts {
            let mut order = self
                .store
                .get(order_id)?
                .ok_or_else(|| TransitionError::NotFound(order_id.to_string()))?;
            let from = order.status;

            mutate(&mut order)?;
            order.updated_at = Utc::now();

            match self.store.save(&order) {
                Ok(saved) => return Ok((from, saved)),
                Err(OrderError::VersionConflict { expected, found, .. }) => {
                    metrics::CONFLICT_RETRIES.with_label_values(&[phase]).inc();
                    debug!(
                        "Order {} {} phase conflict (v{} vs v{}), attempt {}/{}",
                        order_id, phase, expected, found, attempt, attempts
                    );
                }
                Err(OrderError::NotFound(id)) => return Err(TransitionError::NotFound(id)),
                Err(e) => return Err(e.into()),
            }
        }

        Err(TransitionError::ConflictRetriesExhausted {
            order_id: order_id.to_string(),
            attempts,
        })
    }

    async fn audit_transition(&self, order: &Order, from: OrderStatus, reason: Option<String>) {
        if let Some(audit) = &self.audit {
            audit.order_transition(order, from, reason).await;
        }
    }
}
