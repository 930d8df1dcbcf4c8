//! Queue consumer.
//!
//! Pulls order messages with bounded parallelism and hands each to the
//! fulfillment orchestrator in its own task:
//! - a worker slot is taken before receiving, so no lease ticks on a
//!   message nobody can work on yet
//! - ack only after a settled outcome; unrecorded failures and panics nack
//! - stop waits for in-flight orders, then aborts what is left

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::{Delivery, OrderQueue};
use crate::audit::{AuditEvent, AuditHandle};
use crate::config::DispatchConfig;
use crate::fulfillment::{FulfillmentOrchestrator, FulfillmentOutcome};
use crate::metrics;
use crate::order::OrderStatus;
use crate::pool::PoolStatus;

/// What happened to a delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// Processed to a settled outcome and acknowledged.
    Acked(FulfillmentOutcome),
    /// Redelivery of an order that already left a startable status.
    /// Acknowledged without side effects.
    Dropped { status: OrderStatus },
    /// Left for redelivery.
    Requeued { reason: String },
}

/// Snapshot of the dispatcher for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchStatus {
    pub running: bool,
    pub workers: usize,
    pub in_flight: usize,
    pub automation_pool: PoolStatus,
}

struct Shared {
    queue: Arc<dyn OrderQueue>,
    orchestrator: Arc<FulfillmentOrchestrator>,
    audit: Option<AuditHandle>,
    in_flight: AtomicUsize,
}

/// Counts a delivery as in flight until dropped, abort included.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        metrics::ORDERS_IN_FLIGHT.inc();
        Self(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
        metrics::ORDERS_IN_FLIGHT.dec();
    }
}

impl Shared {
    async fn process(&self, delivery: Delivery) -> Settlement {
        let _in_flight = InFlightGuard::new(&self.in_flight);
        let order_id = delivery.message.order_id.clone();
        debug!(
            "Processing order {} (message {}, attempt {})",
            order_id, delivery.message_id, delivery.attempt
        );

        let run = AssertUnwindSafe(self.orchestrator.run(&order_id))
            .catch_unwind()
            .await;

        let settlement = match run {
            Ok(FulfillmentOutcome::Rejected { status }) => {
                warn!(
                    "Dropping duplicate delivery {} for order {} (already {})",
                    delivery.message_id, order_id, status
                );
                if let Some(audit) = &self.audit {
                    audit
                        .emit(AuditEvent::DuplicateDeliveryDropped {
                            order_id: order_id.clone(),
                            delivery_id: delivery.message_id.clone(),
                            status: status.as_str().to_string(),
                        })
                        .await;
                }
                Settlement::Dropped { status }
            }
            Ok(FulfillmentOutcome::Superseded { status }) => {
                info!(
                    "Order {} changed to {} during delivery {}, acknowledging",
                    order_id, status, delivery.message_id
                );
                Settlement::Acked(FulfillmentOutcome::Superseded { status })
            }
            Ok(FulfillmentOutcome::Unrecorded { error }) => Settlement::Requeued { reason: error },
            Ok(outcome) => Settlement::Acked(outcome),
            Err(_) => Settlement::Requeued {
                reason: "fulfillment task panicked".to_string(),
            },
        };

        let label = match &settlement {
            Settlement::Acked(_) => "acked",
            Settlement::Dropped { .. } => "dropped",
            Settlement::Requeued { .. } => "requeued",
        };
        metrics::DELIVERIES.with_label_values(&[label]).inc();

        let result = match &settlement {
            Settlement::Requeued { reason } => {
                error!(
                    "Order {} not settled, leaving message {} for redelivery: {}",
                    order_id, delivery.message_id, reason
                );
                self.queue.nack(&delivery).await
            }
            _ => self.queue.ack(&delivery).await,
        };
        if let Err(e) = result {
            warn!(
                "Could not settle message {} for order {}: {}",
                delivery.message_id, order_id, e
            );
        }

        settlement
    }
}

/// Consumes an [`OrderQueue`] and runs each order through the orchestrator.
pub struct Dispatcher {
    shared: Arc<Shared>,
    config: DispatchConfig,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn OrderQueue>,
        orchestrator: Arc<FulfillmentOrchestrator>,
        config: DispatchConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shared: Arc::new(Shared {
                queue,
                orchestrator,
                audit: None,
                in_flight: AtomicUsize::new(0),
            }),
            config,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            loop_handle: Mutex::new(None),
        }
    }

    /// Record dropped duplicate deliveries in the audit trail.
    ///
    /// Must be called before `start`.
    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.audit = Some(audit),
            None => warn!("Dispatcher already started, audit handle ignored"),
        }
        self
    }

    /// Start the receive loop (spawns a background task).
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Dispatcher already running");
            return;
        }

        info!(
            "Starting dispatcher with {} workers",
            self.config.workers
        );
        let handle = tokio::spawn(receive_loop(
            Arc::clone(&self.shared),
            self.config.clone(),
            self.shutdown_tx.subscribe(),
        ));
        *self.loop_handle.lock().await = Some(handle);
    }

    /// Stop receiving, wait for in-flight orders up to the shutdown grace,
    /// then abort the rest. Aborted messages stay unacknowledged.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Dispatcher not running");
            return;
        }

        info!("Stopping dispatcher");
        let _ = self.shutdown_tx.send(());

        if let Some(handle) = self.loop_handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Dispatcher loop ended abnormally: {}", e);
            }
        }
        info!("Dispatcher stopped");
    }

    /// Process one delivery and settle it on the queue.
    pub async fn process(&self, delivery: Delivery) -> Settlement {
        self.shared.process(delivery).await
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> DispatchStatus {
        DispatchStatus {
            running: self.is_running(),
            workers: self.config.workers,
            in_flight: self.shared.in_flight.load(Ordering::SeqCst),
            automation_pool: self.shared.orchestrator.pool().status(),
        }
    }
}

async fn receive_loop(
    shared: Arc<Shared>,
    config: DispatchConfig,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let workers = Arc::new(Semaphore::new(config.workers));
    let mut tasks = JoinSet::new();

    loop {
        let permit = tokio::select! {
            _ = shutdown_rx.recv() => break,
            permit = Arc::clone(&workers).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        match shared.queue.receive().await {
            Ok(Some(delivery)) => {
                let shared = Arc::clone(&shared);
                tasks.spawn(async move {
                    let _permit = permit;
                    shared.process(delivery).await;
                });
            }
            Ok(None) => {
                drop(permit);
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(config.poll_interval()) => {}
                }
            }
            Err(e) => {
                drop(permit);
                warn!("Failed to receive from order queue: {}", e);
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(config.poll_interval()) => {}
                }
            }
        }

        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                error!("Dispatch task failed: {}", e);
            }
        }
    }

    if tasks.is_empty() {
        return;
    }

    info!(
        "Waiting up to {}s for {} in-flight orders",
        config.shutdown_grace_secs,
        tasks.len()
    );
    let drained = tokio::time::timeout(config.shutdown_grace(), async {
        while tasks.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            "Aborting {} orders still in flight after shutdown grace",
            tasks.len()
        );
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::audit::{create_audit_system, AuditFilter, AuditStore, SqliteAuditStore};
    use crate::config::Config;
    use crate::dispatch::{MemoryOrderQueue, OrderMessage};
    use crate::fulfillment::Collaborators;
    use crate::kv::MemoryKvStore;
    use crate::order::{OrderStore, SqliteOrderStore};
    use crate::testing::{
        fixtures, MockAccountPool, MockBrowserAutomation, MockTrafficRouter, MockVideoMetadata,
    };

    fn dispatcher(
        store: Arc<SqliteOrderStore>,
        queue: Arc<MemoryOrderQueue>,
    ) -> Dispatcher {
        dispatcher_with_automation(store, queue, Arc::new(MockBrowserAutomation::new()))
    }

    fn dispatcher_with_automation(
        store: Arc<SqliteOrderStore>,
        queue: Arc<MemoryOrderQueue>,
        automation: Arc<MockBrowserAutomation>,
    ) -> Dispatcher {
        let config = Config::default();
        let orchestrator = FulfillmentOrchestrator::new(
            &config,
            Collaborators {
                orders: store,
                kv: Arc::new(MemoryKvStore::new()),
                metadata: Arc::new(MockVideoMetadata::new()),
                automation,
                accounts: Arc::new(MockAccountPool::with_accounts(1)),
                router: Arc::new(MockTrafficRouter::new()),
            },
        );
        Dispatcher::new(queue, Arc::new(orchestrator), config.dispatch)
    }

    #[tokio::test]
    async fn test_process_acks_completed_order() {
        let store = Arc::new(SqliteOrderStore::in_memory().unwrap());
        let queue = Arc::new(MemoryOrderQueue::new());
        let order = store
            .create(fixtures::create_order_request(fixtures::WATCH_URL, 10))
            .unwrap();
        queue
            .enqueue(OrderMessage::new(&order.id, &order.user_id))
            .await
            .unwrap();
        let dispatcher = dispatcher(store, queue.clone());

        let delivery = queue.receive().await.unwrap().unwrap();
        let settlement = dispatcher.process(delivery).await;

        assert!(matches!(
            settlement,
            Settlement::Acked(FulfillmentOutcome::Completed { .. })
        ));
        assert_eq!(queue.unacked_len().await, 0);
        assert_eq!(queue.ready_len().await, 0);
        assert_eq!(dispatcher.status().in_flight, 0);
    }

    #[tokio::test]
    async fn test_process_drops_duplicate() {
        let store = Arc::new(SqliteOrderStore::in_memory().unwrap());
        let queue = Arc::new(MemoryOrderQueue::new());
        let mut order = store
            .create(fixtures::create_order_request(fixtures::WATCH_URL, 10))
            .unwrap();
        order.status = OrderStatus::Holding;
        store.save(&order).unwrap();
        queue
            .enqueue(OrderMessage::new(&order.id, &order.user_id))
            .await
            .unwrap();
        let dispatcher = dispatcher(store, queue.clone());

        let delivery = queue.receive().await.unwrap().unwrap();
        let settlement = dispatcher.process(delivery).await;

        assert_eq!(
            settlement,
            Settlement::Dropped {
                status: OrderStatus::Holding
            }
        );
        assert_eq!(queue.unacked_len().await, 0);
    }

    #[tokio::test]
    async fn test_process_acks_order_changed_mid_run_without_duplicate_event() {
        let store = Arc::new(SqliteOrderStore::in_memory().unwrap());
        let queue = Arc::new(MemoryOrderQueue::new());
        let order = store
            .create(fixtures::create_order_request(fixtures::WATCH_URL, 10))
            .unwrap();
        queue
            .enqueue(OrderMessage::new(&order.id, &order.user_id))
            .await
            .unwrap();
        let automation = Arc::new(MockBrowserAutomation::new());
        automation.set_delay(Duration::from_millis(200)).await;
        let audit_store = Arc::new(SqliteAuditStore::in_memory().unwrap());
        let (audit, writer) = create_audit_system(audit_store.clone(), 16);
        let writer = tokio::spawn(writer.run());
        let dispatcher = dispatcher_with_automation(store.clone(), queue.clone(), automation)
            .with_audit(audit);

        let delivery = queue.receive().await.unwrap().unwrap();
        let running = tokio::spawn(async move {
            let settlement = dispatcher.process(delivery).await;
            drop(dispatcher);
            settlement
        });

        // Cancelled by an operator while the clip is being made.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut current = store.get(&order.id).unwrap().unwrap();
        assert_eq!(current.status, OrderStatus::Processing);
        current.status = OrderStatus::Cancelled;
        store.save(&current).unwrap();

        let settlement = running.await.unwrap();
        assert_eq!(
            settlement,
            Settlement::Acked(FulfillmentOutcome::Superseded {
                status: OrderStatus::Cancelled
            })
        );
        assert_eq!(queue.unacked_len().await, 0);
        assert_eq!(
            store.get(&order.id).unwrap().unwrap().status,
            OrderStatus::Cancelled
        );

        writer.await.unwrap();
        let dropped = audit_store
            .query(&AuditFilter::new().with_event_type("duplicate_delivery_dropped"))
            .unwrap();
        assert!(dropped.is_empty());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let store = Arc::new(SqliteOrderStore::in_memory().unwrap());
        let dispatcher = dispatcher(store, Arc::new(MemoryOrderQueue::new()));
        dispatcher.stop().await;
        assert!(!dispatcher.status().running);
    }
}
