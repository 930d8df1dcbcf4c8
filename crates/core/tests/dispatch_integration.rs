//! Dispatch integration tests.
//!
//! Queue -> dispatcher -> orchestrator, checking acknowledgment rules,
//! bounded parallelism and shutdown behavior.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use viewrelay_core::{
    audit::{create_audit_system, AuditEvent, AuditFilter, AuditStore, SqliteAuditStore},
    dispatch::Settlement,
    order::{CreateOrderRequest, OrderFilter},
    testing::{
        fixtures, MockAccountPool, MockBrowserAutomation, MockTrafficRouter, MockVideoMetadata,
    },
    Collaborators, Config, Dispatcher, FulfillmentOrchestrator, FulfillmentOutcome,
    MemoryKvStore, MemoryOrderQueue, Order, OrderError, OrderMessage, OrderQueue, OrderStatus,
    OrderStore, SqliteOrderQueue, SqliteOrderStore,
};

struct TestHarness {
    store: Arc<dyn OrderStore>,
    automation: Arc<MockBrowserAutomation>,
    audit_store: Arc<SqliteAuditStore>,
    config: Config,
    _temp_dir: TempDir,
}

impl TestHarness {
    fn new(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        Self {
            store: Arc::new(SqliteOrderStore::new(&db_path).expect("Failed to create order store")),
            automation: Arc::new(MockBrowserAutomation::new()),
            audit_store: Arc::new(SqliteAuditStore::new(&db_path).unwrap()),
            config,
            _temp_dir: temp_dir,
        }
    }

    fn dispatcher(&self, queue: Arc<dyn OrderQueue>) -> Dispatcher {
        let (audit, writer) = create_audit_system(self.audit_store.clone(), 100);
        tokio::spawn(writer.run());

        let orchestrator = FulfillmentOrchestrator::new(
            &self.config,
            Collaborators {
                orders: self.store.clone(),
                kv: Arc::new(MemoryKvStore::new()),
                metadata: Arc::new(MockVideoMetadata::new()),
                automation: self.automation.clone(),
                accounts: Arc::new(MockAccountPool::with_accounts(2)),
                router: Arc::new(MockTrafficRouter::new()),
            },
        )
        .with_audit(audit.clone());

        Dispatcher::new(queue, Arc::new(orchestrator), self.config.dispatch.clone())
            .with_audit(audit)
    }

    fn create_order(&self, video_id: &str) -> Order {
        self.store
            .create(fixtures::create_order_request(
                &format!("https://www.youtube.com/watch?v={}", video_id),
                100,
            ))
            .unwrap()
    }

    fn status(&self, id: &str) -> OrderStatus {
        self.store.get(id).unwrap().unwrap().status
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.fulfillment.retry_delay_ms = 10;
    config.dispatch.poll_interval_ms = 10;
    config.dispatch.shutdown_grace_secs = 5;
    config
}

fn message_for(order: &Order) -> OrderMessage {
    OrderMessage::new(&order.id, &order.user_id)
}

/// Poll `check` until it holds or five seconds pass.
async fn wait_until<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..500 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_dispatcher_fulfills_queued_orders() {
    let harness = TestHarness::new(test_config());
    let queue = Arc::new(MemoryOrderQueue::new());
    let orders: Vec<Order> = (0..5)
        .map(|i| harness.create_order(&format!("queued{:05}", i)))
        .collect();
    for order in &orders {
        queue.enqueue(message_for(order)).await.unwrap();
    }

    let dispatcher = harness.dispatcher(queue.clone());
    dispatcher.start().await;

    let done = wait_until(|| {
        orders
            .iter()
            .all(|o| harness.status(&o.id) == OrderStatus::InProgress)
    })
    .await;
    dispatcher.stop().await;

    assert!(done, "not every order reached in_progress");
    assert_eq!(queue.ready_len().await, 0);
    assert_eq!(queue.unacked_len().await, 0);
    assert_eq!(dispatcher.status().in_flight, 0);
    assert!(!dispatcher.is_running());
}

#[tokio::test]
async fn test_duplicate_delivery_is_dropped_with_audit() {
    let harness = TestHarness::new(test_config());
    let queue = Arc::new(MemoryOrderQueue::new());
    let order = harness.create_order(fixtures::VIDEO_ID);
    let dispatcher = harness.dispatcher(queue.clone());

    queue.enqueue(message_for(&order)).await.unwrap();
    queue.enqueue(message_for(&order)).await.unwrap();

    let first = queue.receive().await.unwrap().unwrap();
    assert!(matches!(
        dispatcher.process(first).await,
        Settlement::Acked(FulfillmentOutcome::Completed { .. })
    ));

    let second = queue.receive().await.unwrap().unwrap();
    let settlement = dispatcher.process(second.clone()).await;
    assert_eq!(
        settlement,
        Settlement::Dropped {
            status: OrderStatus::InProgress
        }
    );
    assert_eq!(queue.unacked_len().await, 0);
    assert_eq!(harness.automation.call_count().await, 1);

    let filter = AuditFilter::new()
        .with_order_id(&order.id)
        .with_event_type("duplicate_delivery_dropped");
    let found = wait_until(|| harness.audit_store.count(&filter).unwrap() == 1).await;
    assert!(found);
    let records = harness.audit_store.query(&filter).unwrap();
    match &records[0].data {
        AuditEvent::DuplicateDeliveryDropped {
            delivery_id,
            status,
            ..
        } => {
            assert_eq!(delivery_id, &second.message_id);
            assert_eq!(status, "in_progress");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

/// Store that is down for every operation.
struct UnavailableStore;

impl OrderStore for UnavailableStore {
    fn create(&self, _request: CreateOrderRequest) -> Result<Order, OrderError> {
        Err(OrderError::Database("database is locked".to_string()))
    }

    fn get(&self, _id: &str) -> Result<Option<Order>, OrderError> {
        Err(OrderError::Database("database is locked".to_string()))
    }

    fn save(&self, _order: &Order) -> Result<Order, OrderError> {
        Err(OrderError::Database("database is locked".to_string()))
    }

    fn list(&self, _filter: &OrderFilter) -> Result<Vec<Order>, OrderError> {
        Err(OrderError::Database("database is locked".to_string()))
    }

    fn count(&self, _filter: &OrderFilter) -> Result<i64, OrderError> {
        Err(OrderError::Database("database is locked".to_string()))
    }
}

#[tokio::test]
async fn test_unrecorded_failure_is_requeued() {
    let mut harness = TestHarness::new(test_config());
    harness.store = Arc::new(UnavailableStore);
    let queue = Arc::new(MemoryOrderQueue::new());
    let dispatcher = harness.dispatcher(queue.clone());
    queue
        .enqueue(OrderMessage::new("order-1", "user-1"))
        .await
        .unwrap();

    let delivery = queue.receive().await.unwrap().unwrap();
    let settlement = dispatcher.process(delivery).await;

    match settlement {
        Settlement::Requeued { reason } => assert!(reason.contains("database is locked")),
        other => panic!("expected Requeued, got {:?}", other),
    }
    assert_eq!(queue.ready_len().await, 1);
    assert_eq!(queue.unacked_len().await, 0);
    assert_eq!(harness.automation.call_count().await, 0);
}

#[tokio::test]
async fn test_worker_count_bounds_parallel_orders() {
    let mut config = test_config();
    config.dispatch.workers = 2;
    config.automation.pool_capacity = 10;
    let harness = TestHarness::new(config);
    harness
        .automation
        .set_delay(Duration::from_millis(50))
        .await;
    let queue = Arc::new(MemoryOrderQueue::new());
    let orders: Vec<Order> = (0..6)
        .map(|i| harness.create_order(&format!("workers{:04}", i)))
        .collect();
    for order in &orders {
        queue.enqueue(message_for(order)).await.unwrap();
    }

    let dispatcher = harness.dispatcher(queue.clone());
    dispatcher.start().await;
    let done = wait_until(|| {
        orders
            .iter()
            .all(|o| harness.status(&o.id) == OrderStatus::InProgress)
    })
    .await;
    dispatcher.stop().await;

    assert!(done);
    assert_eq!(harness.automation.call_count().await, 6);
    assert!(harness.automation.max_in_flight() <= 2);
}

#[tokio::test]
async fn test_stop_aborts_after_grace_and_message_is_redelivered() {
    let mut config = test_config();
    config.dispatch.shutdown_grace_secs = 0;
    let harness = TestHarness::new(config);
    harness
        .automation
        .set_delay(Duration::from_secs(30))
        .await;
    let queue = Arc::new(SqliteOrderQueue::in_memory(Duration::from_millis(200)).unwrap());
    let order = harness.create_order(fixtures::VIDEO_ID);
    queue.enqueue(message_for(&order)).await.unwrap();

    let dispatcher = harness.dispatcher(queue.clone());
    dispatcher.start().await;
    let started = wait_until(|| dispatcher.status().in_flight == 1).await;
    assert!(started);

    dispatcher.stop().await;

    assert_eq!(dispatcher.status().in_flight, 0);
    assert_eq!(dispatcher.status().automation_pool.in_use, 0);
    // The aborted order is still mid-flight and its message was never acked.
    assert_eq!(harness.status(&order.id), OrderStatus::Processing);
    assert_eq!(queue.len().await.unwrap(), 1);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let redelivered = queue.receive().await.unwrap().unwrap();
    assert_eq!(redelivered.message.order_id, order.id);
    assert_eq!(redelivered.attempt, 2);
}
