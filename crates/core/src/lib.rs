pub mod audit;
pub mod automation;
pub mod clip;
pub mod coefficient;
pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod fulfillment;
pub mod kv;
pub mod metrics;
pub mod order;
pub mod pool;
pub mod testing;

pub use audit::{
    create_audit_system, AuditError, AuditEvent, AuditEventEnvelope, AuditFilter, AuditHandle,
    AuditRecord, AuditStore, AuditWriter, SqliteAuditStore,
};
pub use automation::{
    AccountPool, AutomationAccount, AutomationError, BrowserAutomation, ConfiguredAccountPool,
    DisabledAutomation, TrafficRouter, TrafficRoutingError, TrafficRoutingResult,
    UnconfiguredTrafficRouter, UrlMetadataProvider, VideoDetails, VideoMetadataProvider,
};
pub use clip::{ClipAttemptEngine, ClipAttemptResult, ClipFailure, ClipRun, ClipSource};
pub use coefficient::DeliveryPlan;
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError,
};
pub use dedup::DedupCoordinator;
pub use dispatch::{
    Delivery, DispatchStatus, Dispatcher, MemoryOrderQueue, OrderMessage, OrderQueue,
    QueueError, Settlement, SqliteOrderQueue,
};
pub use fulfillment::{Collaborators, FulfillmentOrchestrator, FulfillmentOutcome};
pub use kv::{KeyValueStore, KvError, MemoryKvStore, SqliteKvStore};
pub use order::{Order, OrderError, OrderFilter, OrderStatus, OrderStore, SqliteOrderStore};
pub use pool::{PoolStatus, ResourcePoolGuard};
