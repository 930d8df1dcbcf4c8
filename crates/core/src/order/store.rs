//! Order storage trait and types.

use thiserror::Error;

use super::{Order, OrderStatus};

/// Error type for order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Order not found.
    #[error("Order not found: {0}")]
    NotFound(String),

    /// The stored version moved on since the order was loaded.
    #[error("Version conflict on order {order_id}: expected {expected}, found {found}")]
    VersionConflict {
        order_id: String,
        expected: i64,
        found: i64,
    },

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
}

/// Request to create a new order.
#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub video_link: String,
    pub target_views: u64,
}

/// Filter for querying orders.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    /// Filter by status.
    pub status: Option<OrderStatus>,
    /// Filter by owner.
    pub user_id: Option<String>,
    /// Only orders whose traffic routing needs manual follow-up.
    pub routing_warning: bool,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl OrderFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            status: None,
            user_id: None,
            routing_warning: false,
            limit: 100,
            offset: 0,
        }
    }

    /// Filter by status.
    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filter by owner.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Only orders carrying a traffic-routing warning.
    pub fn with_routing_warning(mut self) -> Self {
        self.routing_warning = true;
        self
    }

    /// Set limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Set offset.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for order storage backends.
///
/// Every call is one short unit of work. Callers never hold anything open
/// across calls.
pub trait OrderStore: Send + Sync {
    /// Create a new order in `Pending`.
    fn create(&self, request: CreateOrderRequest) -> Result<Order, OrderError>;

    /// Get an order by ID.
    fn get(&self, id: &str) -> Result<Option<Order>, OrderError>;

    /// Persist `order` if the stored version still equals `order.version`.
    ///
    /// Returns the saved order with its version bumped, or
    /// `OrderError::VersionConflict` when someone else saved in between.
    fn save(&self, order: &Order) -> Result<Order, OrderError>;

    /// List orders matching the filter, oldest first.
    fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, OrderError>;

    /// Count orders matching the filter.
    fn count(&self, filter: &OrderFilter) -> Result<i64, OrderError>;
}
