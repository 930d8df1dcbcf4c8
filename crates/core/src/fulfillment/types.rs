use serde::Serialize;
use thiserror::Error;

use crate::order::{Order, OrderError, OrderStatus};

/// Errors from a transactional phase.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("Order not found: {0}")]
    NotFound(String),

    /// The order is not in a status this phase may move it from.
    #[error("Order {order_id} cannot be processed from status {status}")]
    InvalidStatus {
        order_id: String,
        status: OrderStatus,
    },

    #[error("Order {order_id} kept changing underneath, gave up after {attempts} attempts")]
    ConflictRetriesExhausted { order_id: String, attempts: u32 },

    #[error(transparent)]
    Store(#[from] OrderError),
}

/// Inputs of the finish phase, computed outside any transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishRequest {
    pub clip_created: bool,
    pub clip_url: Option<String>,
    pub coefficient: f64,
    pub required_clicks: u64,
    /// View count observed at start, when known.
    pub start_count: Option<u64>,
}

/// Result of a successful finish phase.
#[derive(Debug, Clone)]
pub struct FinishOutcome {
    pub order: Order,
    /// Set when traffic routing failed and needs manual follow-up.
    pub routing_warning: Option<String>,
}

/// Terminal outcome of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FulfillmentOutcome {
    /// Order moved to `InProgress`.
    Completed {
        coefficient: f64,
        required_clicks: u64,
        clip_url: Option<String>,
        routing_warning: Option<String>,
    },
    /// Order moved to `Holding`.
    Held { reason: String },
    /// Processing refused without any mutation (already processed or not
    /// startable).
    Rejected { status: OrderStatus },
    /// The order left `Processing` while this run was working on it, so
    /// the finish phase was not applied. `status` is what it moved to.
    Superseded { status: OrderStatus },
    /// No such order.
    NotFound,
    /// A failure could not even be persisted. The order may still read
    /// `Processing`; the message must be redelivered.
    Unrecorded { error: String },
}

impl FulfillmentOutcome {
    /// Short label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            FulfillmentOutcome::Completed { .. } => "completed",
            FulfillmentOutcome::Held { .. } => "held",
            FulfillmentOutcome::Rejected { .. } => "rejected",
            FulfillmentOutcome::Superseded { .. } => "superseded",
            FulfillmentOutcome::NotFound => "not_found",
            FulfillmentOutcome::Unrecorded { .. } => "unrecorded",
        }
    }

    /// Whether the triggering message may be acknowledged.
    pub fn is_settled(&self) -> bool {
        !matches!(self, FulfillmentOutcome::Unrecorded { .. })
    }
}
