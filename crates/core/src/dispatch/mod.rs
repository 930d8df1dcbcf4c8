//! Inbound order queue and the dispatcher that feeds it to the orchestrator.
//!
//! Delivery is at-least-once. A message is acknowledged only after its
//! order reached a settled outcome; anything else is redelivered.

mod dispatcher;
mod memory_queue;
mod sqlite_queue;

pub use dispatcher::{DispatchStatus, Dispatcher, Settlement};
pub use memory_queue::MemoryOrderQueue;
pub use sqlite_queue::SqliteOrderQueue;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue backend error: {0}")]
    Backend(String),

    /// The delivery's lease expired or it was already settled.
    #[error("Unknown or expired delivery: {0}")]
    UnknownDelivery(String),
}

/// Work item: one order to fulfill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderMessage {
    pub order_id: String,
    pub user_id: String,
}

impl OrderMessage {
    pub fn new(order_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// A received message, pending ack or nack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Stable id of the queued message.
    pub message_id: String,
    /// Identifies this particular receipt. A redelivery gets a new one.
    pub receipt: String,
    pub message: OrderMessage,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: u32,
}

/// An at-least-once queue of order messages.
#[async_trait]
pub trait OrderQueue: Send + Sync {
    /// Append a message. Returns its message id.
    async fn enqueue(&self, message: OrderMessage) -> Result<String, QueueError>;

    /// Take the next visible message, if any, without waiting.
    async fn receive(&self) -> Result<Option<Delivery>, QueueError>;

    /// Remove the message for good.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Make the message visible again for redelivery.
    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError>;
}
