//! Core order data types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of `error_message` on orders that reached `InProgress` without
/// their traffic routing being set up.
pub const ROUTING_WARNING_PREFIX: &str = "WARNING:";

/// Order lifecycle status.
///
/// The fulfillment pipeline only ever moves orders between the first four
/// states. The remaining ones are owned by other systems.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    InProgress,
    Holding,
    Active,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::InProgress,
        OrderStatus::Holding,
        OrderStatus::Active,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    /// Persisted name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::Holding => "holding",
            OrderStatus::Active => "active",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Returns true if processing may (re)start from this status.
    ///
    /// `Processing` is included so an order whose worker died mid-run can be
    /// picked up again on redelivery.
    pub fn is_startable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Processing)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "in_progress" => Ok(OrderStatus::InProgress),
            "holding" => Ok(OrderStatus::Holding),
            "active" => Ok(OrderStatus::Active),
            "completed" => Ok(OrderStatus::Completed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

/// A view order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Owner of the order.
    pub user_id: String,

    /// Link to the target video, as submitted.
    pub video_link: String,

    /// Video id extracted from the link. Derived once when processing
    /// starts, then cached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,

    /// Requested number of views.
    pub target_views: u64,

    /// View count observed when processing began.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_count: Option<u64>,

    pub status: OrderStatus,

    /// Clicks per ordered view. Set together with `required_clicks`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coefficient: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_clicks: Option<u64>,

    /// Clip used as the traffic target, when one was created or reused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_url: Option<String>,

    /// Diagnostic for operators. Never cleared by the pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Optimistic concurrency version, bumped by every save.
    pub version: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Returns true if the order advanced without its traffic routing.
    pub fn has_routing_warning(&self) -> bool {
        self.error_message
            .as_deref()
            .is_some_and(|m| m.starts_with(ROUTING_WARNING_PREFIX))
    }

    /// Read-only copy of the fields needed outside a transaction.
    pub fn snapshot(&self) -> OrderSnapshot {
        OrderSnapshot {
            order_id: self.id.clone(),
            user_id: self.user_id.clone(),
            video_link: self.video_link.clone(),
            video_id: self.video_id.clone(),
            target_views: self.target_views,
        }
    }
}

/// Detached view of an order taken when processing starts.
///
/// Never written back. Every later phase reloads the order instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSnapshot {
    pub order_id: String,
    pub user_id: String,
    pub video_link: String,
    pub video_id: Option<String>,
    pub target_views: u64,
}
