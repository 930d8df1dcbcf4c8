use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Order lifecycle
    OrderStateChanged {
        order_id: String,
        user_id: String,
        from_status: String,
        to_status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Outcome of the clip phase for an order.
    ClipResolved {
        order_id: String,
        video_key: String,
        /// "created", "reused", "reused_after_wait" or "none".
        source: String,
        attempts: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        clip_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failure: Option<String>,
    },

    /// The order advanced but its traffic routing needs manual follow-up.
    TrafficRoutingFailed {
        order_id: String,
        coefficient: f64,
        required_clicks: u64,
        message: String,
    },

    // Dispatch
    /// A redelivered message was acknowledged without processing because
    /// the order had already left a startable status.
    DuplicateDeliveryDropped {
        order_id: String,
        delivery_id: String,
        status: String,
    },
}

impl AuditEvent {
    /// Returns the event type as a string for storage
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::OrderStateChanged { .. } => "order_state_changed",
            Self::ClipResolved { .. } => "clip_resolved",
            Self::TrafficRoutingFailed { .. } => "traffic_routing_failed",
            Self::DuplicateDeliveryDropped { .. } => "duplicate_delivery_dropped",
        }
    }

    /// Extract order_id if this event is order-related
    pub fn order_id(&self) -> Option<&str> {
        match self {
            Self::OrderStateChanged { order_id, .. }
            | Self::ClipResolved { order_id, .. }
            | Self::TrafficRoutingFailed { order_id, .. }
            | Self::DuplicateDeliveryDropped { order_id, .. } => Some(order_id),
            Self::ServiceStarted { .. } | Self::ServiceStopped { .. } => None,
        }
    }

    /// Extract the order owner if the event carries it
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::OrderStateChanged { user_id, .. } => Some(user_id),
            _ => None,
        }
    }
}

/// A stored audit record with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub order_id: Option<String>,
    pub user_id: Option<String>,
    pub data: AuditEvent,
}
