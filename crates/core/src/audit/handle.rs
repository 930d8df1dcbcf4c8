use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::AuditEvent;
use crate::order::{Order, OrderStatus};

/// Envelope wrapping an audit event with metadata
#[derive(Debug, Clone)]
pub struct AuditEventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
}

impl AuditEventEnvelope {
    fn now(event: AuditEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Handle for emitting audit events
///
/// Cheap to clone. Events go through a bounded channel to the `AuditWriter`.
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditEventEnvelope>,
}

impl AuditHandle {
    pub fn new(tx: mpsc::Sender<AuditEventEnvelope>) -> Self {
        Self { tx }
    }

    /// Emit an audit event, waiting for channel capacity.
    ///
    /// A closed channel is logged; the caller never fails.
    pub async fn emit(&self, event: AuditEvent) {
        if let Err(e) = self.tx.send(AuditEventEnvelope::now(event)).await {
            tracing::error!("Failed to emit audit event: {}", e);
        }
    }

    /// Record a status transition of `order`.
    pub async fn order_transition(
        &self,
        order: &Order,
        from: OrderStatus,
        reason: Option<String>,
    ) {
        self.emit(AuditEvent::OrderStateChanged {
            order_id: order.id.clone(),
            user_id: order.user_id.clone(),
            from_status: from.as_str().to_string(),
            to_status: order.status.as_str().to_string(),
            reason,
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[tokio::test]
    async fn test_emit_event() {
        let (tx, mut rx) = mpsc::channel(10);
        let handle = AuditHandle::new(tx);

        handle
            .emit(AuditEvent::ServiceStarted {
                version: "0.1.0".to_string(),
                config_hash: "abc123".to_string(),
            })
            .await;

        let envelope = rx.recv().await.expect("Should receive event");
        assert!(matches!(envelope.event, AuditEvent::ServiceStarted { .. }));
    }

    #[tokio::test]
    async fn test_order_transition_event() {
        let (tx, mut rx) = mpsc::channel(10);
        let handle = AuditHandle::new(tx);

        let mut order = fixtures::order(fixtures::WATCH_URL, 1000);
        order.status = OrderStatus::Holding;
        handle
            .order_transition(&order, OrderStatus::Processing, Some("boom".to_string()))
            .await;

        let envelope = rx.recv().await.expect("Should receive event");
        match envelope.event {
            AuditEvent::OrderStateChanged {
                order_id,
                from_status,
                to_status,
                reason,
                ..
            } => {
                assert_eq!(order_id, order.id);
                assert_eq!(from_status, "processing");
                assert_eq!(to_status, "holding");
                assert_eq!(reason.as_deref(), Some("boom"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_emit_closed_channel() {
        let (tx, rx) = mpsc::channel::<AuditEventEnvelope>(10);
        let handle = AuditHandle::new(tx);
        drop(rx);

        // Logged, not propagated
        handle
            .emit(AuditEvent::ServiceStopped {
                reason: "test".to_string(),
            })
            .await;
    }
}
