use std::sync::Arc;

use tokio::sync::mpsc;

use super::{AuditEventEnvelope, AuditHandle, AuditRecord, AuditStore};

/// Background task that receives audit events and writes them to storage
pub struct AuditWriter {
    rx: mpsc::Receiver<AuditEventEnvelope>,
    store: Arc<dyn AuditStore>,
}

impl AuditWriter {
    pub fn new(rx: mpsc::Receiver<AuditEventEnvelope>, store: Arc<dyn AuditStore>) -> Self {
        Self { rx, store }
    }

    /// Consume events until every `AuditHandle` is dropped.
    ///
    /// Spawn this as a background task.
    pub async fn run(mut self) {
        tracing::info!("Audit writer started");

        while let Some(envelope) = self.rx.recv().await {
            let record = AuditRecord {
                id: 0, // Will be set by database
                timestamp: envelope.timestamp,
                event_type: envelope.event.event_type().to_string(),
                order_id: envelope.event.order_id().map(String::from),
                user_id: envelope.event.user_id().map(String::from),
                data: envelope.event,
            };

            if let Err(e) = self.store.insert(&record) {
                tracing::error!("Failed to write audit event: {}", e);
            }
        }

        tracing::info!("Audit writer shutting down");
    }
}

/// Create a complete audit system
///
/// Returns the `AuditHandle` to clone into components and the `AuditWriter`
/// to spawn with `tokio::spawn(writer.run())`. Emitters wait once
/// `buffer_size` events are queued.
pub fn create_audit_system(
    store: Arc<dyn AuditStore>,
    buffer_size: usize,
) -> (AuditHandle, AuditWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let handle = AuditHandle::new(tx);
    let writer = AuditWriter::new(rx, store);
    (handle, writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEvent, AuditFilter, SqliteAuditStore};

    fn store() -> Arc<SqliteAuditStore> {
        Arc::new(SqliteAuditStore::in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_writer_stores_events_with_ids() {
        let store = store();
        let (handle, writer) = create_audit_system(store.clone(), 10);
        let writer_handle = tokio::spawn(writer.run());

        handle
            .emit(AuditEvent::OrderStateChanged {
                order_id: "o-1".to_string(),
                user_id: "user-1".to_string(),
                from_status: "pending".to_string(),
                to_status: "processing".to_string(),
                reason: None,
            })
            .await;
        drop(handle);
        writer_handle.await.unwrap();

        let records = store.query(&AuditFilter::new()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].order_id.as_deref(), Some("o-1"));
        assert_eq!(records[0].user_id.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn test_writer_waits_for_all_handles_to_drop() {
        let store = store();
        let (main_handle, writer) = create_audit_system(store.clone(), 10);
        let dispatcher_handle = main_handle.clone();

        let writer_handle = tokio::spawn(writer.run());

        dispatcher_handle
            .emit(AuditEvent::DuplicateDeliveryDropped {
                order_id: "o-1".to_string(),
                delivery_id: "d-1".to_string(),
                status: "holding".to_string(),
            })
            .await;
        main_handle
            .emit(AuditEvent::ServiceStopped {
                reason: "graceful_shutdown".to_string(),
            })
            .await;

        drop(main_handle);
        tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        assert!(
            !writer_handle.is_finished(),
            "Writer should still be running with handles alive"
        );

        drop(dispatcher_handle);
        let result =
            tokio::time::timeout(tokio::time::Duration::from_secs(1), writer_handle).await;
        assert!(result.is_ok(), "Writer should exit after all handles dropped");

        assert_eq!(store.count(&AuditFilter::new()).unwrap(), 2);
    }
}
