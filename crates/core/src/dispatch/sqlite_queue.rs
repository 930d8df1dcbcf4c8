use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::{Delivery, OrderMessage, OrderQueue, QueueError};

/// Table-backed queue with a visibility lease.
///
/// A received message stays invisible for `lease`. If it is neither acked
/// nor nacked by then (worker crashed, process killed), it becomes visible
/// again and is redelivered. Settling requires the current receipt, so a
/// worker whose lease ran out cannot ack a message someone else now holds.
pub struct SqliteOrderQueue {
    conn: Arc<Mutex<Connection>>,
    lease: Duration,
}

impl SqliteOrderQueue {
    pub fn new(path: &Path, lease: Duration) -> Result<Self, QueueError> {
        let conn = Connection::open(path).map_err(backend)?;
        Self::init(conn, lease)
    }

    pub fn in_memory(lease: Duration) -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::init(conn, lease)
    }

    fn init(conn: Connection, lease: Duration) -> Result<Self, QueueError> {
        conn.execute_batch(
            r#"
            PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS order_queue (
                id TEXT PRIMARY KEY,
                order_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                receipt TEXT,
                enqueued_at INTEGER NOT NULL,
                visible_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_order_queue_visible ON order_queue(visible_at);
            "#,
        )
        .map_err(backend)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            lease,
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, i64) -> Result<T, QueueError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| QueueError::Backend("connection mutex poisoned".to_string()))?;
            f(&conn, Utc::now().timestamp_millis())
        })
        .await
        .map_err(|e| QueueError::Backend(e.to_string()))?
    }

    /// Messages not yet acked, visible or leased.
    pub async fn len(&self) -> Result<usize, QueueError> {
        self.with_conn(|conn, _| {
            conn.query_row("SELECT COUNT(*) FROM order_queue", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as usize)
            .map_err(backend)
        })
        .await
    }

    pub async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }
}

fn backend(e: rusqlite::Error) -> QueueError {
    QueueError::Backend(e.to_string())
}

fn lease_millis(lease: Duration) -> i64 {
    i64::try_from(lease.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl OrderQueue for SqliteOrderQueue {
    async fn enqueue(&self, message: OrderMessage) -> Result<String, QueueError> {
        let id = uuid::Uuid::new_v4().to_string();
        let row_id = id.clone();
        self.with_conn(move |conn, now| {
            conn.execute(
                "INSERT INTO order_queue (id, order_id, user_id, enqueued_at, visible_at) VALUES (?, ?, ?, ?, ?)",
                params![row_id, message.order_id, message.user_id, now, now],
            )
            .map_err(backend)
        })
        .await?;
        Ok(id)
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let receipt = uuid::Uuid::new_v4().to_string();
        let lease = lease_millis(self.lease);
        self.with_conn(move |conn, now| {
            conn.query_row(
                "UPDATE order_queue
                 SET receipt = ?1, visible_at = ?2, attempts = attempts + 1
                 WHERE id = (
                     SELECT id FROM order_queue
                     WHERE visible_at <= ?3
                     ORDER BY enqueued_at ASC, rowid ASC
                     LIMIT 1
                 )
                 RETURNING id, order_id, user_id, attempts",
                params![receipt, now.saturating_add(lease), now],
                |row| {
                    Ok(Delivery {
                        message_id: row.get(0)?,
                        receipt: receipt.clone(),
                        message: OrderMessage {
                            order_id: row.get(1)?,
                            user_id: row.get(2)?,
                        },
                        attempt: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(backend)
        })
        .await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let id = delivery.message_id.clone();
        let receipt = delivery.receipt.clone();
        self.with_conn(move |conn, _| {
            let deleted = conn
                .execute(
                    "DELETE FROM order_queue WHERE id = ? AND receipt = ?",
                    params![id, receipt],
                )
                .map_err(backend)?;
            if deleted == 0 {
                return Err(QueueError::UnknownDelivery(receipt));
            }
            Ok(())
        })
        .await
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let id = delivery.message_id.clone();
        let receipt = delivery.receipt.clone();
        self.with_conn(move |conn, now| {
            let updated = conn
                .execute(
                    "UPDATE order_queue SET receipt = NULL, visible_at = ? WHERE id = ? AND receipt = ?",
                    params![now, id, receipt],
                )
                .map_err(backend)?;
            if updated == 0 {
                return Err(QueueError::UnknownDelivery(receipt));
            }
            Ok(())
        })
        .await
    }
}
