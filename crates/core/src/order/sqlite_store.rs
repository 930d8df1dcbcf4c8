//! SQLite-backed order store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{
    CreateOrderRequest, Order, OrderError, OrderFilter, OrderStatus, OrderStore,
    ROUTING_WARNING_PREFIX,
};

const SELECT_COLUMNS: &str = "id, user_id, video_link, video_id, target_views, start_count, status, coefficient, required_clicks, clip_url, error_message, version, created_at, updated_at";

/// SQLite-backed order store.
pub struct SqliteOrderStore {
    conn: Mutex<Connection>,
}

impl SqliteOrderStore {
    /// Create a new SQLite order store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, OrderError> {
        let conn = Connection::open(path).map_err(|e| OrderError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite order store (useful for testing).
    pub fn in_memory() -> Result<Self, OrderError> {
        let conn =
            Connection::open_in_memory().map_err(|e| OrderError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), OrderError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                video_link TEXT NOT NULL,
                video_id TEXT,
                target_views INTEGER NOT NULL,
                start_count INTEGER,
                status TEXT NOT NULL,
                coefficient REAL,
                required_clicks INTEGER,
                clip_url TEXT,
                error_message TEXT,
                version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);
            CREATE INDEX IF NOT EXISTS idx_orders_user_id ON orders(user_id);
            CREATE INDEX IF NOT EXISTS idx_orders_video_id ON orders(video_id);
            "#,
        )
        .map_err(|e| OrderError::Database(e.to_string()))?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, OrderError> {
        self.conn
            .lock()
            .map_err(|_| OrderError::Database("connection mutex poisoned".to_string()))
    }

    fn build_where_clause(filter: &OrderFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(ref user_id) = filter.user_id {
            conditions.push("user_id = ?");
            params.push(Box::new(user_id.clone()));
        }

        if filter.routing_warning {
            conditions.push("error_message LIKE ?");
            params.push(Box::new(format!("{}%", ROUTING_WARNING_PREFIX)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_order(row: &rusqlite::Row) -> rusqlite::Result<Order> {
        let status_str: String = row.get(6)?;
        let created_at_str: String = row.get(12)?;
        let updated_at_str: String = row.get(13)?;

        let status = status_str.parse::<OrderStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?;

        Ok(Order {
            id: row.get(0)?,
            user_id: row.get(1)?,
            video_link: row.get(2)?,
            video_id: row.get(3)?,
            target_views: row.get::<_, i64>(4)? as u64,
            start_count: row.get::<_, Option<i64>>(5)?.map(|c| c as u64),
            status,
            coefficient: row.get(7)?,
            required_clicks: row.get::<_, Option<i64>>(8)?.map(|c| c as u64),
            clip_url: row.get(9)?,
            error_message: row.get(10)?,
            version: row.get(11)?,
            created_at: parse_timestamp(&created_at_str),
            updated_at: parse_timestamp(&updated_at_str),
        })
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<Order>, OrderError> {
        let result = conn.query_row(
            &format!("SELECT {} FROM orders WHERE id = ?", SELECT_COLUMNS),
            params![id],
            Self::row_to_order,
        );

        match result {
            Ok(order) => Ok(Some(order)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(OrderError::Database(e.to_string())),
        }
    }
}

// Timestamps are always written as RFC 3339 by this store.
fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl OrderStore for SqliteOrderStore {
    fn create(&self, request: CreateOrderRequest) -> Result<Order, OrderError> {
        let conn = self.lock()?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO orders (id, user_id, video_link, target_views, status, version, created_at, updated_at) VALUES (?, ?, ?, ?, ?, 0, ?, ?)",
            params![
                id,
                request.user_id,
                request.video_link,
                request.target_views as i64,
                OrderStatus::Pending.as_str(),
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| OrderError::Database(e.to_string()))?;

        Ok(Order {
            id,
            user_id: request.user_id,
            video_link: request.video_link,
            video_id: None,
            target_views: request.target_views,
            start_count: None,
            status: OrderStatus::Pending,
            coefficient: None,
            required_clicks: None,
            clip_url: None,
            error_message: None,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    fn get(&self, id: &str) -> Result<Option<Order>, OrderError> {
        let conn = self.lock()?;
        Self::fetch(&conn, id)
    }

    fn save(&self, order: &Order) -> Result<Order, OrderError> {
        let conn = self.lock()?;

        let next_version = order.version + 1;
        let updated = conn
            .execute(
                "UPDATE orders SET video_id = ?, start_count = ?, status = ?, coefficient = ?, required_clicks = ?, clip_url = ?, error_message = ?, version = ?, updated_at = ? WHERE id = ? AND version = ?",
                params![
                    order.video_id,
                    order.start_count.map(|c| c as i64),
                    order.status.as_str(),
                    order.coefficient,
                    order.required_clicks.map(|c| c as i64),
                    order.clip_url,
                    order.error_message,
                    next_version,
                    order.updated_at.to_rfc3339(),
                    order.id,
                    order.version,
                ],
            )
            .map_err(|e| OrderError::Database(e.to_string()))?;

        if updated == 0 {
            // Either gone or saved by someone else since it was loaded.
            return match Self::fetch(&conn, &order.id)? {
                Some(current) => Err(OrderError::VersionConflict {
                    order_id: order.id.clone(),
                    expected: order.version,
                    found: current.version,
                }),
                None => Err(OrderError::NotFound(order.id.clone())),
            };
        }

        Ok(Order {
            version: next_version,
            ..order.clone()
        })
    }

    fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, OrderError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {} FROM orders {} ORDER BY created_at ASC, rowid ASC LIMIT ? OFFSET ?",
            SELECT_COLUMNS, where_clause
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| OrderError::Database(e.to_string()))?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_order)
            .map_err(|e| OrderError::Database(e.to_string()))?;

        let mut orders = Vec::new();
        for row_result in rows {
            orders.push(row_result.map_err(|e| OrderError::Database(e.to_string()))?);
        }

        Ok(orders)
    }

    fn count(&self, filter: &OrderFilter) -> Result<i64, OrderError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!("SELECT COUNT(*) FROM orders {}", where_clause);

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let count: i64 = conn
            .query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| OrderError::Database(e.to_string()))?;

        Ok(count)
    }
}
