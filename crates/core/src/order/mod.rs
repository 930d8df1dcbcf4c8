//! Order records, as far as the fulfillment pipeline reads and writes them.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteOrderStore;
pub use store::{CreateOrderRequest, OrderError, OrderFilter, OrderStore};
pub use types::{Order, OrderSnapshot, OrderStatus, ROUTING_WARNING_PREFIX};
