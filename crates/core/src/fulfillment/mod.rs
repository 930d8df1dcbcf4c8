//! Order fulfillment: short state transactions around a long clip phase.
//!
//! ```text
//! pending/processing --start--> processing
//!     --clip phase (no transaction)--> coefficient --finish--> in_progress
//! any failure --fail--> holding
//! ```

mod monitoring;
mod runner;
mod transactions;
mod types;

pub use monitoring::{monitoring_key, MonitoringSnapshot};
pub use runner::{Collaborators, FulfillmentOrchestrator};
pub use transactions::OrderTransactions;
pub use types::{FinishOutcome, FinishRequest, FulfillmentOutcome, TransitionError};
