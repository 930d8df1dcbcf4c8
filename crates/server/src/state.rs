use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use viewrelay_core::{Config, Dispatcher, OrderError, OrderFilter, OrderStatus, OrderStore};

/// Order totals shown on the status endpoint and exported as gauges.
#[derive(Debug, Clone, Serialize)]
pub struct OrderCounts {
    pub by_status: BTreeMap<&'static str, i64>,
    /// `InProgress` orders whose traffic routing must be set up by hand.
    pub routing_warnings: i64,
}

/// Shared application state
pub struct AppState {
    config: Config,
    dispatcher: Arc<Dispatcher>,
    order_store: Arc<dyn OrderStore>,
}

impl AppState {
    pub fn new(
        config: Config,
        dispatcher: Arc<Dispatcher>,
        order_store: Arc<dyn OrderStore>,
    ) -> Self {
        Self {
            config,
            dispatcher,
            order_store,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        self.dispatcher.as_ref()
    }

    /// Count orders per status off the async runtime.
    pub async fn order_counts(&self) -> Result<OrderCounts, OrderError> {
        let store = Arc::clone(&self.order_store);
        tokio::task::spawn_blocking(move || {
            let mut by_status = BTreeMap::new();
            for status in OrderStatus::ALL {
                let count = store.count(&OrderFilter::new().with_status(status))?;
                by_status.insert(status.as_str(), count);
            }
            let routing_warnings = store.count(
                &OrderFilter::new()
                    .with_status(OrderStatus::InProgress)
                    .with_routing_warning(),
            )?;
            Ok(OrderCounts {
                by_status,
                routing_warnings,
            })
        })
        .await
        .map_err(|e| OrderError::Database(format!("count task failed: {}", e)))?
    }
}
