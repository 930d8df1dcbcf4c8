//! Prometheus metrics for the worker process.
//!
//! HTTP metrics are recorded by middleware. Order and dispatcher gauges are
//! refreshed from application state right before each scrape. Fulfillment
//! counters live in `viewrelay_core::metrics` and are registered here.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use tracing::warn;

use crate::state::AppState;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "viewrelay_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("viewrelay_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "viewrelay_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Order Metrics (collected dynamically)
// =============================================================================

/// Orders by current status.
pub static ORDERS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("viewrelay_orders_by_status", "Current order count by status"),
        &["status"],
    )
    .unwrap()
});

/// Orders carrying a traffic-routing warning that need manual setup.
pub static ROUTING_WARNINGS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "viewrelay_routing_warnings",
        "In-progress orders whose traffic routing must be set up manually",
    )
    .unwrap()
});

// =============================================================================
// Dispatcher Metrics (collected dynamically)
// =============================================================================

/// Dispatcher running state (1 = running, 0 = stopped).
pub static DISPATCHER_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "viewrelay_dispatcher_running",
        "Whether the queue dispatcher is running (1) or stopped (0)",
    )
    .unwrap()
});

/// Free automation slots.
pub static AUTOMATION_SLOTS_AVAILABLE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "viewrelay_automation_slots_available",
        "Automation pool slots currently free",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Orders
    registry
        .register(Box::new(ORDERS_BY_STATUS.clone()))
        .unwrap();
    registry
        .register(Box::new(ROUTING_WARNINGS.clone()))
        .unwrap();

    // Dispatcher
    registry
        .register(Box::new(DISPATCHER_RUNNING.clone()))
        .unwrap();
    registry
        .register(Box::new(AUTOMATION_SLOTS_AVAILABLE.clone()))
        .unwrap();

    // Core metrics (fulfillment, clips, dispatch)
    for metric in viewrelay_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Refresh gauges from the dispatcher and the order store.
pub async fn collect_dynamic_metrics(state: &AppState) {
    let status = state.dispatcher().status();
    DISPATCHER_RUNNING.set(if status.running { 1 } else { 0 });
    let pool = &status.automation_pool;
    AUTOMATION_SLOTS_AVAILABLE.set(pool.capacity.saturating_sub(pool.in_use) as i64);

    match state.order_counts().await {
        Ok(counts) => {
            for (status, count) in counts.by_status {
                ORDERS_BY_STATUS.with_label_values(&[status]).set(count);
            }
            ROUTING_WARNINGS.set(counts.routing_warnings);
        }
        Err(e) => warn!("Failed to count orders for metrics: {}", e),
    }
}

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    static UUID: Lazy<regex_lite::Regex> = Lazy::new(|| {
        regex_lite::Regex::new(
            r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
        )
        .unwrap()
    });
    static NUMERIC: Lazy<regex_lite::Regex> =
        Lazy::new(|| regex_lite::Regex::new(r"/\d+(/|$)").unwrap());

    let result = UUID.replace_all(path, "{id}");
    let result = NUMERIC.replace_all(&result, "/{id}$1");
    result.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_uuid() {
        let path = "/api/v1/orders/550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(normalize_path(path), "/api/v1/orders/{id}");
    }

    #[test]
    fn test_normalize_path_numeric() {
        assert_eq!(normalize_path("/api/v1/queue/12345"), "/api/v1/queue/{id}");
        assert_eq!(
            normalize_path("/api/v1/queue/12/attempt/2"),
            "/api/v1/queue/{id}/attempt/{id}"
        );
    }

    #[test]
    fn test_normalize_path_no_ids() {
        assert_eq!(normalize_path("/api/v1/health"), "/api/v1/health");
    }

    #[test]
    fn test_encode_metrics_returns_prometheus_format() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let output = encode_metrics();
        assert!(output.contains("viewrelay_http_requests_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_registry_includes_core_metrics() {
        viewrelay_core::metrics::ORDERS_TOTAL
            .with_label_values(&["completed"])
            .inc();
        ORDERS_BY_STATUS.with_label_values(&["pending"]).set(0);
        DISPATCHER_RUNNING.set(0);

        let output = encode_metrics();
        assert!(output.contains("viewrelay_orders_total"));
        assert!(output.contains("viewrelay_orders_by_status"));
        assert!(output.contains("viewrelay_dispatcher_running"));
    }
}
