//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Fulfillment (orders by outcome, optimistic-lock retries, traffic routing)
//! - Clip creation (attempts, duration, dedup coordination, automation slots)
//! - Dispatch (queue deliveries)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Fulfillment Metrics
// =============================================================================

/// Orders finished by outcome.
pub static ORDERS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("viewrelay_orders_total", "Orders run through fulfillment"),
        &["outcome"], // "completed", "held", "rejected", "superseded", "not_found", "unrecorded"
    )
    .unwrap()
});

/// Version conflicts retried inside a transactional phase.
pub static CONFLICT_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "viewrelay_conflict_retries_total",
            "Optimistic concurrency conflicts retried",
        ),
        &["phase"], // "start", "finish", "fail", "start_count"
    )
    .unwrap()
});

/// Traffic routing calls by result.
pub static TRAFFIC_ROUTING: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "viewrelay_traffic_routing_total",
            "Traffic routing integration calls",
        ),
        &["result"], // "success", "rejected", "error", "timeout"
    )
    .unwrap()
});

// =============================================================================
// Clip Metrics
// =============================================================================

/// Clip attempts by result.
pub static CLIP_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("viewrelay_clip_attempts_total", "Clip creation attempts"),
        &["result"], // "success" or a failure kind
    )
    .unwrap()
});

/// Duration of the whole clip phase in seconds.
pub static CLIP_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "viewrelay_clip_duration_seconds",
            "Duration of the clip phase",
        )
        .buckets(vec![0.1, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 240.0, 600.0]),
        &["source"], // "created", "reused", "reused_after_wait", "none"
    )
    .unwrap()
});

/// Dedup coordinator events.
pub static DEDUP_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("viewrelay_dedup_events_total", "Dedup coordinator events"),
        &["event"], // "reused", "claimed", "contended", "lock_lost", "wait_hit", "wait_timeout", "unavailable"
    )
    .unwrap()
});

/// Automation slots currently held.
pub static AUTOMATION_SLOTS_IN_USE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "viewrelay_automation_slots_in_use",
        "Automation pool slots currently held",
    )
    .unwrap()
});

// =============================================================================
// Dispatch Metrics
// =============================================================================

/// Queue deliveries by how they were settled.
pub static DELIVERIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("viewrelay_deliveries_total", "Queue deliveries handled"),
        &["result"], // "acked", "dropped", "requeued"
    )
    .unwrap()
});

/// Orders currently being processed by the dispatcher.
pub static ORDERS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "viewrelay_orders_in_flight",
        "Orders currently being fulfilled",
    )
    .unwrap()
});

/// Returns all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Fulfillment
        Box::new(ORDERS_TOTAL.clone()),
        Box::new(CONFLICT_RETRIES.clone()),
        Box::new(TRAFFIC_ROUTING.clone()),
        // Clips
        Box::new(CLIP_ATTEMPTS.clone()),
        Box::new(CLIP_DURATION.clone()),
        Box::new(DEDUP_EVENTS.clone()),
        Box::new(AUTOMATION_SLOTS_IN_USE.clone()),
        // Dispatch
        Box::new(DELIVERIES.clone()),
        Box::new(ORDERS_IN_FLIGHT.clone()),
    ]
}
