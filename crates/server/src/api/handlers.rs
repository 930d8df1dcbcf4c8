use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;
use viewrelay_core::DispatchStatus;

use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::{AppState, OrderCounts};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub clip_enabled: bool,
    pub dispatcher: DispatchStatus,
    pub orders: OrderCounts,
}

pub async fn status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, StatusCode> {
    let orders = state.order_counts().await.map_err(|e| {
        error!("Failed to count orders: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        clip_enabled: state.config().fulfillment.clip_enabled,
        dispatcher: state.dispatcher().status(),
        orders,
    }))
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state).await;
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
