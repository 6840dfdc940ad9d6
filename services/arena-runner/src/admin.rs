//! Health and metrics listener
//!
//! Only started when `[admin] listen_addr` is configured.
//!
//! Endpoints:
//! - GET /health: run id, uptime, live units, latest status line per unit
//! - GET /metrics: Prometheus text exposition
//! - GET /units/{unit}/history: rolling history of one unit
//! - DELETE /units/{unit}: drop a unit from the live view

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{delete, get};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::status::StatusBoard;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub board: Arc<StatusBoard>,
    pub live_units: Arc<AtomicUsize>,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
}

/// Build the admin router behind a concurrency limit.
pub fn build_router(state: AdminState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/units/{unit}/history", get(history_handler))
        .route("/units/{unit}", delete(remove_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

async fn health_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let units: Vec<serde_json::Value> = state
        .board
        .snapshot()
        .into_iter()
        .map(|u| serde_json::json!({ "unit": u.unit, "status": u.line }))
        .collect();
    let body = serde_json::json!({
        "status": "running",
        "run_id": state.board.run_id().to_string(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "running_units": state.live_units.load(Ordering::Relaxed),
        "units": units,
    });

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

async fn metrics_handler(State(state): State<AdminState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus.render(),
    )
}

async fn history_handler(
    State(state): State<AdminState>,
    Path(unit): Path<String>,
) -> impl IntoResponse {
    let known = state.board.snapshot().iter().any(|u| u.unit == unit);
    if !known {
        return (StatusCode::NOT_FOUND, format!("unknown unit: {unit}")).into_response();
    }
    let body = serde_json::json!({
        "unit": unit,
        "history": state.board.history(&unit),
    });
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

async fn remove_handler(
    State(state): State<AdminState>,
    Path(unit): Path<String>,
) -> StatusCode {
    state.board.remove_unit(&unit);
    StatusCode::NO_CONTENT
}
