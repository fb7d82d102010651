//! Liveness and health endpoints.

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: HealthComponents,
    pub metrics: HealthMetrics,
}

#[derive(Debug, Serialize)]
pub struct HealthComponents {
    pub gateway: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthMetrics {
    pub tracked_rooms: usize,
}

/// Liveness check
pub async fn ping() -> &'static str {
    "pong"
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    let gateway = state.is_gateway_connected();

    let status = if gateway { "healthy" } else { "degraded" };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        components: HealthComponents { gateway },
        metrics: HealthMetrics {
            tracked_rooms: state.registry.len(),
        },
    })
}
