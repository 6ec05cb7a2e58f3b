//! Health and metrics handlers.
//!
//! Health aggregates store reachability, worker pool liveness, and the
//! circuit breaker snapshot into healthy, degraded, or unhealthy.
//! Metrics exposure is read-only and side-effect free.

use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::AppState;

/// A worker pool is considered live if any heartbeat landed this recently.
const WORKER_LIVENESS_WINDOW: Duration = Duration::from_secs(30);

/// Health check response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service health status.
    pub status: HealthStatus,
    /// When the check was performed.
    pub timestamp: DateTime<Utc>,
    /// Individual component results.
    pub checks: HealthChecks,
    /// Service version.
    pub version: String,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Non-critical issues detected; still serving.
    Degraded,
    /// Critical systems failing.
    Unhealthy,
}

/// Individual component health results.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Status store reachability.
    pub store: ComponentHealth,
    /// Worker pool liveness.
    pub workers: ComponentHealth,
    /// Destinations with an open circuit breaker.
    pub circuit_breakers: BreakerHealth,
}

/// Health of one component.
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    /// Component status.
    pub status: ComponentStatus,
    /// Failure detail when down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Component-level status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is healthy.
    Up,
    /// Component is experiencing issues.
    Down,
}

/// Breaker portion of the health report.
#[derive(Debug, Serialize)]
pub struct BreakerHealth {
    /// Hosts currently refused by their breaker.
    pub open_hosts: Vec<String>,
}

/// `GET /health`
#[instrument(name = "health_check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Response {
    let timestamp = courier_core::time::now_utc(&*state.clock);

    let store = match state.status.ping().await {
        Ok(()) => ComponentHealth { status: ComponentStatus::Up, message: None },
        Err(error) => ComponentHealth {
            status: ComponentStatus::Down,
            message: Some(format!("store unreachable: {error}")),
        },
    };

    let now = state.clock.now_system();
    let workers_alive = !state.heartbeats.is_empty()
        && state
            .heartbeats
            .iter()
            .all(|board| board.alive_within(WORKER_LIVENESS_WINDOW, now));
    let workers = if workers_alive {
        ComponentHealth { status: ComponentStatus::Up, message: None }
    } else {
        ComponentHealth {
            status: ComponentStatus::Down,
            message: Some("no worker heartbeat within 30s".to_string()),
        }
    };

    let open_hosts = state.breakers.open_hosts().await;

    let status = if store.status == ComponentStatus::Down {
        HealthStatus::Unhealthy
    } else if workers.status == ComponentStatus::Down || !open_hosts.is_empty() {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    let response = HealthResponse {
        status,
        timestamp,
        checks: HealthChecks { store, workers, circuit_breakers: BreakerHealth { open_hosts } },
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    debug!(status = ?response.status, "health check completed");

    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response)).into_response()
}

/// `GET /metrics`
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => (StatusCode::OK, handle.render()).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics are disabled\n").into_response(),
    }
}
