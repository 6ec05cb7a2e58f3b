//! HTTP API server and request handling.
//!
//! REST endpoints for claim submission, task and webhook status tracking,
//! cleanup, health, and metrics. Handlers validate input, enqueue work,
//! and read state; all domain behavior lives in the core and delivery
//! crates, injected through [`AppState`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod handlers;
pub mod server;

use std::{sync::Arc, time::Duration};

use courier_core::{status::StatusManager, time::Clock};
use courier_delivery::{circuit::CircuitBreakerRegistry, compute::ClaimProcessor, url_policy::UrlPolicy};
use courier_queue::{worker::Heartbeats, TaskQueue};
use metrics_exporter_prometheus::PrometheusHandle;

pub use config::Config;
pub use server::{create_router, start_server};

/// Shared application state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    /// Lifecycle manager over the status store.
    pub status: Arc<StatusManager>,
    /// Task queue for compute and delivery work.
    pub queue: Arc<dyn TaskQueue>,
    /// Per-destination circuit breakers, surfaced through health.
    pub breakers: Arc<CircuitBreakerRegistry>,
    /// Pluggable claim computation, run inline for synchronous requests.
    pub processor: Arc<dyn ClaimProcessor>,
    /// Destination URL policy applied at ingress.
    pub url_policy: Arc<UrlPolicy>,
    /// Clock shared with the rest of the system.
    pub clock: Arc<dyn Clock>,
    /// Heartbeat boards of the worker pools, one per pool.
    pub heartbeats: Vec<Arc<Heartbeats>>,
    /// Delivery attempt ceiling stamped on new webhook records.
    pub delivery_max_attempts: u32,
    /// Wall-clock ceiling for synchronous (no callback) compute.
    pub sync_compute_timeout: Duration,
    /// Render handle for `/metrics`, absent when metrics are disabled.
    pub metrics_handle: Option<PrometheusHandle>,
}
