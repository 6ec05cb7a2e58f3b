//! HTTP server configuration and request routing.
//!
//! Axum router with the fixed ingress contract, request-id injection,
//! tracing, timeout enforcement, and graceful shutdown on SIGTERM or
//! CTRL+C.

use std::{net::SocketAddr, time::Duration};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::{handlers, AppState};

/// Creates the router with all routes and middleware.
pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/process-claim-basic", post(handlers::process_claim_basic))
        .route("/process-claim-extended", post(handlers::process_claim_extended))
        .route("/process-claim-complete", post(handlers::process_claim_complete))
        .route("/processing-modes", get(handlers::processing_modes))
        .route("/task-status/{task_id}", get(handlers::task_status))
        .route(
            "/webhook-status/{webhook_id}",
            get(handlers::webhook_status).delete(handlers::delete_webhook_status),
        )
        .route(
            "/webhook-statuses",
            get(handlers::list_webhook_statuses).delete(handlers::delete_webhook_statuses),
        )
        .route("/webhook-cleanup", post(handlers::webhook_cleanup))
        .route("/dead-letters", get(handlers::list_dead_letters))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Standalone router serving only `/metrics`, for the dedicated listener.
pub fn metrics_router(state: AppState) -> Router {
    Router::new().route("/metrics", get(handlers::metrics)).with_state(state)
}

/// Injects an `X-Request-Id` header into every response.
async fn inject_request_id(req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let mut req = req;
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;
    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", header_value);
    }
    response
}

/// Runs the HTTP server until a shutdown signal arrives.
pub async fn start_server(
    state: AppState,
    request_timeout: Duration,
    addr: SocketAddr,
) -> Result<(), std::io::Error> {
    let app = create_router(state, request_timeout);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}

/// Waits for CTRL+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received CTRL+C, starting graceful shutdown");
        },
        () = terminate => {
            info!("received SIGTERM, starting graceful shutdown");
        },
    }
}
