//! Health aggregation: store, workers, and breakers.

mod common;

use std::{sync::Arc, time::Duration};

use common::{body_json, empty_request, send, test_app, test_app_with};
use courier_queue::worker::Heartbeats;
use http::StatusCode;

#[tokio::test]
async fn stale_worker_board_degrades_health() {
    let heartbeats = Arc::new(Heartbeats::new());
    let app = test_app_with(|mut state| {
        state.heartbeats = vec![heartbeats.clone()];
        state
    });

    let response = send(&app.router, empty_request("GET", "/health")).await;
    assert_eq!(response.status(), StatusCode::OK, "degraded still serves traffic");

    let json = body_json(response).await;
    assert_eq!(json["checks"]["store"]["status"], "up");
    assert_eq!(json["checks"]["workers"]["status"], "down");
    assert_eq!(json["status"], "degraded");
}

#[tokio::test]
async fn healthy_with_live_worker_pool() {
    use courier_core::time::Clock;
    use courier_queue::{MemoryQueue, QueueTask, TaskHandler, TaskQueue, WorkerConfig, WorkerPool};
    use tokio_util::sync::CancellationToken;

    struct NoopHandler;
    impl TaskHandler for NoopHandler {
        fn handle(
            &self,
            _task: QueueTask,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send + '_>>
        {
            Box::pin(async { Ok(()) })
        }
    }

    let mut boards = Vec::new();
    let app = test_app_with(|state| state);
    let queue = Arc::new(MemoryQueue::new(app.clock.clone() as Arc<dyn Clock>));
    let pool = WorkerPool::spawn(
        WorkerConfig {
            worker_count: 1,
            poll_interval: Duration::from_millis(10),
            ..WorkerConfig::delivery()
        },
        queue as Arc<dyn TaskQueue>,
        Arc::new(NoopHandler),
        app.clock.clone() as Arc<dyn Clock>,
        CancellationToken::new(),
    );
    boards.push(pool.heartbeats());

    // Rebuild the app with the live board attached.
    let app = test_app_with(move |mut state| {
        state.heartbeats = boards;
        state
    });

    // Give the worker a moment to beat.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let response = send(&app.router, empty_request("GET", "/health")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["checks"]["workers"]["status"], "up");

    pool.shutdown_graceful().await.unwrap();
}

#[tokio::test]
async fn unhealthy_when_store_unreachable() {
    let app = test_app();
    app.store.inject_error("connection refused").await;

    let response = send(&app.router, empty_request("GET", "/health")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let json = body_json(response).await;
    assert_eq!(json["status"], "unhealthy");
    assert_eq!(json["checks"]["store"]["status"], "down");
}

#[tokio::test]
async fn open_breakers_degrade_health() {
    let app = test_app();
    app.state
        .breakers
        .force_state("https://down.example.com", courier_delivery::CircuitState::Open)
        .await;

    let response = send(&app.router, empty_request("GET", "/health")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(
        json["checks"]["circuit_breakers"]["open_hosts"],
        serde_json::json!(["https://down.example.com"])
    );
}

#[tokio::test]
async fn metrics_endpoint_reports_disabled_without_recorder() {
    let app = test_app();

    let response = send(&app.router, empty_request("GET", "/metrics")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
