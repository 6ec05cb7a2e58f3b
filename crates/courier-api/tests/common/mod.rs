//! Shared wiring for the API test suites.

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use axum::{body::Body, Router};
use courier_api::{create_router, AppState};
use courier_core::{
    status::StatusManager,
    store::{MemoryStore, StatusStore},
    time::Clock,
};
use courier_delivery::{
    circuit::{CircuitBreakerRegistry, CircuitConfig},
    compute::SummaryProcessor,
    url_policy::UrlPolicy,
};
use courier_queue::{MemoryQueue, TaskQueue};
use courier_testing::TestClock;
use http::{Request, Response};
use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub clock: Arc<TestClock>,
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryQueue>,
}

pub fn test_app() -> TestApp {
    test_app_with(|state| state)
}

pub fn test_app_with(customize: impl FnOnce(AppState) -> AppState) -> TestApp {
    let clock = Arc::new(TestClock::new());
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let queue = Arc::new(MemoryQueue::new(clock.clone()).with_capacity(100));
    let status = Arc::new(StatusManager::new(
        store.clone() as Arc<dyn StatusStore>,
        clock.clone() as Arc<dyn Clock>,
    ));
    let breakers = Arc::new(CircuitBreakerRegistry::new(
        CircuitConfig::default(),
        clock.clone() as Arc<dyn Clock>,
    ));

    let state = AppState {
        status,
        queue: queue.clone() as Arc<dyn TaskQueue>,
        breakers,
        processor: Arc::new(SummaryProcessor),
        url_policy: Arc::new(UrlPolicy::new(false, None).unwrap()),
        clock: clock.clone() as Arc<dyn Clock>,
        heartbeats: Vec::new(),
        delivery_max_attempts: 3,
        sync_compute_timeout: Duration::from_secs(5),
        metrics_handle: None,
    };
    let state = customize(state);

    let router = create_router(state.clone(), Duration::from_secs(30));
    TestApp { router, state, clock, store, queue }
}

pub async fn send(router: &Router, request: Request<Body>) -> Response<axum::body::Body> {
    router.clone().oneshot(request).await.expect("request handled")
}

pub async fn body_json(response: Response<axum::body::Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body readable");
    serde_json::from_slice(&bytes).expect("body is JSON")
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request built")
}

pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder().method(method).uri(uri).body(Body::empty()).expect("request built")
}

pub fn claim_body(reference_id: &str, webhook_url: Option<&str>) -> serde_json::Value {
    let mut body = serde_json::json!({
        "reference_id": reference_id,
        "employee_number": "EN-1001",
        "first_name": "Ada",
        "last_name": "Lovelace",
        "crd_number": "1234567",
    });
    if let Some(url) = webhook_url {
        body["webhook_url"] = serde_json::Value::String(url.to_string());
    }
    body
}
