//! Claim submission contract: async acceptance, sync results, validation.

mod common;

use std::time::Duration;

use common::{body_json, claim_body, empty_request, json_request, send, test_app};
use courier_core::models::{TaskId, TaskStatus, WebhookId, WebhookStatus};
use courier_queue::{QueueName, TaskPayload, TaskQueue};
use http::StatusCode;

#[tokio::test]
async fn claim_with_callback_is_queued_with_202() {
    let app = test_app();
    let body = claim_body("REF1", Some("https://client.example.com/hook"));

    let response = send(&app.router, json_request("POST", "/process-claim-basic", body)).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let json = body_json(response).await;
    assert_eq!(json["status"], "processing_queued");
    assert_eq!(json["reference_id"], "REF1");
    let task_id: TaskId = json["task_id"].as_str().unwrap().parse().unwrap();

    // Task record is QUEUED.
    let task = app.state.status.get_task(task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.reference_id, "REF1");

    // Webhook record is pending before compute starts.
    let webhook_id = WebhookId::new("REF1", task_id);
    let record = app.state.status.get(&webhook_id).await.unwrap().unwrap();
    assert_eq!(record.status, WebhookStatus::Pending);
    assert_eq!(record.attempts, 0);
    assert_eq!(record.max_attempts, 3);

    // One compute task waits in FIFO order.
    let leased = app
        .queue
        .dequeue(QueueName::Compute, Duration::from_secs(60))
        .await
        .unwrap()
        .expect("compute task enqueued");
    match &leased.task.payload {
        TaskPayload::Compute(payload) => {
            assert_eq!(payload.envelope.reference_id, "REF1");
        },
        TaskPayload::Deliver(_) => panic!("expected compute task"),
    }
}

#[tokio::test]
async fn claim_without_callback_computes_inline() {
    let app = test_app();
    let body = claim_body("REF1", None);

    let response = send(&app.router, json_request("POST", "/process-claim-extended", body)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["reference_id"], "REF1");
    assert_eq!(json["individual_name"], "Ada Lovelace");
    assert_eq!(json["processing_mode"], "extended");

    // Nothing was queued.
    assert_eq!(app.queue.depth(QueueName::Compute).await.unwrap(), 0);
}

#[tokio::test]
async fn malformed_body_rejected_with_400() {
    let app = test_app();

    let response = send(
        &app.router,
        json_request("POST", "/process-claim-basic", serde_json::json!({"first_name": "only"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "validation_error");
}

#[tokio::test]
async fn blank_identifiers_rejected_with_400() {
    let app = test_app();
    let mut body = claim_body("", None);
    body["reference_id"] = serde_json::Value::String("  ".to_string());

    let response = send(&app.router, json_request("POST", "/process-claim-basic", body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalid_webhook_url_rejected_eagerly() {
    let app = test_app();

    for url in ["ftp://x", "not a url", "http://localhost:9000/hook"] {
        let body = claim_body("REF1", Some(url));
        let response = send(&app.router, json_request("POST", "/process-claim-basic", body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "url {url}");

        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "validation_error");
    }

    assert_eq!(app.queue.depth(QueueName::Compute).await.unwrap(), 0);
}

#[tokio::test]
async fn saturated_queue_returns_503() {
    let app = test_app();

    // Fill the queue to its high-water mark.
    for i in 0..100 {
        let body = claim_body(&format!("REF{i}"), Some("https://client.example.com/hook"));
        let response = send(&app.router, json_request("POST", "/process-claim-basic", body)).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let body = claim_body("REF-overflow", Some("https://client.example.com/hook"));
    let response = send(&app.router, json_request("POST", "/process-claim-basic", body)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "queue_full");
}

#[tokio::test]
async fn processing_modes_lists_the_catalogue() {
    let app = test_app();

    let response = send(&app.router, empty_request("GET", "/processing-modes")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert!(json.get("basic").is_some());
    assert!(json.get("extended").is_some());
    assert!(json.get("complete").is_some());
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = test_app();

    let response = send(&app.router, empty_request("GET", "/processing-modes")).await;
    assert!(response.headers().contains_key("X-Request-Id"));
}
