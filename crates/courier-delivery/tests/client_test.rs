//! Delivery client behavior against a mock receiver.

use std::time::Duration;

use bytes::Bytes;
use courier_core::models::{CorrelationId, TaskId, WebhookId};
use courier_delivery::{
    signature, ClientConfig, DeliveryClient, DeliveryOutcome, DeliveryRequest,
};
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

fn request_for(url: String) -> DeliveryRequest {
    DeliveryRequest {
        webhook_id: WebhookId::new("REF1", TaskId::new()),
        correlation_id: CorrelationId::new(),
        url,
        body: Bytes::from_static(b"{\"claim\":\"data\"}"),
        attempt: 1,
    }
}

#[tokio::test]
async fn successful_delivery_classified_2xx() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/hook"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&server)
        .await;

    let client = DeliveryClient::with_defaults().unwrap();
    let result = client.deliver(&request_for(format!("{}/hook", server.uri()))).await;

    assert_eq!(result.outcome, DeliveryOutcome::Success2xx(200));
    assert!(result.outcome.is_success());
}

#[tokio::test]
async fn delivery_headers_are_sent() {
    let server = MockServer::start().await;
    let request = request_for(format!("{}/hook", server.uri()));

    Mock::given(matchers::method("POST"))
        .and(matchers::header("Content-Type", "application/json"))
        .and(matchers::header("X-Correlation-Id", request.correlation_id.to_string().as_str()))
        .and(matchers::header("X-Webhook-Id", request.webhook_id.to_string().as_str()))
        .and(matchers::header("X-Attempt", "1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = DeliveryClient::with_defaults().unwrap();
    let result = client.deliver(&request).await;
    assert!(result.outcome.is_success());

    server.verify().await;
}

#[tokio::test]
async fn signature_header_present_when_secret_configured() {
    let server = MockServer::start().await;
    let request = request_for(format!("{}/hook", server.uri()));
    let expected = signature::generate_hmac_hex(&request.body, "test-secret").unwrap();

    Mock::given(matchers::method("POST"))
        .and(matchers::header("X-Signature", expected.as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = ClientConfig { hmac_secret: Some("test-secret".to_string()), ..Default::default() };
    let client = DeliveryClient::new(config).unwrap();
    let result = client.deliver(&request).await;
    assert!(result.outcome.is_success());

    server.verify().await;
}

#[tokio::test]
async fn permanent_and_retriable_4xx_classified() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/throttled"))
        .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
        .mount(&server)
        .await;

    let client = DeliveryClient::with_defaults().unwrap();

    let result = client.deliver(&request_for(format!("{}/missing", server.uri()))).await;
    assert_eq!(result.outcome, DeliveryOutcome::Client4xxPermanent(404));

    let result = client.deliver(&request_for(format!("{}/throttled", server.uri()))).await;
    assert_eq!(result.outcome, DeliveryOutcome::Client4xxRetriable(429));
}

#[tokio::test]
async fn server_errors_classified_5xx() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .mount(&server)
        .await;

    let client = DeliveryClient::with_defaults().unwrap();
    let result = client.deliver(&request_for(format!("{}/hook", server.uri()))).await;
    assert_eq!(result.outcome, DeliveryOutcome::Server5xx(503));
}

#[tokio::test]
async fn slow_receiver_classified_timeout() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let config = ClientConfig { timeout: Duration::from_millis(200), ..Default::default() };
    let client = DeliveryClient::new(config).unwrap();
    let result = client.deliver(&request_for(format!("{}/hook", server.uri()))).await;

    assert_eq!(result.outcome, DeliveryOutcome::Timeout);
}

#[tokio::test]
async fn unreachable_destination_classified_connection_error() {
    // Port 1 is never listening.
    let client = DeliveryClient::with_defaults().unwrap();
    let result = client.deliver(&request_for("http://127.0.0.1:1/hook".to_string())).await;

    assert_eq!(result.outcome, DeliveryOutcome::ConnectionError);
}
