//! HTTP client for webhook delivery with classified outcomes.
//!
//! Every attempt resolves to a [`DeliveryOutcome`]; transport errors and
//! non-2xx responses are data for the retry policy, not `Err` values.

use std::time::Duration;

use bytes::Bytes;
use courier_core::models::{CorrelationId, WebhookId};
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::{
    error::{DeliveryError, Result},
    signature,
};

/// Classified result of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Receiver acknowledged with any 2xx.
    Success2xx(u16),
    /// 4xx the receiver will keep returning; never retried.
    Client4xxPermanent(u16),
    /// 4xx worth retrying (408, 425, 429).
    Client4xxRetriable(u16),
    /// Receiver-side failure (5xx).
    Server5xx(u16),
    /// Request exceeded the client timeout.
    Timeout,
    /// DNS, refused, reset, or TLS failure before a response.
    ConnectionError,
    /// Destination URL failed validation; no request was made.
    InvalidUrl,
}

impl DeliveryOutcome {
    /// Classifies an HTTP status code.
    pub fn classify_status(code: u16) -> Self {
        match code {
            200..=299 => Self::Success2xx(code),
            408 | 425 | 429 => Self::Client4xxRetriable(code),
            400 | 401 | 403 | 404 | 410 | 413 | 415 | 422 => Self::Client4xxPermanent(code),
            400..=499 => Self::Client4xxPermanent(code),
            _ => Self::Server5xx(code),
        }
    }

    /// Short class label used in records, metrics, and dead letters.
    pub fn class_label(&self) -> &'static str {
        match self {
            Self::Success2xx(_) => "success_2xx",
            Self::Client4xxPermanent(_) => "client_4xx_permanent",
            Self::Client4xxRetriable(_) => "client_4xx_retriable",
            Self::Server5xx(_) => "server_5xx",
            Self::Timeout => "timeout",
            Self::ConnectionError => "connection_error",
            Self::InvalidUrl => "invalid_url",
        }
    }

    /// Whether the receiver acknowledged the delivery.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success2xx(_))
    }

    /// The HTTP status code, when a response was observed.
    pub fn response_code(&self) -> Option<u16> {
        match self {
            Self::Success2xx(code)
            | Self::Client4xxPermanent(code)
            | Self::Client4xxRetriable(code)
            | Self::Server5xx(code) => Some(*code),
            _ => None,
        }
    }
}

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Connect plus total timeout per request.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
    /// Secret for the `X-Signature` HMAC header, when configured.
    pub hmac_secret: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: "Courier-Webhook-Delivery/1.0".to_string(),
            max_redirects: 3,
            verify_tls: true,
            hmac_secret: None,
        }
    }
}

/// One outbound delivery request.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Record the delivery belongs to.
    pub webhook_id: WebhookId,
    /// Trace token forwarded as `X-Correlation-Id`.
    pub correlation_id: CorrelationId,
    /// Destination URL, already validated.
    pub url: String,
    /// JSON body to POST.
    pub body: Bytes,
    /// 1-based attempt number, forwarded as `X-Attempt`.
    pub attempt: u32,
}

/// Result details of one attempt.
#[derive(Debug, Clone)]
pub struct AttemptResult {
    /// Classified outcome.
    pub outcome: DeliveryOutcome,
    /// Total request duration.
    pub duration: Duration,
}

/// HTTP client optimized for webhook delivery.
///
/// Connection pooling comes from the shared `reqwest` client; outcomes are
/// classified for the retry policy and circuit breaker.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built with the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a new delivery client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Delivers a webhook payload to its destination.
    ///
    /// Never fails on transport or HTTP errors; those become classified
    /// outcomes for the retry policy.
    pub async fn deliver(&self, request: &DeliveryRequest) -> AttemptResult {
        let start = std::time::Instant::now();

        let span = info_span!(
            "webhook_delivery",
            webhook_id = %request.webhook_id,
            correlation_id = %request.correlation_id,
            url = %request.url,
            attempt = request.attempt
        );

        async move {
            let mut http_request = self
                .client
                .post(&request.url)
                .body(request.body.clone())
                .header("Content-Type", "application/json")
                .header("X-Correlation-Id", request.correlation_id.to_string())
                .header("X-Webhook-Id", request.webhook_id.to_string())
                .header("X-Attempt", request.attempt.to_string());

            if let Some(secret) = &self.config.hmac_secret {
                match signature::generate_hmac_hex(&request.body, secret) {
                    Ok(hex) => {
                        http_request = http_request.header("X-Signature", hex);
                    },
                    Err(error) => {
                        tracing::warn!(error = %error, "skipping X-Signature header");
                    },
                }
            }

            let response = match http_request.send().await {
                Ok(response) => response,
                Err(error) => {
                    let duration = start.elapsed();
                    tracing::warn!(
                        duration_ms = duration.as_millis(),
                        error = %error,
                        "request failed before a response"
                    );

                    let outcome = if error.is_timeout() {
                        DeliveryOutcome::Timeout
                    } else {
                        DeliveryOutcome::ConnectionError
                    };
                    return AttemptResult { outcome, duration };
                },
            };

            let duration = start.elapsed();
            let status_code = response.status().as_u16();
            let outcome = DeliveryOutcome::classify_status(status_code);

            match outcome {
                DeliveryOutcome::Success2xx(_) => {
                    tracing::info!(
                        status = status_code,
                        duration_ms = duration.as_millis(),
                        "webhook delivered"
                    );
                },
                _ => {
                    let body = Self::truncated_body(response).await;
                    tracing::warn!(
                        status = status_code,
                        duration_ms = duration.as_millis(),
                        body = %body,
                        "receiver rejected delivery"
                    );
                },
            }

            AttemptResult { outcome, duration }
        }
        .instrument(span)
        .await
    }

    /// Reads the response body for logging, capped to 1KB.
    async fn truncated_body(response: reqwest::Response) -> String {
        const MAX_LOGGED_BODY: usize = 1024;

        match response.bytes().await {
            Ok(bytes) if bytes.len() > MAX_LOGGED_BODY => {
                format!("{}... (truncated)", String::from_utf8_lossy(&bytes[..MAX_LOGGED_BODY]))
            },
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(error) => format!("[failed to read response body: {error}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification_follows_the_table() {
        assert_eq!(DeliveryOutcome::classify_status(200), DeliveryOutcome::Success2xx(200));
        assert_eq!(DeliveryOutcome::classify_status(204), DeliveryOutcome::Success2xx(204));

        for code in [400, 401, 403, 404, 410, 413, 415, 422] {
            assert_eq!(
                DeliveryOutcome::classify_status(code),
                DeliveryOutcome::Client4xxPermanent(code),
                "status {code}"
            );
        }

        for code in [408, 425, 429] {
            assert_eq!(
                DeliveryOutcome::classify_status(code),
                DeliveryOutcome::Client4xxRetriable(code),
                "status {code}"
            );
        }

        assert_eq!(DeliveryOutcome::classify_status(500), DeliveryOutcome::Server5xx(500));
        assert_eq!(DeliveryOutcome::classify_status(503), DeliveryOutcome::Server5xx(503));

        // Unlisted 4xx codes are permanent; the receiver will keep
        // returning them.
        assert_eq!(DeliveryOutcome::classify_status(402), DeliveryOutcome::Client4xxPermanent(402));
        assert_eq!(DeliveryOutcome::classify_status(405), DeliveryOutcome::Client4xxPermanent(405));
    }

    #[test]
    fn class_labels_are_stable() {
        assert_eq!(DeliveryOutcome::Success2xx(200).class_label(), "success_2xx");
        assert_eq!(DeliveryOutcome::Client4xxPermanent(404).class_label(), "client_4xx_permanent");
        assert_eq!(DeliveryOutcome::Client4xxRetriable(429).class_label(), "client_4xx_retriable");
        assert_eq!(DeliveryOutcome::Server5xx(503).class_label(), "server_5xx");
        assert_eq!(DeliveryOutcome::Timeout.class_label(), "timeout");
        assert_eq!(DeliveryOutcome::ConnectionError.class_label(), "connection_error");
        assert_eq!(DeliveryOutcome::InvalidUrl.class_label(), "invalid_url");
    }

    #[test]
    fn response_codes_extracted_when_present() {
        assert_eq!(DeliveryOutcome::Success2xx(201).response_code(), Some(201));
        assert_eq!(DeliveryOutcome::Server5xx(502).response_code(), Some(502));
        assert_eq!(DeliveryOutcome::Timeout.response_code(), None);
        assert_eq!(DeliveryOutcome::ConnectionError.response_code(), None);
    }
}
