//! Webhook delivery task: one invocation of the per-record state machine.
//!
//! Each invocation claims the record (single attempt in flight), validates
//! the destination, consults the circuit breaker, issues the request, and
//! applies the retry policy's decision: terminal delivered, a delayed
//! re-enqueue, or terminal failed plus a dead letter.
//!
//! HTTP failures never escape an invocation. Errors that do escape are
//! infrastructure failures (store, queue) and rely on queue redelivery;
//! the claimed record becomes resumable once its stale window passes.

use std::{future::Future, pin::Pin, sync::Arc};

use bytes::Bytes;
use courier_core::{
    models::{payload_digest, WebhookRecord},
    status::StatusManager,
    time::{now_utc, Clock},
};
use courier_queue::{
    DeliverPayload, QueueName, QueueTask, TaskHandler, TaskPayload, TaskQueue,
};
use tracing::{debug, error, info, warn};

use crate::{
    circuit::{CircuitBreakerRegistry, CircuitState},
    client::{DeliveryClient, DeliveryOutcome, DeliveryRequest},
    error::{DeliveryError, Result},
    metrics,
    retry::{RetryDecision, RetryPolicy},
    url_policy::UrlPolicy,
};

/// Orchestrates webhook delivery attempts.
pub struct WebhookDeliverer {
    status: Arc<StatusManager>,
    queue: Arc<dyn TaskQueue>,
    client: DeliveryClient,
    breakers: Arc<CircuitBreakerRegistry>,
    policy: RetryPolicy,
    url_policy: UrlPolicy,
    clock: Arc<dyn Clock>,
}

impl WebhookDeliverer {
    /// Wires a deliverer from its collaborators.
    pub fn new(
        status: Arc<StatusManager>,
        queue: Arc<dyn TaskQueue>,
        client: DeliveryClient,
        breakers: Arc<CircuitBreakerRegistry>,
        policy: RetryPolicy,
        url_policy: UrlPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { status, queue, client, breakers, policy, url_policy, clock }
    }

    /// Executes one delivery invocation for `payload`.
    pub async fn deliver(&self, task: &QueueTask, payload: &DeliverPayload) -> Result<()> {
        let body = serde_json::to_vec(&payload.payload)
            .map_err(|e| DeliveryError::internal(format!("payload serialization failed: {e}")))?;
        let digest = payload_digest(&body);

        let Some(record) =
            self.status.begin_attempt(&payload.webhook_id, Some(digest)).await?
        else {
            debug!(
                webhook_id = %payload.webhook_id,
                correlation_id = %task.correlation_id,
                "nothing to deliver, skipping"
            );
            return Ok(());
        };

        let url = match self.url_policy.validate(&record.webhook_url) {
            Ok(url) => url,
            Err(violation) => {
                warn!(
                    webhook_id = %record.webhook_id,
                    correlation_id = %record.correlation_id,
                    url = %record.webhook_url,
                    violation = %violation,
                    "destination rejected, failing without an attempt"
                );
                metrics::record_delivery("invalid_url", "none", 0.0);
                return self
                    .apply_decision(
                        &record,
                        payload,
                        "invalid_url",
                        violation.to_string(),
                        None,
                        RetryDecision::FailPermanent,
                    )
                    .await;
            },
        };
        let host = UrlPolicy::host_key(&url);

        if !self.breakers.should_allow(&host).await {
            // Short-circuited: classified like a connection error, but the
            // record keeps the breaker label. The skipped attempt still
            // counts toward the ceiling.
            debug!(
                webhook_id = %record.webhook_id,
                correlation_id = %record.correlation_id,
                host = %host,
                "circuit open, skipping request"
            );
            metrics::record_delivery("circuit_open", &host, 0.0);
            self.publish_breaker_state(&host).await;

            let decision = self.policy.decide(&DeliveryOutcome::ConnectionError, record.attempts);
            return self
                .apply_decision(
                    &record,
                    payload,
                    "circuit_open",
                    format!("circuit breaker open for {host}"),
                    None,
                    decision,
                )
                .await;
        }

        let request = DeliveryRequest {
            webhook_id: record.webhook_id.clone(),
            correlation_id: record.correlation_id,
            url: url.to_string(),
            body: Bytes::from(body),
            attempt: record.attempts,
        };
        let attempt = self.client.deliver(&request).await;

        if attempt.outcome.is_success() {
            self.breakers.record_success(&host).await;
        } else {
            self.breakers.record_failure(&host, attempt.outcome.class_label()).await;
        }
        self.publish_breaker_state(&host).await;

        metrics::record_delivery(
            attempt.outcome.class_label(),
            &host,
            attempt.duration.as_secs_f64(),
        );

        let detail = match attempt.outcome.response_code() {
            Some(code) => format!("HTTP {code}"),
            None => format!("{} contacting {host}", attempt.outcome.class_label()),
        };
        let decision = self.policy.decide(&attempt.outcome, record.attempts);
        self.apply_decision(
            &record,
            payload,
            attempt.outcome.class_label(),
            detail,
            attempt.outcome.response_code(),
            decision,
        )
        .await
    }

    async fn apply_decision(
        &self,
        record: &WebhookRecord,
        payload: &DeliverPayload,
        label: &str,
        detail: String,
        response_code: Option<u16>,
        decision: RetryDecision,
    ) -> Result<()> {
        match decision {
            RetryDecision::CompleteSuccess => {
                self.status.complete_delivered(record, response_code.unwrap_or(200)).await?;
                info!(
                    webhook_id = %record.webhook_id,
                    correlation_id = %record.correlation_id,
                    attempts = record.attempts,
                    response_code,
                    "webhook delivered"
                );
            },
            RetryDecision::ScheduleRetry { delay } => {
                self.status.mark_retrying(record, label, response_code).await.map_err(|e| {
                    warn!(
                        webhook_id = %record.webhook_id,
                        correlation_id = %record.correlation_id,
                        error = %e,
                        "failed to persist retrying status"
                    );
                    e
                })?;

                let eta = now_utc(&*self.clock)
                    + chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::seconds(300));
                let retry = QueueTask::deliver(
                    record.task_id,
                    record.correlation_id,
                    record.webhook_id.clone(),
                    payload.payload.clone(),
                );
                self.queue.enqueue_delayed(QueueName::Webhook, retry, eta).await?;

                warn!(
                    webhook_id = %record.webhook_id,
                    correlation_id = %record.correlation_id,
                    attempts = record.attempts,
                    error_class = label,
                    delay_seconds = delay.as_secs(),
                    "delivery failed, retry scheduled"
                );
            },
            RetryDecision::FailPermanent => {
                // Dead letter first: if the terminal write fails, queue
                // redelivery repeats both and the dead-letter put
                // overwrites itself.
                self.status
                    .write_dead_letter(record, payload.payload.clone(), label, &detail)
                    .await?;
                self.status.fail_permanent(record, label, response_code).await?;
                metrics::record_dead_letter(label);

                error!(
                    webhook_id = %record.webhook_id,
                    correlation_id = %record.correlation_id,
                    attempts = record.attempts,
                    error_class = label,
                    detail = %detail,
                    "delivery permanently failed, dead letter written"
                );
            },
        }
        Ok(())
    }

    async fn publish_breaker_state(&self, host: &str) {
        let state = self.breakers.state(host).await.unwrap_or(CircuitState::Closed);
        metrics::set_circuit_status(host, state);
    }
}

impl TaskHandler for WebhookDeliverer {
    fn handle(&self, task: QueueTask) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            match &task.payload {
                TaskPayload::Deliver(payload) => {
                    self.deliver(&task, payload).await.map_err(anyhow::Error::from)
                },
                TaskPayload::Compute(_) => {
                    anyhow::bail!("compute task routed to the delivery handler")
                },
            }
        })
    }
}
