//! Compute task execution and dispatch into delivery.
//!
//! The claim computation itself is pluggable: implementations of
//! [`ClaimProcessor`] produce the result JSON. The runner owns everything
//! around the call — the per-task timeout, transient retry with
//! exponential backoff, task status bookkeeping, and handing the result
//! (or a synthetic error payload) to the delivery queue.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use courier_core::{
    models::{ClaimEnvelope, ProcessingMode, WebhookId},
    status::StatusManager,
    time::{now_utc, Clock},
};
use courier_queue::{ComputePayload, QueueName, QueueTask, TaskHandler, TaskPayload, TaskQueue};
use serde_json::json;
use tracing::{error, info, warn};

use crate::{
    error::{ComputeError, DeliveryError, Result},
    metrics,
};

/// The pluggable claim computation.
///
/// Implementations receive the validated envelope and the processing mode
/// and return the result JSON. The mode is opaque to the core; only the
/// processor interprets it.
pub trait ClaimProcessor: Send + Sync + 'static {
    /// Processes one claim.
    fn process(
        &self,
        envelope: &ClaimEnvelope,
        mode: ProcessingMode,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<serde_json::Value, ComputeError>> + Send + '_>>;
}

/// Tunables for compute execution and retry.
#[derive(Debug, Clone)]
pub struct ComputeConfig {
    /// Wall-clock ceiling per compute invocation.
    pub task_timeout: Duration,
    /// Maximum compute attempts (including the first).
    pub max_attempts: u32,
    /// Base delay before the first compute retry; doubles per attempt.
    pub base_delay: Duration,
    /// Ceiling on the compute retry delay.
    pub max_delay: Duration,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(60 * 60),
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(600),
        }
    }
}

impl ComputeConfig {
    /// Delay before the retry that follows attempt `attempt_number`
    /// (1-based).
    pub fn retry_delay(&self, attempt_number: u32) -> Duration {
        let exponent = attempt_number.saturating_sub(1).min(20);
        let delay = self.base_delay * 2_u32.saturating_pow(exponent);
        std::cmp::min(delay, self.max_delay)
    }
}

/// Executes compute tasks from the compute queue.
pub struct ComputeRunner {
    processor: Arc<dyn ClaimProcessor>,
    status: Arc<StatusManager>,
    queue: Arc<dyn TaskQueue>,
    config: ComputeConfig,
    clock: Arc<dyn Clock>,
}

impl ComputeRunner {
    /// Wires a runner from its collaborators.
    pub fn new(
        processor: Arc<dyn ClaimProcessor>,
        status: Arc<StatusManager>,
        queue: Arc<dyn TaskQueue>,
        config: ComputeConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { processor, status, queue, config, clock }
    }

    /// Executes one compute task.
    pub async fn run(&self, task: &QueueTask, payload: &ComputePayload) -> Result<()> {
        let envelope = &payload.envelope;

        if let Err(error) = self.status.task_processing(task.task_id).await {
            warn!(
                task_id = %task.task_id,
                correlation_id = %task.correlation_id,
                error = %error,
                "failed to record PROCESSING status"
            );
        }

        info!(
            task_id = %task.task_id,
            correlation_id = %task.correlation_id,
            reference_id = %envelope.reference_id,
            mode = %payload.mode,
            "compute task starting"
        );

        let outcome =
            tokio::time::timeout(self.config.task_timeout, self.processor.process(envelope, payload.mode))
                .await
                .unwrap_or_else(|_| {
                    Err(ComputeError::transient(format!(
                        "compute timed out after {}s",
                        self.config.task_timeout.as_secs()
                    )))
                });

        match outcome {
            Ok(result) => {
                metrics::record_compute("success");
                self.status.task_completed(task.task_id, result.clone()).await.map_err(|e| {
                    DeliveryError::Store(e.to_string())
                })?;

                if envelope.webhook_url.is_some() {
                    self.enqueue_delivery(task, envelope, result).await?;
                }
                Ok(())
            },
            Err(compute_error) => self.handle_failure(task, payload, compute_error).await,
        }
    }

    async fn handle_failure(
        &self,
        task: &QueueTask,
        payload: &ComputePayload,
        compute_error: ComputeError,
    ) -> Result<()> {
        let envelope = &payload.envelope;
        let attempt_number = task.attempt_count + 1;

        if compute_error.transient && attempt_number < self.config.max_attempts {
            metrics::record_compute("retry");
            if let Err(error) = self.status.task_retrying(task.task_id, &compute_error.message).await
            {
                warn!(
                    task_id = %task.task_id,
                    correlation_id = %task.correlation_id,
                    error = %error,
                    "failed to record RETRYING status"
                );
            }

            let delay = self.config.retry_delay(attempt_number);
            let eta = now_utc(&*self.clock)
                + chrono::Duration::from_std(delay)
                    .unwrap_or_else(|_| chrono::Duration::seconds(600));

            let mut retry = task.clone();
            retry.attempt_count += 1;
            self.queue.enqueue_delayed(QueueName::Compute, retry, eta).await?;

            warn!(
                task_id = %task.task_id,
                correlation_id = %task.correlation_id,
                attempt = attempt_number,
                delay_seconds = delay.as_secs(),
                error = %compute_error,
                "compute failed, retry scheduled"
            );
            return Ok(());
        }

        metrics::record_compute("failure");
        self.status
            .task_failed(task.task_id, &compute_error.message)
            .await
            .map_err(|e| DeliveryError::Store(e.to_string()))?;

        error!(
            task_id = %task.task_id,
            correlation_id = %task.correlation_id,
            attempt = attempt_number,
            transient = compute_error.transient,
            error = %compute_error,
            "compute permanently failed"
        );

        // Clients with a callback still learn of the failure.
        if envelope.webhook_url.is_some() {
            let error_payload = json!({
                "reference_id": envelope.reference_id,
                "status": "error",
                "error": compute_error.message,
            });
            self.enqueue_delivery(task, envelope, error_payload).await?;
        }
        Ok(())
    }

    async fn enqueue_delivery(
        &self,
        task: &QueueTask,
        envelope: &ClaimEnvelope,
        payload: serde_json::Value,
    ) -> Result<()> {
        let webhook_id = WebhookId::new(&envelope.reference_id, task.task_id);
        let deliver =
            QueueTask::deliver(task.task_id, task.correlation_id, webhook_id, payload);
        self.queue.enqueue(QueueName::Webhook, deliver).await?;
        Ok(())
    }
}

impl TaskHandler for ComputeRunner {
    fn handle(&self, task: QueueTask) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            match &task.payload {
                TaskPayload::Compute(payload) => {
                    self.run(&task, payload).await.map_err(anyhow::Error::from)
                },
                TaskPayload::Deliver(_) => {
                    anyhow::bail!("delivery task routed to the compute handler")
                },
            }
        })
    }
}

/// Built-in processor assembling the claim summary report.
///
/// Stands in for the full review pipeline in deployments that wire no
/// domain processor; produces the summary fields every mode shares.
pub struct SummaryProcessor;

impl ClaimProcessor for SummaryProcessor {
    fn process(
        &self,
        envelope: &ClaimEnvelope,
        mode: ProcessingMode,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<serde_json::Value, ComputeError>> + Send + '_>>
    {
        let report = json!({
            "reference_id": envelope.reference_id,
            "employee_number": envelope.employee_number,
            "individual_name": envelope.individual_name(),
            "crd_number": envelope.crd_number,
            "organization_name": envelope.organization_name,
            "processing_mode": mode.to_string(),
            "status": "success",
        });
        Box::pin(async move { Ok(report) })
    }
}
