//! Queue task envelope with a closed set of task kinds.
//!
//! Dispatch is by exhaustive match on the payload variant; there is no
//! string-named task registry. Both variants carry everything the handler
//! needs, so a task survives process restarts and queue redelivery.

use chrono::{DateTime, Utc};
use courier_core::models::{ClaimEnvelope, CorrelationId, ProcessingMode, TaskId, WebhookId};
use serde::{Deserialize, Serialize};

/// Kind discriminant, used for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Run the claim computation.
    Compute,
    /// Deliver a webhook payload.
    Deliver,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compute => write!(f, "compute"),
            Self::Deliver => write!(f, "deliver"),
        }
    }
}

/// Payload of a compute task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputePayload {
    /// The validated claim to process.
    pub envelope: ClaimEnvelope,
    /// Processing mode requested by the client.
    pub mode: ProcessingMode,
}

/// Payload of a delivery task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliverPayload {
    /// Record the delivery belongs to.
    pub webhook_id: WebhookId,
    /// The JSON body to POST.
    pub payload: serde_json::Value,
}

/// Typed task payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task_kind", rename_all = "snake_case")]
pub enum TaskPayload {
    /// Run the claim computation.
    Compute(ComputePayload),
    /// Deliver a webhook payload.
    Deliver(DeliverPayload),
}

impl TaskPayload {
    /// The kind discriminant.
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Compute(_) => TaskKind::Compute,
            Self::Deliver(_) => TaskKind::Deliver,
        }
    }
}

/// Opaque envelope the queue moves around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueTask {
    /// Compute task this work belongs to.
    pub task_id: TaskId,
    /// Trace token threaded through logs and outbound headers.
    pub correlation_id: CorrelationId,
    /// Times the queue has redelivered this task (lease expiry or nack).
    pub attempt_count: u32,
    /// Absolute time before which the task stays invisible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<DateTime<Utc>>,
    /// The typed work item.
    pub payload: TaskPayload,
}

impl QueueTask {
    /// Builds a compute task.
    pub fn compute(
        task_id: TaskId,
        correlation_id: CorrelationId,
        envelope: ClaimEnvelope,
        mode: ProcessingMode,
    ) -> Self {
        Self {
            task_id,
            correlation_id,
            attempt_count: 0,
            eta: None,
            payload: TaskPayload::Compute(ComputePayload { envelope, mode }),
        }
    }

    /// Builds a delivery task.
    pub fn deliver(
        task_id: TaskId,
        correlation_id: CorrelationId,
        webhook_id: WebhookId,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            task_id,
            correlation_id,
            attempt_count: 0,
            eta: None,
            payload: TaskPayload::Deliver(DeliverPayload { webhook_id, payload }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_serializes_with_kind_tag() {
        let task = QueueTask::deliver(
            TaskId::new(),
            CorrelationId::new(),
            WebhookId("REF1_abc".to_string()),
            serde_json::json!({"ok": true}),
        );

        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["payload"]["task_kind"], "deliver");

        let parsed: QueueTask = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, task);
        assert_eq!(parsed.payload.kind(), TaskKind::Deliver);
    }
}
