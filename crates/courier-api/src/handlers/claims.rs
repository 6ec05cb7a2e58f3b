//! Claim submission handlers.
//!
//! Three routes share one flow, differing only in processing mode. A
//! claim with a callback URL is accepted immediately: the task record and
//! pending webhook record are created, the compute task is enqueued, and
//! the caller polls `/task-status` or waits for the webhook. Without a
//! callback the computation runs inline and the result is the response.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use courier_core::models::{ClaimEnvelope, CorrelationId, ProcessingMode, TaskId};
use courier_queue::{QueueError, QueueName, QueueTask};
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use super::error_response;
use crate::AppState;

/// Response for an accepted asynchronous claim.
#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    /// Always `processing_queued`.
    pub status: &'static str,
    /// Client correlation token echoed back.
    pub reference_id: String,
    /// Identifier for polling `/task-status/{task_id}`.
    pub task_id: TaskId,
}

/// `POST /process-claim-basic`
#[instrument(name = "process_claim_basic", skip_all)]
pub async fn process_claim_basic(
    State(state): State<AppState>,
    payload: Result<Json<ClaimEnvelope>, JsonRejection>,
) -> Response {
    process_claim(state, payload, ProcessingMode::Basic).await
}

/// `POST /process-claim-extended`
#[instrument(name = "process_claim_extended", skip_all)]
pub async fn process_claim_extended(
    State(state): State<AppState>,
    payload: Result<Json<ClaimEnvelope>, JsonRejection>,
) -> Response {
    process_claim(state, payload, ProcessingMode::Extended).await
}

/// `POST /process-claim-complete`
#[instrument(name = "process_claim_complete", skip_all)]
pub async fn process_claim_complete(
    State(state): State<AppState>,
    payload: Result<Json<ClaimEnvelope>, JsonRejection>,
) -> Response {
    process_claim(state, payload, ProcessingMode::Complete).await
}

/// `GET /processing-modes`
pub async fn processing_modes() -> Response {
    Json(json!({
        "basic": { "description": "Skips all reviews" },
        "extended": { "description": "Includes disciplinary and arbitration reviews" },
        "complete": { "description": "Includes all reviews" },
    }))
    .into_response()
}

async fn process_claim(
    state: AppState,
    payload: Result<Json<ClaimEnvelope>, JsonRejection>,
    mode: ProcessingMode,
) -> Response {
    let envelope = match payload {
        Ok(Json(envelope)) => envelope,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "validation_error",
                format!("invalid claim body: {rejection}"),
            );
        },
    };

    if envelope.reference_id.trim().is_empty() || envelope.employee_number.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "reference_id and employee_number must be non-empty",
        );
    }

    match &envelope.webhook_url {
        Some(webhook_url) => {
            // Destination problems are rejected eagerly; the delivery
            // pipeline revalidates before every attempt regardless.
            if let Err(violation) = state.url_policy.validate(webhook_url) {
                warn!(
                    reference_id = %envelope.reference_id,
                    url = %webhook_url,
                    violation = %violation,
                    "rejecting claim with invalid webhook URL"
                );
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "validation_error",
                    format!("invalid webhook_url: {violation}"),
                );
            }
            accept_async(state, envelope, mode).await
        },
        None => run_sync(state, envelope, mode).await,
    }
}

async fn accept_async(state: AppState, envelope: ClaimEnvelope, mode: ProcessingMode) -> Response {
    let task_id = TaskId::new();
    let correlation_id = CorrelationId::new();
    let webhook_url = envelope.webhook_url.clone().unwrap_or_default();

    if let Err(error) = state.status.task_queued(task_id, &envelope).await {
        return super::core_error_response(&error);
    }

    if let Err(error) = state
        .status
        .create_pending(
            &envelope.reference_id,
            task_id,
            &webhook_url,
            correlation_id,
            state.delivery_max_attempts,
        )
        .await
    {
        return super::core_error_response(&error);
    }

    let reference_id = envelope.reference_id.clone();
    let task = QueueTask::compute(task_id, correlation_id, envelope, mode);
    match state.queue.enqueue(QueueName::Compute, task).await {
        Ok(()) => {
            info!(
                task_id = %task_id,
                correlation_id = %correlation_id,
                reference_id = %reference_id,
                mode = %mode,
                "claim queued for asynchronous processing"
            );
            (
                StatusCode::ACCEPTED,
                Json(QueuedResponse { status: "processing_queued", reference_id, task_id }),
            )
                .into_response()
        },
        Err(QueueError::Full { .. }) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "queue_full",
            "compute queue is saturated, retry with backoff",
        ),
        Err(error) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            error.to_string(),
        ),
    }
}

async fn run_sync(state: AppState, envelope: ClaimEnvelope, mode: ProcessingMode) -> Response {
    let outcome =
        tokio::time::timeout(state.sync_compute_timeout, state.processor.process(&envelope, mode))
            .await;

    match outcome {
        Ok(Ok(result)) => (StatusCode::OK, Json(result)).into_response(),
        Ok(Err(error)) => {
            warn!(
                reference_id = %envelope.reference_id,
                error = %error,
                "synchronous claim processing failed"
            );
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "compute_error",
                error.to_string(),
            )
        },
        Err(_elapsed) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "compute_timeout",
            "claim processing exceeded the synchronous deadline",
        ),
    }
}
