//! Task status, webhook status, and cleanup handlers.

use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use courier_core::models::{TaskId, WebhookId, WebhookRecord, WebhookStatus};
use courier_core::store::StatusFilter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use super::{core_error_response, error_response};
use crate::AppState;

/// Query parameters for listing webhook statuses.
#[derive(Debug, Deserialize)]
pub struct ListParams {
    /// Reference id prefix filter.
    pub reference_id: Option<String>,
    /// Status filter, snake_case.
    pub status: Option<String>,
    /// 1-based page number.
    #[serde(default = "default_page")]
    pub page: u32,
    /// Page size.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

/// Query parameters for bulk deletion.
#[derive(Debug, Deserialize)]
pub struct DeleteParams {
    /// Reference id prefix filter.
    pub reference_id: Option<String>,
    /// Status filter, snake_case.
    pub status: Option<String>,
}

/// Query parameters for cleanup.
#[derive(Debug, Deserialize)]
pub struct CleanupParams {
    /// Status filter, snake_case.
    pub status: Option<String>,
    /// Age threshold in days; records older than this are removed.
    #[serde(default = "default_older_than_days")]
    pub older_than_days: u32,
    /// Reference id prefix filter.
    pub reference_id: Option<String>,
}

fn default_older_than_days() -> u32 {
    7
}

/// Listing response page.
#[derive(Debug, Serialize)]
pub struct StatusListResponse {
    /// Records on this page, payloads stripped.
    pub items: Vec<WebhookRecord>,
    /// 1-based page number.
    pub page: u32,
    /// Page size.
    pub page_size: u32,
    /// Best-effort total count of matching records.
    pub total: u64,
}

fn parse_status(raw: Option<&str>) -> Result<Option<WebhookStatus>, Response> {
    match raw {
        None => Ok(None),
        Some(s) => WebhookStatus::parse(s).map(Some).ok_or_else(|| {
            error_response(
                StatusCode::BAD_REQUEST,
                "validation_error",
                format!("unknown status filter: {s}"),
            )
        }),
    }
}

/// `GET /task-status/{task_id}`
#[instrument(name = "task_status", skip(state))]
pub async fn task_status(State(state): State<AppState>, Path(task_id): Path<String>) -> Response {
    let Ok(task_id) = task_id.parse::<TaskId>() else {
        return error_response(StatusCode::BAD_REQUEST, "validation_error", "malformed task id");
    };

    match state.status.get_task(task_id).await {
        Ok(Some(record)) => Json(json!({
            "task_id": record.task_id,
            "status": record.status,
            "reference_id": record.reference_id,
            "result": record.result,
            "error": record.error,
        }))
        .into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no task record for {task_id}"),
        ),
        Err(error) => core_error_response(&error),
    }
}

/// `GET /webhook-status/{webhook_id}`
#[instrument(name = "webhook_status", skip(state))]
pub async fn webhook_status(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
) -> Response {
    let webhook_id = WebhookId(webhook_id);
    match state.status.get(&webhook_id).await {
        Ok(Some(record)) => Json(record.without_payload()).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no webhook record for {webhook_id}"),
        ),
        Err(error) => core_error_response(&error),
    }
}

/// `GET /webhook-statuses`
#[instrument(name = "list_webhook_statuses", skip(state))]
pub async fn list_webhook_statuses(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Response {
    let status = match parse_status(params.status.as_deref()) {
        Ok(status) => status,
        Err(response) => return response,
    };
    let page_size = params.page_size.clamp(1, 500);

    let filter = StatusFilter { reference_id: params.reference_id, status };
    match state.status.list(filter, params.page, page_size).await {
        Ok(result) => Json(StatusListResponse {
            items: result.items.iter().map(WebhookRecord::without_payload).collect(),
            page: params.page.max(1),
            page_size,
            total: result.total,
        })
        .into_response(),
        Err(error) => core_error_response(&error),
    }
}

/// `DELETE /webhook-status/{webhook_id}`
#[instrument(name = "delete_webhook_status", skip(state))]
pub async fn delete_webhook_status(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
) -> Response {
    let webhook_id = WebhookId(webhook_id);
    match state.status.delete(&webhook_id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no webhook record for {webhook_id}"),
        ),
        Err(error) => core_error_response(&error),
    }
}

/// `DELETE /webhook-statuses`
#[instrument(name = "delete_webhook_statuses", skip(state))]
pub async fn delete_webhook_statuses(
    State(state): State<AppState>,
    Query(params): Query<DeleteParams>,
) -> Response {
    let status = match parse_status(params.status.as_deref()) {
        Ok(status) => status,
        Err(response) => return response,
    };

    let filter = StatusFilter { reference_id: params.reference_id, status };
    match state.status.delete_matching(filter).await {
        Ok(deleted) => Json(json!({ "deleted": deleted })).into_response(),
        Err(error) => core_error_response(&error),
    }
}

/// `POST /webhook-cleanup`
#[instrument(name = "webhook_cleanup", skip(state))]
pub async fn webhook_cleanup(
    State(state): State<AppState>,
    Query(params): Query<CleanupParams>,
) -> Response {
    let status = match parse_status(params.status.as_deref()) {
        Ok(status) => status,
        Err(response) => return response,
    };

    let older_than = Duration::from_secs(u64::from(params.older_than_days) * 24 * 60 * 60);
    match state.status.cleanup(older_than, status, params.reference_id).await {
        Ok(deleted) => Json(json!({ "deleted": deleted })).into_response(),
        Err(error) => core_error_response(&error),
    }
}

/// `GET /dead-letters`
#[instrument(name = "list_dead_letters", skip(state))]
pub async fn list_dead_letters(State(state): State<AppState>) -> Response {
    match state.status.list_dead_letters().await {
        Ok(ids) => Json(json!({ "items": ids })).into_response(),
        Err(error) => core_error_response(&error),
    }
}
