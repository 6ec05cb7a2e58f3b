//! Request handlers.

pub mod claims;
pub mod health;
pub mod status;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

pub use claims::{
    process_claim_basic, process_claim_complete, process_claim_extended, processing_modes,
};
pub use health::{health_check, metrics};
pub use status::{
    delete_webhook_status, delete_webhook_statuses, list_dead_letters, list_webhook_statuses,
    task_status, webhook_cleanup, webhook_status,
};

/// Error response body shared by all handlers.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details.
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Stable machine-readable code.
    pub code: &'static str,
    /// Human-readable description.
    pub message: String,
}

/// Builds an error response with the given status, code, and message.
pub(crate) fn error_response(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> Response {
    (status, Json(ErrorResponse { error: ErrorDetail { code, message: message.into() } }))
        .into_response()
}

/// Maps a core error onto an HTTP response.
pub(crate) fn core_error_response(error: &courier_core::CoreError) -> Response {
    use courier_core::CoreError;

    match error {
        CoreError::Validation(message) => {
            error_response(StatusCode::BAD_REQUEST, "validation_error", message.clone())
        },
        CoreError::NotFound(message) => {
            error_response(StatusCode::NOT_FOUND, "not_found", message.clone())
        },
        other => {
            tracing::error!(error = %other, "request failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", other.to_string())
        },
    }
}
