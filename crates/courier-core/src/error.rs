//! Error types and result handling for core operations.
//!
//! Defines the structured taxonomy shared by the store, the lifecycle
//! manager, and callers in the queue and delivery crates. HTTP-level
//! delivery failures have their own classification in the delivery crate;
//! everything that can go wrong around persistence and state transitions
//! lands here.

use thiserror::Error;

use crate::models::WebhookStatus;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for store and lifecycle operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Input failed validation (URL, allow-list, claim shape).
    #[error("validation error: {0}")]
    Validation(String),

    /// Backing store operation failed.
    #[error("store error: {0}")]
    Store(String),

    /// Entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A state transition the lifecycle machine forbids.
    #[error("illegal transition: {from} -> {to}")]
    IllegalTransition {
        /// Status the record was in.
        from: WebhookStatus,
        /// Status the caller attempted to move to.
        to: WebhookStatus,
    },

    /// Queue enqueue/ack operation failed.
    #[error("queue error: {0}")]
    Queue(String),

    /// Operation exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Creates a store error from a message.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Creates a validation error from a message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates an internal error from a message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this error indicates a transient infrastructure failure the
    /// caller may retry via queue redelivery.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Queue(_) | Self::Timeout)
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("requested entity not found".to_string()),
            _ => Self::Store(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(format!("record serialization failed: {err}"))
    }
}
