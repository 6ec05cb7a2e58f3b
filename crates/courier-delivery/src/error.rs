//! Error types for delivery and compute operations.
//!
//! HTTP-level failures are not errors here: they are classified outcomes
//! (see [`crate::client::DeliveryOutcome`]) consumed by the retry policy
//! and never escape a delivery attempt. This module covers everything
//! around the attempt itself.

use courier_core::error::CoreError;
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors surfaced by the delivery and compute pipelines.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Circuit breaker refused the destination host.
    #[error("circuit breaker open for host {host}")]
    CircuitOpen {
        /// The refused destination host.
        host: String,
    },

    /// Destination URL failed validation.
    #[error("invalid webhook URL: {reason}")]
    InvalidUrl {
        /// Why the URL was rejected.
        reason: String,
    },

    /// Status store operation failed around an attempt.
    #[error("store error: {0}")]
    Store(String),

    /// Queue operation failed while scheduling follow-up work.
    #[error("queue error: {0}")]
    Queue(String),

    /// Delivery client could not be constructed.
    #[error("invalid delivery configuration: {0}")]
    Configuration(String),

    /// Unexpected internal failure.
    #[error("internal delivery error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Creates a configuration error from a message.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates an internal error from a message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<CoreError> for DeliveryError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(reason) => Self::InvalidUrl { reason },
            other => Self::Store(other.to_string()),
        }
    }
}

impl From<courier_queue::QueueError> for DeliveryError {
    fn from(err: courier_queue::QueueError) -> Self {
        Self::Queue(err.to_string())
    }
}

/// Failure of the pluggable compute function.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ComputeError {
    /// Whether a bounded retry may succeed.
    pub transient: bool,
    /// Failure description, forwarded to the synthetic error payload.
    pub message: String,
}

impl ComputeError {
    /// A failure worth retrying (upstream flakiness, timeouts).
    pub fn transient(message: impl Into<String>) -> Self {
        Self { transient: true, message: message.into() }
    }

    /// A failure retries cannot fix (bad claim data, logic errors).
    pub fn permanent(message: impl Into<String>) -> Self {
        Self { transient: false, message: message.into() }
    }
}
