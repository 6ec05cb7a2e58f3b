//! Error types for queue operations.

use thiserror::Error;

/// Result type alias for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors surfaced by queue implementations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue reached its high-water mark; producers should back off.
    #[error("queue {queue} is full")]
    Full {
        /// Name of the saturated queue.
        queue: String,
    },

    /// A receipt referred to a task no longer leased.
    #[error("unknown delivery receipt {tag} for queue {queue}")]
    UnknownReceipt {
        /// Name of the queue.
        queue: String,
        /// The stale delivery tag.
        tag: u64,
    },

    /// Backing store operation failed.
    #[error("queue store error: {0}")]
    Store(String),

    /// Task payload could not be (de)serialized.
    #[error("task serialization failed: {0}")]
    Serialization(String),
}

impl QueueError {
    /// Creates a store error from a message.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
