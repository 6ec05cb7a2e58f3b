//! Core domain models, status store facade, and lifecycle management.
//!
//! Provides strongly-typed domain primitives, the durable key/value store
//! contract with its PostgreSQL implementation, and the lifecycle manager
//! every other crate mutates webhook state through.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod status;
pub mod store;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    payload_digest, ClaimEnvelope, CorrelationId, DeadLetterEntry, ProcessingMode, TaskId,
    TaskRecord, TaskStatus, WebhookId, WebhookRecord, WebhookStatus, TTL_ACTIVE, TTL_DEAD_LETTER,
    TTL_DELIVERED,
};
pub use status::StatusManager;
pub use store::{MemoryStore, PostgresStore, StatusFilter, StatusPage, StatusStore};
pub use time::{now_utc, Clock, RealClock};
