//! FIFO task queue with late acknowledgement and the worker pool.
//!
//! The queue contract preserves enqueue order among visible tasks, hides
//! delayed tasks until their `eta`, and removes a task only after its
//! handler acknowledged it. Two implementations share the contract: the
//! PostgreSQL queue claims with `FOR UPDATE SKIP LOCKED` for lock-free
//! distribution across workers, and the in-memory queue is the
//! deterministic test double.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod memory;
pub mod postgres;
pub mod queue;
pub mod task;
pub mod worker;

pub use error::{QueueError, Result};
pub use memory::MemoryQueue;
pub use postgres::PostgresQueue;
pub use queue::{Leased, QueueFuture, QueueName, Receipt, TaskQueue};
pub use task::{ComputePayload, DeliverPayload, QueueTask, TaskKind, TaskPayload};
pub use worker::{Heartbeats, PoolStats, TaskHandler, WorkerConfig, WorkerPool};
