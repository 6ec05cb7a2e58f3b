//! The task queue contract: FIFO with late acknowledgement.
//!
//! A task is removed only when its handler acknowledges it; a worker that
//! dies holding a lease loses the lease and the task becomes visible
//! again. Delayed tasks (`eta` in the future) stay invisible until their
//! time arrives. FIFO holds across the tasks that are visible at dequeue
//! time.

use std::{future::Future, pin::Pin, time::Duration};

use chrono::{DateTime, Utc};

use crate::{error::Result, task::QueueTask};

/// Boxed future returned by queue operations.
pub type QueueFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// The named logical queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    /// Claim computation, consumed single-threaded for strict FIFO.
    Compute,
    /// Webhook delivery, consumed by a small concurrent pool.
    Webhook,
}

impl QueueName {
    /// Stable name used in storage and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compute => "compute_queue",
            Self::Webhook => "webhook_queue",
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to a leased task, required to ack or nack it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// Queue the task was leased from.
    pub queue: QueueName,
    /// Implementation-assigned delivery tag.
    pub tag: u64,
}

/// A task together with its lease receipt.
#[derive(Debug, Clone)]
pub struct Leased {
    /// The leased task.
    pub task: QueueTask,
    /// Receipt for acknowledging the lease.
    pub receipt: Receipt,
}

/// FIFO task queue with visibility leases and late acknowledgement.
///
/// Implementations must satisfy:
/// - FIFO across tasks whose `eta` has passed, in enqueue order;
/// - a leased task is invisible until its lease expires or it is nacked;
/// - `ack` after handler completion is the only removal path;
/// - lease-expiry redelivery increments the task's `attempt_count`.
pub trait TaskQueue: Send + Sync + 'static {
    /// Appends a task, visible immediately.
    fn enqueue(&self, queue: QueueName, task: QueueTask) -> QueueFuture<'_, ()>;

    /// Appends a task that becomes visible at `eta`.
    fn enqueue_delayed(
        &self,
        queue: QueueName,
        task: QueueTask,
        eta: DateTime<Utc>,
    ) -> QueueFuture<'_, ()>;

    /// Claims the oldest visible task under a lease of the given duration.
    fn dequeue(&self, queue: QueueName, lease: Duration) -> QueueFuture<'_, Option<Leased>>;

    /// Removes an executed task. Late acknowledgement: call only after the
    /// handler returned.
    fn ack(&self, receipt: Receipt) -> QueueFuture<'_, ()>;

    /// Returns a leased task to the queue, visible again after `delay`.
    /// The caller passes the (possibly mutated) task back.
    fn nack(&self, receipt: Receipt, task: QueueTask, delay: Duration) -> QueueFuture<'_, ()>;

    /// Number of tasks waiting or delayed (excludes leased tasks).
    fn depth(&self, queue: QueueName) -> QueueFuture<'_, u64>;
}
