//! In-memory queue implementing the contract for tests and local runs.
//!
//! Sequence numbers assign FIFO order; a redelivered task keeps its
//! original sequence number and therefore its place in line. Delayed and
//! leased tasks are promoted lazily on dequeue, driven by the injected
//! clock.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use courier_core::time::{now_utc, Clock};
use tokio::sync::Mutex;

use crate::{
    error::{QueueError, Result},
    queue::{Leased, QueueFuture, QueueName, Receipt, TaskQueue},
    task::QueueTask,
};

struct LeaseEntry {
    task: QueueTask,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct QueueState {
    next_seq: u64,
    ready: BTreeMap<u64, QueueTask>,
    delayed: BTreeMap<u64, (DateTime<Utc>, QueueTask)>,
    leased: HashMap<u64, LeaseEntry>,
}

impl QueueState {
    fn backlog(&self) -> usize {
        self.ready.len() + self.delayed.len()
    }

    /// Moves due delayed tasks and expired leases back into the ready set.
    /// Sequence numbers are preserved, so original order is too.
    fn promote(&mut self, now: DateTime<Utc>) {
        let due: Vec<u64> = self
            .delayed
            .iter()
            .filter(|(_, (eta, _))| *eta <= now)
            .map(|(seq, _)| *seq)
            .collect();
        for seq in due {
            if let Some((_, task)) = self.delayed.remove(&seq) {
                self.ready.insert(seq, task);
            }
        }

        let expired: Vec<u64> = self
            .leased
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(seq, _)| *seq)
            .collect();
        for seq in expired {
            if let Some(mut entry) = self.leased.remove(&seq) {
                entry.task.attempt_count += 1;
                self.ready.insert(seq, entry.task);
            }
        }
    }
}

/// In-memory FIFO queue with visibility leases.
pub struct MemoryQueue {
    queues: Mutex<HashMap<QueueName, QueueState>>,
    clock: Arc<dyn Clock>,
    capacity: Option<usize>,
}

impl MemoryQueue {
    /// Creates an unbounded queue reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { queues: Mutex::new(HashMap::new()), clock, capacity: None }
    }

    /// Sets a per-queue high-water mark; `enqueue` past it fails with
    /// [`QueueError::Full`].
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    async fn push(
        &self,
        queue: QueueName,
        task: QueueTask,
        eta: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue).or_default();

        if let Some(capacity) = self.capacity {
            if state.backlog() >= capacity {
                return Err(QueueError::Full { queue: queue.as_str().to_string() });
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        match eta {
            Some(eta) => {
                state.delayed.insert(seq, (eta, task));
            },
            None => {
                state.ready.insert(seq, task);
            },
        }
        Ok(())
    }
}

impl TaskQueue for MemoryQueue {
    fn enqueue(&self, queue: QueueName, task: QueueTask) -> QueueFuture<'_, ()> {
        Box::pin(async move { self.push(queue, task, None).await })
    }

    fn enqueue_delayed(
        &self,
        queue: QueueName,
        mut task: QueueTask,
        eta: DateTime<Utc>,
    ) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            task.eta = Some(eta);
            self.push(queue, task, Some(eta)).await
        })
    }

    fn dequeue(&self, queue: QueueName, lease: Duration) -> QueueFuture<'_, Option<Leased>> {
        Box::pin(async move {
            let now = now_utc(&*self.clock);
            let mut queues = self.queues.lock().await;
            let state = queues.entry(queue).or_default();
            state.promote(now);

            let Some((&seq, _)) = state.ready.iter().next() else {
                return Ok(None);
            };
            let Some(task) = state.ready.remove(&seq) else {
                return Ok(None);
            };

            let expires_at = now
                + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::hours(1));
            state.leased.insert(seq, LeaseEntry { task: task.clone(), expires_at });

            Ok(Some(Leased { task, receipt: Receipt { queue, tag: seq } }))
        })
    }

    fn ack(&self, receipt: Receipt) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            let mut queues = self.queues.lock().await;
            let state = queues.entry(receipt.queue).or_default();
            if state.leased.remove(&receipt.tag).is_none() {
                return Err(QueueError::UnknownReceipt {
                    queue: receipt.queue.as_str().to_string(),
                    tag: receipt.tag,
                });
            }
            Ok(())
        })
    }

    fn nack(&self, receipt: Receipt, task: QueueTask, delay: Duration) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            let now = now_utc(&*self.clock);
            let mut queues = self.queues.lock().await;
            let state = queues.entry(receipt.queue).or_default();
            if state.leased.remove(&receipt.tag).is_none() {
                return Err(QueueError::UnknownReceipt {
                    queue: receipt.queue.as_str().to_string(),
                    tag: receipt.tag,
                });
            }

            let eta = now
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::hours(1));
            state.delayed.insert(receipt.tag, (eta, task));
            Ok(())
        })
    }

    fn depth(&self, queue: QueueName) -> QueueFuture<'_, u64> {
        Box::pin(async move {
            let mut queues = self.queues.lock().await;
            let state = queues.entry(queue).or_default();
            Ok(state.backlog() as u64)
        })
    }
}
