//! Supervised worker pool consuming one named queue.
//!
//! Each worker loops dequeue -> execute -> acknowledge, holding at most
//! the task it is executing (prefetch of one). Acknowledgement happens
//! only after the handler returns; a worker that dies mid-task loses its
//! lease and the queue redelivers. Shutdown is cooperative through a
//! cancellation token with a bounded drain.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
    time::{Duration, SystemTime},
};

use courier_core::time::Clock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    queue::{Leased, QueueName, TaskQueue},
    task::QueueTask,
};

/// Work executor for one task kind family.
///
/// Handlers own their domain-level failure handling; returning an error
/// signals an infrastructure failure the queue should redeliver.
pub trait TaskHandler: Send + Sync + 'static {
    /// Executes one task.
    fn handle(&self, task: QueueTask) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}

/// Configuration for one worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queue this pool consumes.
    pub queue: QueueName,
    /// Number of concurrent workers.
    pub worker_count: usize,
    /// How long workers sleep when the queue is empty.
    pub poll_interval: Duration,
    /// Visibility lease taken per dequeue.
    pub lease: Duration,
    /// Hard wall-clock ceiling per task execution.
    pub task_timeout: Duration,
    /// Delay before a failed task becomes visible again.
    pub nack_delay: Duration,
    /// Redeliveries after which a task is dropped with an error log.
    pub max_redeliveries: u32,
    /// Maximum time to wait for workers during graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl WorkerConfig {
    /// Reference configuration for the compute queue: strict FIFO via a
    /// single worker.
    pub fn compute() -> Self {
        Self {
            queue: QueueName::Compute,
            worker_count: 1,
            poll_interval: Duration::from_secs(1),
            lease: Duration::from_secs(90 * 60),
            task_timeout: Duration::from_secs(70 * 60),
            nack_delay: Duration::from_secs(5),
            max_redeliveries: 5,
            shutdown_timeout: Duration::from_secs(30),
        }
    }

    /// Reference configuration for the delivery queue. The nack delay
    /// sits above the record stale window so a redelivered task can
    /// resume a claimed record.
    pub fn delivery() -> Self {
        Self {
            queue: QueueName::Webhook,
            worker_count: 4,
            poll_interval: Duration::from_secs(1),
            lease: Duration::from_secs(10 * 60),
            task_timeout: Duration::from_secs(5 * 60),
            nack_delay: Duration::from_secs(90),
            max_redeliveries: 5,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Last-seen timestamps per worker, read by the health surface.
#[derive(Default)]
pub struct Heartbeats {
    beats: RwLock<HashMap<usize, SystemTime>>,
}

impl Heartbeats {
    /// Creates an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    fn beat(&self, worker_id: usize, now: SystemTime) {
        if let Ok(mut beats) = self.beats.write() {
            beats.insert(worker_id, now);
        }
    }

    /// Whether any worker heartbeat landed within `window` of `now`.
    pub fn alive_within(&self, window: Duration, now: SystemTime) -> bool {
        self.beats
            .read()
            .map(|beats| {
                beats.values().any(|at| {
                    now.duration_since(*at).map(|age| age <= window).unwrap_or(true)
                })
            })
            .unwrap_or(false)
    }
}

/// Counters for pool monitoring.
#[derive(Default)]
pub struct PoolStats {
    /// Tasks whose handler returned successfully.
    pub processed: AtomicU64,
    /// Tasks returned to the queue for redelivery.
    pub redelivered: AtomicU64,
    /// Tasks dropped after exhausting redeliveries.
    pub dropped: AtomicU64,
}

/// Worker pool that supervises handler tasks for one queue.
pub struct WorkerPool {
    config: WorkerConfig,
    cancellation: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    heartbeats: Arc<Heartbeats>,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    /// Spawns `worker_count` workers consuming `config.queue`.
    pub fn spawn(
        config: WorkerConfig,
        queue: Arc<dyn TaskQueue>,
        handler: Arc<dyn TaskHandler>,
        clock: Arc<dyn Clock>,
        cancellation: CancellationToken,
    ) -> Self {
        info!(
            queue = %config.queue,
            worker_count = config.worker_count,
            "spawning workers"
        );

        let heartbeats = Arc::new(Heartbeats::new());
        let stats = Arc::new(PoolStats::default());
        let mut handles = Vec::with_capacity(config.worker_count);

        for worker_id in 0..config.worker_count {
            let worker = Worker {
                id: worker_id,
                config: config.clone(),
                queue: queue.clone(),
                handler: handler.clone(),
                clock: clock.clone(),
                cancellation: cancellation.clone(),
                heartbeats: heartbeats.clone(),
                stats: stats.clone(),
            };
            handles.push(tokio::spawn(async move { worker.run().await }));
        }

        Self { config, cancellation, handles, heartbeats, stats }
    }

    /// Heartbeat board for the health surface.
    pub fn heartbeats(&self) -> Arc<Heartbeats> {
        self.heartbeats.clone()
    }

    /// Pool counters.
    pub fn stats(&self) -> Arc<PoolStats> {
        self.stats.clone()
    }

    /// Signals cancellation and waits for workers to drain.
    pub async fn shutdown_graceful(mut self) -> anyhow::Result<()> {
        let queue = self.config.queue;
        let shutdown_timeout = self.config.shutdown_timeout;

        info!(queue = %queue, "initiating graceful worker shutdown");
        self.cancellation.cancel();

        let handles = std::mem::take(&mut self.handles);
        let drain = async {
            for (worker_id, handle) in handles.into_iter().enumerate() {
                if let Err(join_error) = handle.await {
                    error!(worker_id, error = %join_error, "worker task panicked during shutdown");
                }
            }
        };

        match tokio::time::timeout(shutdown_timeout, drain).await {
            Ok(()) => {
                info!(queue = %queue, "worker pool shutdown completed");
                Ok(())
            },
            Err(_) => {
                error!(
                    queue = %queue,
                    timeout_seconds = shutdown_timeout.as_secs(),
                    "worker shutdown timed out, some workers may still be running"
                );
                anyhow::bail!("worker pool shutdown timed out")
            },
        }
    }

    /// Whether any worker task is still running.
    pub fn has_active_workers(&self) -> bool {
        self.handles.iter().any(|handle| !handle.is_finished())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let active = self.handles.iter().filter(|handle| !handle.is_finished()).count();
        if active > 0 && !self.cancellation.is_cancelled() {
            warn!(
                queue = %self.config.queue,
                active_workers = active,
                "worker pool dropped without shutdown_graceful, forcing cancellation"
            );
            self.cancellation.cancel();
        }
    }
}

struct Worker {
    id: usize,
    config: WorkerConfig,
    queue: Arc<dyn TaskQueue>,
    handler: Arc<dyn TaskHandler>,
    clock: Arc<dyn Clock>,
    cancellation: CancellationToken,
    heartbeats: Arc<Heartbeats>,
    stats: Arc<PoolStats>,
}

impl Worker {
    async fn run(&self) {
        info!(worker_id = self.id, queue = %self.config.queue, "worker starting");

        loop {
            if self.cancellation.is_cancelled() {
                break;
            }
            self.heartbeats.beat(self.id, self.clock.now_system());

            match self.queue.dequeue(self.config.queue, self.config.lease).await {
                Ok(Some(leased)) => self.process(leased).await,
                Ok(None) => {
                    tokio::select! {
                        () = self.clock.sleep(self.config.poll_interval) => {},
                        () = self.cancellation.cancelled() => break,
                    }
                },
                Err(error) => {
                    error!(
                        worker_id = self.id,
                        queue = %self.config.queue,
                        error = %error,
                        "dequeue failed"
                    );
                    tokio::select! {
                        () = self.clock.sleep(Duration::from_secs(5)) => {},
                        () = self.cancellation.cancelled() => break,
                    }
                },
            }
        }

        info!(worker_id = self.id, queue = %self.config.queue, "worker stopped");
    }

    async fn process(&self, leased: Leased) {
        let Leased { task, receipt } = leased;
        let task_id = task.task_id;
        let correlation_id = task.correlation_id;
        let kind = task.payload.kind();

        debug!(
            worker_id = self.id,
            task_id = %task_id,
            correlation_id = %correlation_id,
            kind = %kind,
            attempt_count = task.attempt_count,
            "executing task"
        );

        let outcome =
            tokio::time::timeout(self.config.task_timeout, self.handler.handle(task.clone())).await;

        match outcome {
            Ok(Ok(())) => {
                self.stats.processed.fetch_add(1, Ordering::Relaxed);
                if let Err(error) = self.queue.ack(receipt).await {
                    warn!(
                        worker_id = self.id,
                        task_id = %task_id,
                        error = %error,
                        "failed to acknowledge completed task"
                    );
                }
            },
            Ok(Err(error)) => {
                self.requeue(receipt, task, &format!("{error:#}")).await;
            },
            Err(_elapsed) => {
                // A task past its wall-clock ceiling is a transient failure.
                self.requeue(
                    receipt,
                    task,
                    &format!("task timed out after {:?}", self.config.task_timeout),
                )
                .await;
            },
        }
    }

    async fn requeue(&self, receipt: crate::queue::Receipt, mut task: QueueTask, reason: &str) {
        if task.attempt_count + 1 >= self.config.max_redeliveries {
            error!(
                worker_id = self.id,
                task_id = %task.task_id,
                correlation_id = %task.correlation_id,
                attempt_count = task.attempt_count,
                reason,
                "task exhausted worker redeliveries, dropping"
            );
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            if let Err(error) = self.queue.ack(receipt).await {
                warn!(worker_id = self.id, error = %error, "failed to drop exhausted task");
            }
            return;
        }

        warn!(
            worker_id = self.id,
            task_id = %task.task_id,
            correlation_id = %task.correlation_id,
            attempt_count = task.attempt_count,
            reason,
            "task failed, returning to queue"
        );
        task.attempt_count += 1;
        self.stats.redelivered.fetch_add(1, Ordering::Relaxed);
        if let Err(error) = self.queue.nack(receipt, task, self.config.nack_delay).await {
            warn!(worker_id = self.id, error = %error, "failed to nack task, relying on lease expiry");
        }
    }
}
