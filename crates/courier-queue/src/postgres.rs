//! PostgreSQL queue implementation.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so workers never block each other;
//! the row id assigns FIFO order, `eta` hides delayed tasks, and
//! `lease_expires_at` is the visibility timeout. A task row is deleted
//! only on ack, after its handler returned.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::{
    error::{QueueError, Result},
    queue::{Leased, QueueFuture, QueueName, Receipt, TaskQueue},
    task::QueueTask,
};

/// Task queue backed by PostgreSQL.
#[derive(Clone)]
pub struct PostgresQueue {
    pool: PgPool,
    max_depth: Option<u64>,
}

impl PostgresQueue {
    /// Creates a queue over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool, max_depth: None }
    }

    /// Sets a per-queue high-water mark checked on enqueue.
    pub fn with_max_depth(mut self, max_depth: u64) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    async fn insert(
        &self,
        queue: QueueName,
        task: &QueueTask,
        eta: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if let Some(max_depth) = self.max_depth {
            let depth: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM queue_tasks WHERE queue = $1",
            )
            .bind(queue.as_str())
            .fetch_one(&self.pool)
            .await?;
            if u64::try_from(depth).unwrap_or(0) >= max_depth {
                return Err(QueueError::Full { queue: queue.as_str().to_string() });
            }
        }

        let json = serde_json::to_value(task)?;
        sqlx::query("INSERT INTO queue_tasks (queue, task, eta) VALUES ($1, $2, $3)")
            .bind(queue.as_str())
            .bind(json)
            .bind(eta)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl TaskQueue for PostgresQueue {
    fn enqueue(&self, queue: QueueName, task: QueueTask) -> QueueFuture<'_, ()> {
        Box::pin(async move { self.insert(queue, &task, None).await })
    }

    fn enqueue_delayed(
        &self,
        queue: QueueName,
        mut task: QueueTask,
        eta: DateTime<Utc>,
    ) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            task.eta = Some(eta);
            self.insert(queue, &task, Some(eta)).await
        })
    }

    fn dequeue(&self, queue: QueueName, lease: Duration) -> QueueFuture<'_, Option<Leased>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;

            let Some(row) = sqlx::query(
                r"
                SELECT id, task, lease_expires_at FROM queue_tasks
                WHERE queue = $1
                  AND (eta IS NULL OR eta <= NOW())
                  AND (lease_expires_at IS NULL OR lease_expires_at <= NOW())
                ORDER BY id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
                ",
            )
            .bind(queue.as_str())
            .fetch_optional(&mut *tx)
            .await?
            else {
                tx.rollback().await?;
                return Ok(None);
            };

            let id: i64 = row.try_get("id").map_err(QueueError::from)?;
            let json: serde_json::Value = row.try_get("task").map_err(QueueError::from)?;
            let prior_lease: Option<DateTime<Utc>> =
                row.try_get("lease_expires_at").map_err(QueueError::from)?;

            let mut task: QueueTask = serde_json::from_value(json)?;
            if prior_lease.is_some() {
                // An earlier lease expired; this is a redelivery.
                task.attempt_count += 1;
            }

            let json = serde_json::to_value(&task)?;
            sqlx::query(
                r"
                UPDATE queue_tasks
                SET task = $2,
                    lease_expires_at = NOW() + make_interval(secs => $3)
                WHERE id = $1
                ",
            )
            .bind(id)
            .bind(json)
            .bind(lease.as_secs_f64())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;

            Ok(Some(Leased {
                task,
                receipt: Receipt { queue, tag: u64::try_from(id).unwrap_or(0) },
            }))
        })
    }

    fn ack(&self, receipt: Receipt) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM queue_tasks WHERE id = $1")
                .bind(i64::try_from(receipt.tag).unwrap_or(i64::MAX))
                .execute(&self.pool)
                .await?;

            if result.rows_affected() == 0 {
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
            let json = serde_json::to_value(&task)?;
            let result = sqlx::query(
                r"
                UPDATE queue_tasks
                SET task = $2,
                    eta = NOW() + make_interval(secs => $3),
                    lease_expires_at = NULL
                WHERE id = $1
                ",
            )
            .bind(i64::try_from(receipt.tag).unwrap_or(i64::MAX))
            .bind(json)
            .bind(delay.as_secs_f64())
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(QueueError::UnknownReceipt {
                    queue: receipt.queue.as_str().to_string(),
                    tag: receipt.tag,
                });
            }
            Ok(())
        })
    }

    fn depth(&self, queue: QueueName) -> QueueFuture<'_, u64> {
        Box::pin(async move {
            let depth: i64 = sqlx::query_scalar(
                r"
                SELECT COUNT(*) FROM queue_tasks
                WHERE queue = $1
                  AND (lease_expires_at IS NULL OR lease_expires_at <= NOW())
                ",
            )
            .bind(queue.as_str())
            .fetch_one(&self.pool)
            .await?;

            Ok(u64::try_from(depth).unwrap_or(0))
        })
    }
}

#[cfg(test)]
mod tests {
    use courier_core::models::{CorrelationId, TaskId, WebhookId};

    use super::*;

    async fn connect() -> PgPool {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/courier_test".to_string());
        PgPool::connect(&url).await.expect("test database unavailable")
    }

    #[tokio::test]
    #[ignore = "requires a live PostgreSQL instance"]
    async fn fifo_claim_and_late_ack() {
        let queue = PostgresQueue::new(connect().await);
        let first = QueueTask::deliver(
            TaskId::new(),
            CorrelationId::new(),
            WebhookId("REF1_a".into()),
            serde_json::json!({}),
        );
        let second = QueueTask::deliver(
            TaskId::new(),
            CorrelationId::new(),
            WebhookId("REF1_b".into()),
            serde_json::json!({}),
        );

        queue.enqueue(QueueName::Webhook, first.clone()).await.unwrap();
        queue.enqueue(QueueName::Webhook, second).await.unwrap();

        let leased = queue
            .dequeue(QueueName::Webhook, Duration::from_secs(60))
            .await
            .unwrap()
            .expect("task available");
        assert_eq!(leased.task.task_id, first.task_id);

        queue.ack(leased.receipt).await.unwrap();
    }
}
