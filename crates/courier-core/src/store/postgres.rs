//! PostgreSQL status store.
//!
//! One row per namespaced key with the record as JSONB. Retention is the
//! `expires_at` column: reads filter expired rows out, bulk deletion and
//! the periodic cleanup reap them. The `webhook_status` table carries
//! `reference_id` and `status` columns denormalized from the record so
//! scans and the compare-and-swap predicate stay in SQL.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use super::{
    dead_letter_key, task_key, webhook_key, StatusFilter, StatusPage, StatusStore, StoreFuture,
    DEAD_LETTER_PREFIX,
};
use crate::{
    error::{CoreError, Result},
    models::{
        DeadLetterEntry, TaskId, TaskRecord, WebhookId, WebhookRecord, WebhookStatus, TTL_ACTIVE,
        TTL_DEAD_LETTER,
    },
};

/// Status store backed by PostgreSQL.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn expires_at(ttl: Duration) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36500))
    }
}

impl StatusStore for PostgresStore {
    fn put(&self, record: WebhookRecord) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let json = serde_json::to_value(&record)?;
            sqlx::query(
                r"
                INSERT INTO webhook_status (key, reference_id, status, record, created_at, expires_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (key) DO UPDATE
                SET reference_id = EXCLUDED.reference_id,
                    status = EXCLUDED.status,
                    record = EXCLUDED.record,
                    created_at = EXCLUDED.created_at,
                    expires_at = EXCLUDED.expires_at
                ",
            )
            .bind(webhook_key(&record.webhook_id))
            .bind(&record.reference_id)
            .bind(record.status.to_string())
            .bind(json)
            .bind(record.created_at)
            .bind(Self::expires_at(record.ttl()))
            .execute(&self.pool)
            .await?;

            Ok(())
        })
    }

    fn get(&self, webhook_id: WebhookId) -> StoreFuture<'_, Option<WebhookRecord>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT record FROM webhook_status WHERE key = $1 AND expires_at > NOW()",
            )
            .bind(webhook_key(&webhook_id))
            .fetch_optional(&self.pool)
            .await?;

            row.map(|row| {
                let json: serde_json::Value = row.try_get("record").map_err(CoreError::from)?;
                serde_json::from_value(json).map_err(CoreError::from)
            })
            .transpose()
        })
    }

    fn delete(&self, webhook_id: WebhookId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM webhook_status WHERE key = $1")
                .bind(webhook_key(&webhook_id))
                .execute(&self.pool)
                .await?;

            Ok(result.rows_affected() > 0)
        })
    }

    fn compare_and_swap(
        &self,
        expected: WebhookStatus,
        record: WebhookRecord,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let json = serde_json::to_value(&record)?;
            let result = sqlx::query(
                r"
                UPDATE webhook_status
                SET status = $2, record = $3, expires_at = $4
                WHERE key = $1 AND status = $5 AND expires_at > NOW()
                ",
            )
            .bind(webhook_key(&record.webhook_id))
            .bind(record.status.to_string())
            .bind(json)
            .bind(Self::expires_at(record.ttl()))
            .bind(expected.to_string())
            .execute(&self.pool)
            .await?;

            Ok(result.rows_affected() == 1)
        })
    }

    fn scan(&self, filter: StatusFilter, page: u32, page_size: u32) -> StoreFuture<'_, StatusPage> {
        Box::pin(async move {
            let status = filter.status.map(|s| s.to_string());
            let offset = i64::from(page.max(1) - 1) * i64::from(page_size);

            let total: i64 = sqlx::query_scalar(
                r"
                SELECT COUNT(*) FROM webhook_status
                WHERE expires_at > NOW()
                  AND ($1::text IS NULL OR reference_id LIKE $1 || '%')
                  AND ($2::text IS NULL OR status = $2)
                ",
            )
            .bind(filter.reference_id.as_deref())
            .bind(status.as_deref())
            .fetch_one(&self.pool)
            .await?;

            let rows = sqlx::query(
                r"
                SELECT record FROM webhook_status
                WHERE expires_at > NOW()
                  AND ($1::text IS NULL OR reference_id LIKE $1 || '%')
                  AND ($2::text IS NULL OR status = $2)
                ORDER BY key
                LIMIT $3 OFFSET $4
                ",
            )
            .bind(filter.reference_id.as_deref())
            .bind(status.as_deref())
            .bind(i64::from(page_size))
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

            let items = rows
                .into_iter()
                .map(|row| {
                    let json: serde_json::Value = row.try_get("record").map_err(CoreError::from)?;
                    serde_json::from_value(json).map_err(CoreError::from)
                })
                .collect::<Result<Vec<_>>>()?;

            Ok(StatusPage { items, total: u64::try_from(total).unwrap_or(0) })
        })
    }

    fn bulk_delete(&self, filter: StatusFilter, older_than: Duration) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let status = filter.status.map(|s| s.to_string());
            let cutoff = Utc::now()
                - chrono::Duration::from_std(older_than)
                    .unwrap_or_else(|_| chrono::Duration::days(36500));

            let result = sqlx::query(
                r"
                DELETE FROM webhook_status
                WHERE (created_at <= $1 OR expires_at <= NOW())
                  AND ($2::text IS NULL OR reference_id LIKE $2 || '%')
                  AND ($3::text IS NULL OR status = $3)
                ",
            )
            .bind(cutoff)
            .bind(filter.reference_id.as_deref())
            .bind(status.as_deref())
            .execute(&self.pool)
            .await?;

            Ok(result.rows_affected())
        })
    }

    fn put_dead_letter(&self, entry: DeadLetterEntry) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let json = serde_json::to_value(&entry)?;
            sqlx::query(
                r"
                INSERT INTO dead_letters (key, record, created_at, expires_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (key) DO UPDATE
                SET record = EXCLUDED.record,
                    created_at = EXCLUDED.created_at,
                    expires_at = EXCLUDED.expires_at
                ",
            )
            .bind(dead_letter_key(&entry.webhook_id))
            .bind(json)
            .bind(entry.created_at)
            .bind(Self::expires_at(TTL_DEAD_LETTER))
            .execute(&self.pool)
            .await?;

            Ok(())
        })
    }

    fn get_dead_letter(&self, webhook_id: WebhookId) -> StoreFuture<'_, Option<DeadLetterEntry>> {
        Box::pin(async move {
            let row =
                sqlx::query("SELECT record FROM dead_letters WHERE key = $1 AND expires_at > NOW()")
                    .bind(dead_letter_key(&webhook_id))
                    .fetch_optional(&self.pool)
                    .await?;

            row.map(|row| {
                let json: serde_json::Value = row.try_get("record").map_err(CoreError::from)?;
                serde_json::from_value(json).map_err(CoreError::from)
            })
            .transpose()
        })
    }

    fn list_dead_letters(&self) -> StoreFuture<'_, Vec<WebhookId>> {
        Box::pin(async move {
            let keys: Vec<String> = sqlx::query_scalar(
                "SELECT key FROM dead_letters WHERE expires_at > NOW() ORDER BY key",
            )
            .fetch_all(&self.pool)
            .await?;

            Ok(keys
                .into_iter()
                .filter_map(|key| {
                    key.strip_prefix(DEAD_LETTER_PREFIX).map(|id| WebhookId(id.to_string()))
                })
                .collect())
        })
    }

    fn put_task(&self, record: TaskRecord) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let json = serde_json::to_value(&record)?;
            sqlx::query(
                r"
                INSERT INTO task_status (key, record, created_at, expires_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (key) DO UPDATE
                SET record = EXCLUDED.record,
                    expires_at = EXCLUDED.expires_at
                ",
            )
            .bind(task_key(&record.task_id))
            .bind(json)
            .bind(record.created_at)
            .bind(Self::expires_at(TTL_ACTIVE))
            .execute(&self.pool)
            .await?;

            Ok(())
        })
    }

    fn get_task(&self, task_id: TaskId) -> StoreFuture<'_, Option<TaskRecord>> {
        Box::pin(async move {
            let row =
                sqlx::query("SELECT record FROM task_status WHERE key = $1 AND expires_at > NOW()")
                    .bind(task_key(&task_id))
                    .fetch_optional(&self.pool)
                    .await?;

            row.map(|row| {
                let json: serde_json::Value = row.try_get("record").map_err(CoreError::from)?;
                serde_json::from_value(json).map_err(CoreError::from)
            })
            .transpose()
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CorrelationId;

    async fn connect() -> PgPool {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/courier_test".to_string());
        PgPool::connect(&url).await.expect("test database unavailable")
    }

    #[tokio::test]
    #[ignore = "requires a live PostgreSQL instance"]
    async fn put_get_round_trip() {
        let store = PostgresStore::new(connect().await);
        let record = WebhookRecord::pending(
            "REF-pg",
            TaskId::new(),
            "https://ok.example.com/hook",
            CorrelationId::new(),
            3,
            Utc::now(),
        );
        let id = record.webhook_id.clone();

        store.put(record.clone()).await.unwrap();
        let loaded = store.get(id.clone()).await.unwrap();
        assert_eq!(loaded, Some(record));

        assert!(store.delete(id.clone()).await.unwrap());
        assert_eq!(store.get(id).await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore = "requires a live PostgreSQL instance"]
    async fn compare_and_swap_rejects_stale_writer() {
        let store = PostgresStore::new(connect().await);
        let record = WebhookRecord::pending(
            "REF-cas",
            TaskId::new(),
            "https://ok.example.com/hook",
            CorrelationId::new(),
            3,
            Utc::now(),
        );
        store.put(record.clone()).await.unwrap();

        let mut updated = record.clone();
        updated.status = WebhookStatus::InProgress;
        assert!(store.compare_and_swap(WebhookStatus::Pending, updated).await.unwrap());

        let mut stale = record.clone();
        stale.status = WebhookStatus::InProgress;
        assert!(!store.compare_and_swap(WebhookStatus::Pending, stale).await.unwrap());

        store.delete(record.webhook_id).await.unwrap();
    }
}
