//! Status lifecycle manager: the single entry point for record mutations.
//!
//! Enforces the webhook state machine, assigns retention on every write,
//! and serializes concurrent writers to one webhook id through the store's
//! compare-and-swap. A stale swap is retried once against a fresh read,
//! then surfaced as an internal error.

use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};

use crate::{
    error::{CoreError, Result},
    models::{
        ClaimEnvelope, CorrelationId, DeadLetterEntry, TaskId, TaskRecord, TaskStatus, WebhookId,
        WebhookRecord, WebhookStatus,
    },
    store::{StatusFilter, StatusPage, StatusStore},
    time::{now_utc, Clock},
};

/// How long an `in_progress` record may sit untouched before another
/// invocation may resume it. Covers workers that died mid-attempt without
/// writing an outcome; must exceed the delivery client timeout and stay
/// below the queue's redelivery delay for infrastructure failures.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60);

/// Lifecycle manager over the status store.
pub struct StatusManager {
    store: Arc<dyn StatusStore>,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
}

impl StatusManager {
    /// Creates a manager with the default stale-attempt window.
    pub fn new(store: Arc<dyn StatusStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock, stale_after: DEFAULT_STALE_AFTER }
    }

    /// Overrides the stale-attempt window.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Creates and persists a fresh `pending` record for a claim that
    /// carries a callback URL.
    pub async fn create_pending(
        &self,
        reference_id: &str,
        task_id: TaskId,
        webhook_url: &str,
        correlation_id: CorrelationId,
        max_attempts: u32,
    ) -> Result<WebhookRecord> {
        let record = WebhookRecord::pending(
            reference_id,
            task_id,
            webhook_url,
            correlation_id,
            max_attempts,
            now_utc(&*self.clock),
        );
        self.store.put(record.clone()).await?;
        Ok(record)
    }

    /// Claims the record for one delivery attempt.
    ///
    /// Returns `None` without touching the record when it is absent, in a
    /// terminal state, already out of attempts, or currently held by a
    /// fresh in-flight attempt (the single-in-flight guarantee). An
    /// `in_progress` record whose last attempt started longer ago than the
    /// stale window is resumed without consuming an extra attempt.
    pub async fn begin_attempt(
        &self,
        webhook_id: &WebhookId,
        digest: Option<String>,
    ) -> Result<Option<WebhookRecord>> {
        for _ in 0..2 {
            let Some(record) = self.store.get(webhook_id.clone()).await? else {
                debug!(webhook_id = %webhook_id, "no record for delivery task");
                return Ok(None);
            };

            if record.status.is_terminal() {
                debug!(webhook_id = %webhook_id, status = %record.status, "record already terminal");
                return Ok(None);
            }

            let now = now_utc(&*self.clock);
            let resuming = record.status == WebhookStatus::InProgress;
            if resuming {
                let stale = record.last_attempt_at.is_none_or(|at| {
                    (now - at).to_std().map_or(true, |age| age >= self.stale_after)
                });
                if !stale {
                    debug!(webhook_id = %webhook_id, "attempt already in flight");
                    return Ok(None);
                }
            } else if record.attempts >= record.max_attempts {
                return Ok(None);
            }

            let mut claimed = record.clone();
            claimed.status = WebhookStatus::InProgress;
            claimed.last_attempt_at = Some(now);
            if !resuming {
                claimed.attempts += 1;
            }
            if let Some(digest) = &digest {
                claimed.payload_digest = Some(digest.clone());
            }

            if self.store.compare_and_swap(record.status, claimed.clone()).await? {
                return Ok(Some(claimed));
            }
            // Another writer got there first; one fresh read decides.
        }

        Err(CoreError::internal(format!(
            "lost compare-and-swap race twice for {webhook_id}"
        )))
    }

    /// Terminal success: a 2xx response was observed.
    pub async fn complete_delivered(
        &self,
        record: &WebhookRecord,
        response_code: u16,
    ) -> Result<WebhookRecord> {
        let mut updated = record.clone();
        updated.status = WebhookStatus::Delivered;
        updated.completed_at = Some(now_utc(&*self.clock));
        updated.response_code = Some(response_code);
        self.transition(record.status, updated).await
    }

    /// A retriable failure occurred; the record waits for its delayed
    /// re-enqueue.
    pub async fn mark_retrying(
        &self,
        record: &WebhookRecord,
        error_class: &str,
        response_code: Option<u16>,
    ) -> Result<WebhookRecord> {
        let mut updated = record.clone();
        updated.status = WebhookStatus::Retrying;
        updated.last_error = Some(error_class.to_string());
        if response_code.is_some() {
            updated.response_code = response_code;
        }
        self.transition(record.status, updated).await
    }

    /// Terminal failure: permanent classification or attempts exhausted.
    pub async fn fail_permanent(
        &self,
        record: &WebhookRecord,
        error_class: &str,
        response_code: Option<u16>,
    ) -> Result<WebhookRecord> {
        let mut updated = record.clone();
        updated.status = WebhookStatus::Failed;
        updated.completed_at = Some(now_utc(&*self.clock));
        updated.last_error = Some(error_class.to_string());
        if response_code.is_some() {
            updated.response_code = response_code;
        }
        self.transition(record.status, updated).await
    }

    /// Writes the dead-letter entry for a permanently failed record.
    pub async fn write_dead_letter(
        &self,
        record: &WebhookRecord,
        payload: serde_json::Value,
        error_class: &str,
        error_detail: &str,
    ) -> Result<()> {
        let entry = DeadLetterEntry {
            webhook_id: record.webhook_id.clone(),
            reference_id: record.reference_id.clone(),
            webhook_url: record.webhook_url.clone(),
            payload,
            error_class: error_class.to_string(),
            error_detail: error_detail.to_string(),
            attempts: record.attempts,
            correlation_id: record.correlation_id,
            created_at: now_utc(&*self.clock),
        };
        self.store.put_dead_letter(entry).await
    }

    /// Reads a record.
    pub async fn get(&self, webhook_id: &WebhookId) -> Result<Option<WebhookRecord>> {
        self.store.get(webhook_id.clone()).await
    }

    /// Removes a record; returns whether one existed.
    pub async fn delete(&self, webhook_id: &WebhookId) -> Result<bool> {
        self.store.delete(webhook_id.clone()).await
    }

    /// One page of records matching the filter.
    pub async fn list(
        &self,
        filter: StatusFilter,
        page: u32,
        page_size: u32,
    ) -> Result<StatusPage> {
        self.store.scan(filter, page, page_size).await
    }

    /// Deletes records matching the filter regardless of age.
    pub async fn delete_matching(&self, filter: StatusFilter) -> Result<u64> {
        self.store.bulk_delete(filter, Duration::ZERO).await
    }

    /// Removes records older than `older_than` that match the optional
    /// predicates. Safe to run repeatedly and under concurrent traffic;
    /// a second identical run deletes nothing.
    pub async fn cleanup(
        &self,
        older_than: Duration,
        status: Option<WebhookStatus>,
        reference_id: Option<String>,
    ) -> Result<u64> {
        let deleted =
            self.store.bulk_delete(StatusFilter { reference_id, status }, older_than).await?;
        debug!(deleted, "status cleanup pass finished");
        Ok(deleted)
    }

    /// Reads a dead-letter entry.
    pub async fn get_dead_letter(&self, webhook_id: &WebhookId) -> Result<Option<DeadLetterEntry>> {
        self.store.get_dead_letter(webhook_id.clone()).await
    }

    /// Lists webhook ids with a live dead-letter entry.
    pub async fn list_dead_letters(&self) -> Result<Vec<WebhookId>> {
        self.store.list_dead_letters().await
    }

    /// Records a freshly accepted compute task.
    pub async fn task_queued(&self, task_id: TaskId, envelope: &ClaimEnvelope) -> Result<()> {
        let record = TaskRecord::queued(task_id, &envelope.reference_id, now_utc(&*self.clock));
        self.store.put_task(record).await
    }

    /// Marks a task as picked up by a compute worker.
    pub async fn task_processing(&self, task_id: TaskId) -> Result<()> {
        self.update_task(task_id, |record| {
            record.status = TaskStatus::Processing;
        })
        .await
    }

    /// Marks a task as waiting for a delayed compute retry.
    pub async fn task_retrying(&self, task_id: TaskId, error: &str) -> Result<()> {
        let error = error.to_string();
        self.update_task(task_id, move |record| {
            record.status = TaskStatus::Retrying;
            record.error = Some(error);
        })
        .await
    }

    /// Marks a task as completed with its result.
    pub async fn task_completed(&self, task_id: TaskId, result: serde_json::Value) -> Result<()> {
        self.update_task(task_id, move |record| {
            record.status = TaskStatus::Completed;
            record.result = Some(result);
            record.error = None;
        })
        .await
    }

    /// Marks a task as permanently failed.
    pub async fn task_failed(&self, task_id: TaskId, error: &str) -> Result<()> {
        let error = error.to_string();
        self.update_task(task_id, move |record| {
            record.status = TaskStatus::Failed;
            record.error = Some(error);
        })
        .await
    }

    /// Reads a task record.
    pub async fn get_task(&self, task_id: TaskId) -> Result<Option<TaskRecord>> {
        self.store.get_task(task_id).await
    }

    /// Verifies the backing store is reachable.
    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }

    async fn transition(
        &self,
        from: WebhookStatus,
        updated: WebhookRecord,
    ) -> Result<WebhookRecord> {
        if !from.can_transition_to(updated.status) {
            return Err(CoreError::IllegalTransition { from, to: updated.status });
        }

        if updated.attempts > updated.max_attempts {
            return Err(CoreError::internal(format!(
                "attempt count {} exceeds ceiling {} for {}",
                updated.attempts, updated.max_attempts, updated.webhook_id
            )));
        }

        if self.store.compare_and_swap(from, updated.clone()).await? {
            return Ok(updated);
        }

        // Stale write: one fresh read, one more swap.
        let current = self
            .store
            .get(updated.webhook_id.clone())
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("record {} vanished", updated.webhook_id)))?;

        if !current.status.can_transition_to(updated.status) {
            return Err(CoreError::IllegalTransition { from: current.status, to: updated.status });
        }
        if self.store.compare_and_swap(current.status, updated.clone()).await? {
            return Ok(updated);
        }

        Err(CoreError::internal(format!(
            "lost compare-and-swap race twice for {}",
            updated.webhook_id
        )))
    }

    async fn update_task(
        &self,
        task_id: TaskId,
        mutate: impl FnOnce(&mut TaskRecord) + Send,
    ) -> Result<()> {
        match self.store.get_task(task_id).await? {
            Some(mut record) => {
                mutate(&mut record);
                record.updated_at = now_utc(&*self.clock);
                self.store.put_task(record).await
            },
            None => {
                warn!(task_id = %task_id, "task record missing, skipping status update");
                Ok(())
            },
        }
    }
}
