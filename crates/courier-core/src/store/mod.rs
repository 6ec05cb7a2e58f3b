//! Status store: a durable key/value facade for webhook state.
//!
//! The store owns three namespaces — `webhook_status:*`,
//! `dead_letter:webhook:*`, and `task_status:*` — each holding JSON records
//! with a per-class retention period. The trait is the single seam between
//! the lifecycle manager and persistence: production uses the PostgreSQL
//! implementation, tests run the same contract against `MemoryStore`.
//!
//! All webhook record mutations go through the lifecycle manager in
//! [`crate::status`]; nothing else writes to the store.

use std::{future::Future, pin::Pin, time::Duration};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::{
    error::Result,
    models::{DeadLetterEntry, TaskId, TaskRecord, WebhookId, WebhookRecord, WebhookStatus},
};

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Key prefix for webhook status records.
pub const WEBHOOK_STATUS_PREFIX: &str = "webhook_status:";

/// Key prefix for dead-letter entries.
pub const DEAD_LETTER_PREFIX: &str = "dead_letter:webhook:";

/// Key prefix for compute task records.
pub const TASK_STATUS_PREFIX: &str = "task_status:";

/// Storage key for a webhook record.
pub fn webhook_key(id: &WebhookId) -> String {
    format!("{WEBHOOK_STATUS_PREFIX}{id}")
}

/// Storage key for a dead-letter entry.
pub fn dead_letter_key(id: &WebhookId) -> String {
    format!("{DEAD_LETTER_PREFIX}{id}")
}

/// Storage key for a task record.
pub fn task_key(id: &TaskId) -> String {
    format!("{TASK_STATUS_PREFIX}{id}")
}

/// Optional predicates for listing and bulk deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusFilter {
    /// Match records whose `reference_id` starts with this prefix.
    pub reference_id: Option<String>,
    /// Match records in exactly this status.
    pub status: Option<WebhookStatus>,
}

impl StatusFilter {
    /// Whether a record satisfies the filter.
    pub fn matches(&self, record: &WebhookRecord) -> bool {
        if let Some(prefix) = &self.reference_id {
            if !record.reference_id.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        true
    }
}

/// One page of scan results.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPage {
    /// Records on this page.
    pub items: Vec<WebhookRecord>,
    /// Best-effort total count of matching records.
    pub total: u64,
}

/// Storage operations required by the status lifecycle.
///
/// Implementations persist records with the retention the model declares
/// ([`WebhookRecord::ttl`], [`crate::models::TTL_DEAD_LETTER`],
/// [`crate::models::TTL_ACTIVE`] for task records); expired entries are
/// invisible to reads. Every method maps backing failures to
/// [`crate::error::CoreError::Store`].
pub trait StatusStore: Send + Sync + 'static {
    /// Writes a webhook record, overwriting any prior value and resetting
    /// the retention period for the record's status class.
    fn put(&self, record: WebhookRecord) -> StoreFuture<'_, ()>;

    /// Reads a webhook record; `None` when absent or expired.
    fn get(&self, webhook_id: WebhookId) -> StoreFuture<'_, Option<WebhookRecord>>;

    /// Removes a webhook record; returns whether one existed.
    fn delete(&self, webhook_id: WebhookId) -> StoreFuture<'_, bool>;

    /// Writes `record` only if the stored record is currently in
    /// `expected` status. Returns whether the swap applied.
    ///
    /// This is the serialization point for concurrent writers to the same
    /// webhook id; the lifecycle manager retries a stale swap once.
    fn compare_and_swap(
        &self,
        expected: WebhookStatus,
        record: WebhookRecord,
    ) -> StoreFuture<'_, bool>;

    /// Returns one page of records matching `filter`.
    ///
    /// Ordering is unspecified but stable across pages of one scan. The
    /// total count is best-effort.
    fn scan(&self, filter: StatusFilter, page: u32, page_size: u32) -> StoreFuture<'_, StatusPage>;

    /// Deletes records matching `filter` whose `created_at` is older than
    /// `older_than`. Returns the number deleted.
    fn bulk_delete(&self, filter: StatusFilter, older_than: Duration) -> StoreFuture<'_, u64>;

    /// Writes a dead-letter entry.
    fn put_dead_letter(&self, entry: DeadLetterEntry) -> StoreFuture<'_, ()>;

    /// Reads a dead-letter entry; `None` when absent or expired.
    fn get_dead_letter(&self, webhook_id: WebhookId) -> StoreFuture<'_, Option<DeadLetterEntry>>;

    /// Lists webhook ids with a live dead-letter entry.
    fn list_dead_letters(&self) -> StoreFuture<'_, Vec<WebhookId>>;

    /// Writes a compute task record.
    fn put_task(&self, record: TaskRecord) -> StoreFuture<'_, ()>;

    /// Reads a compute task record; `None` when absent or expired.
    fn get_task(&self, task_id: TaskId) -> StoreFuture<'_, Option<TaskRecord>>;

    /// Verifies the backing store is reachable.
    fn ping(&self) -> StoreFuture<'_, ()>;
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::{CorrelationId, TaskId};

    fn record(reference_id: &str, status: WebhookStatus) -> WebhookRecord {
        let mut r = WebhookRecord::pending(
            reference_id,
            TaskId::new(),
            "https://ok.example.com/hook",
            CorrelationId::new(),
            3,
            Utc::now(),
        );
        r.status = status;
        r
    }

    #[test]
    fn keys_carry_namespace_prefixes() {
        let task_id = TaskId::new();
        let id = WebhookId::new("REF1", task_id);

        assert_eq!(webhook_key(&id), format!("webhook_status:REF1_{task_id}"));
        assert_eq!(dead_letter_key(&id), format!("dead_letter:webhook:REF1_{task_id}"));
        assert_eq!(task_key(&task_id), format!("task_status:{task_id}"));
    }

    #[test]
    fn filter_matches_prefix_and_status() {
        let filter = StatusFilter {
            reference_id: Some("REF".into()),
            status: Some(WebhookStatus::Pending),
        };

        assert!(filter.matches(&record("REF1", WebhookStatus::Pending)));
        assert!(!filter.matches(&record("OTHER", WebhookStatus::Pending)));
        assert!(!filter.matches(&record("REF1", WebhookStatus::Delivered)));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = StatusFilter::default();
        assert!(filter.matches(&record("anything", WebhookStatus::Failed)));
    }
}
