//! In-memory status store implementing the same contract as PostgreSQL.
//!
//! The contract double for tests: deterministic, clock-injected expiry,
//! and single-shot error injection for exercising store-failure paths.
//! Production wiring never falls back to this implementation.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    dead_letter_key, task_key, webhook_key, StatusFilter, StatusPage, StatusStore, StoreFuture,
};
use crate::{
    error::{CoreError, Result},
    models::{
        DeadLetterEntry, TaskId, TaskRecord, WebhookId, WebhookRecord, WebhookStatus, TTL_ACTIVE,
        TTL_DEAD_LETTER,
    },
    time::{now_utc, Clock},
};

#[derive(Debug, Clone)]
struct Stored<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    webhooks: HashMap<String, Stored<WebhookRecord>>,
    dead_letters: HashMap<String, Stored<DeadLetterEntry>>,
    tasks: HashMap<String, Stored<TaskRecord>>,
    injected_error: Option<String>,
}

/// In-memory key/value store with clock-driven expiry.
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Creates an empty store reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { state: Arc::new(RwLock::new(State::default())), clock }
    }

    /// Makes the next store operation fail with `message`.
    pub async fn inject_error(&self, message: impl Into<String>) {
        self.state.write().await.injected_error = Some(message.into());
    }

    /// Remaining retention for a webhook record, for asserting the TTL law.
    pub async fn webhook_ttl(&self, webhook_id: &WebhookId) -> Option<Duration> {
        let now = now_utc(&*self.clock);
        let state = self.state.read().await;
        state
            .webhooks
            .get(&webhook_key(webhook_id))
            .and_then(|stored| (stored.expires_at - now).to_std().ok())
    }

    /// Remaining retention for a dead-letter entry.
    pub async fn dead_letter_ttl(&self, webhook_id: &WebhookId) -> Option<Duration> {
        let now = now_utc(&*self.clock);
        let state = self.state.read().await;
        state
            .dead_letters
            .get(&dead_letter_key(webhook_id))
            .and_then(|stored| (stored.expires_at - now).to_std().ok())
    }

    fn take_injected(state: &mut State) -> Result<()> {
        match state.injected_error.take() {
            Some(message) => Err(CoreError::Store(message)),
            None => Ok(()),
        }
    }

    fn ttl_to_chrono(ttl: Duration) -> chrono::Duration {
        chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36500))
    }
}

impl StatusStore for MemoryStore {
    fn put(&self, record: WebhookRecord) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let now = now_utc(&*self.clock);
            let mut state = self.state.write().await;
            Self::take_injected(&mut state)?;

            let expires_at = now + Self::ttl_to_chrono(record.ttl());
            state
                .webhooks
                .insert(webhook_key(&record.webhook_id), Stored { value: record, expires_at });
            Ok(())
        })
    }

    fn get(&self, webhook_id: WebhookId) -> StoreFuture<'_, Option<WebhookRecord>> {
        Box::pin(async move {
            let now = now_utc(&*self.clock);
            let mut state = self.state.write().await;
            Self::take_injected(&mut state)?;

            Ok(state
                .webhooks
                .get(&webhook_key(&webhook_id))
                .filter(|stored| stored.expires_at > now)
                .map(|stored| stored.value.clone()))
        })
    }

    fn delete(&self, webhook_id: WebhookId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            Self::take_injected(&mut state)?;

            Ok(state.webhooks.remove(&webhook_key(&webhook_id)).is_some())
        })
    }

    fn compare_and_swap(
        &self,
        expected: WebhookStatus,
        record: WebhookRecord,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let now = now_utc(&*self.clock);
            let mut state = self.state.write().await;
            Self::take_injected(&mut state)?;

            let key = webhook_key(&record.webhook_id);
            let current_status = state
                .webhooks
                .get(&key)
                .filter(|stored| stored.expires_at > now)
                .map(|stored| stored.value.status);

            if current_status != Some(expected) {
                return Ok(false);
            }

            let expires_at = now + Self::ttl_to_chrono(record.ttl());
            state.webhooks.insert(key, Stored { value: record, expires_at });
            Ok(true)
        })
    }

    fn scan(&self, filter: StatusFilter, page: u32, page_size: u32) -> StoreFuture<'_, StatusPage> {
        Box::pin(async move {
            let now = now_utc(&*self.clock);
            let mut state = self.state.write().await;
            Self::take_injected(&mut state)?;

            let mut matching: Vec<WebhookRecord> = state
                .webhooks
                .values()
                .filter(|stored| stored.expires_at > now)
                .map(|stored| &stored.value)
                .filter(|record| filter.matches(record))
                .cloned()
                .collect();
            // Ordering is unspecified by the contract but must be stable
            // within a scan.
            matching.sort_by(|a, b| a.webhook_id.as_str().cmp(b.webhook_id.as_str()));

            let total = matching.len() as u64;
            let offset = (page.max(1) as usize - 1) * page_size as usize;
            let items = matching.into_iter().skip(offset).take(page_size as usize).collect();

            Ok(StatusPage { items, total })
        })
    }

    fn bulk_delete(&self, filter: StatusFilter, older_than: Duration) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let now = now_utc(&*self.clock);
            let cutoff = now - Self::ttl_to_chrono(older_than);
            let mut state = self.state.write().await;
            Self::take_injected(&mut state)?;

            let before = state.webhooks.len();
            state.webhooks.retain(|_, stored| {
                let expired = stored.expires_at <= now;
                let matches = filter.matches(&stored.value) && stored.value.created_at <= cutoff;
                !(expired || matches)
            });
            Ok((before - state.webhooks.len()) as u64)
        })
    }

    fn put_dead_letter(&self, entry: DeadLetterEntry) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let now = now_utc(&*self.clock);
            let mut state = self.state.write().await;
            Self::take_injected(&mut state)?;

            let expires_at = now + Self::ttl_to_chrono(TTL_DEAD_LETTER);
            state
                .dead_letters
                .insert(dead_letter_key(&entry.webhook_id), Stored { value: entry, expires_at });
            Ok(())
        })
    }

    fn get_dead_letter(&self, webhook_id: WebhookId) -> StoreFuture<'_, Option<DeadLetterEntry>> {
        Box::pin(async move {
            let now = now_utc(&*self.clock);
            let mut state = self.state.write().await;
            Self::take_injected(&mut state)?;

            Ok(state
                .dead_letters
                .get(&dead_letter_key(&webhook_id))
                .filter(|stored| stored.expires_at > now)
                .map(|stored| stored.value.clone()))
        })
    }

    fn list_dead_letters(&self) -> StoreFuture<'_, Vec<WebhookId>> {
        Box::pin(async move {
            let now = now_utc(&*self.clock);
            let state = self.state.read().await;

            let mut ids: Vec<WebhookId> = state
                .dead_letters
                .values()
                .filter(|stored| stored.expires_at > now)
                .map(|stored| stored.value.webhook_id.clone())
                .collect();
            ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
            Ok(ids)
        })
    }

    fn put_task(&self, record: TaskRecord) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let now = now_utc(&*self.clock);
            let mut state = self.state.write().await;
            Self::take_injected(&mut state)?;

            let expires_at = now + Self::ttl_to_chrono(TTL_ACTIVE);
            state.tasks.insert(task_key(&record.task_id), Stored { value: record, expires_at });
            Ok(())
        })
    }

    fn get_task(&self, task_id: TaskId) -> StoreFuture<'_, Option<TaskRecord>> {
        Box::pin(async move {
            let now = now_utc(&*self.clock);
            let state = self.state.read().await;

            Ok(state
                .tasks
                .get(&task_key(&task_id))
                .filter(|stored| stored.expires_at > now)
                .map(|stored| stored.value.clone()))
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            Self::take_injected(&mut state)?;
            Ok(())
        })
    }
}
