use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Months, Utc};

use super::types::{PublicationRecord, StoreError};
use super::PublicationStore;
use crate::feed::Article;
use crate::util::retry::{retry, RetryPolicy};

/// Answers "was this article already delivered?" and records deliveries.
///
/// Cloning is cheap; every feed task holds its own handle to the same store.
pub struct PublicationTracker<S> {
    store: Arc<S>,
}

impl<S> Clone for PublicationTracker<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: PublicationStore> PublicationTracker<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Store lookup for `guid`. Errors are returned, never read as "unpublished".
    pub async fn is_published(&self, guid: &str) -> Result<bool, StoreError> {
        self.store.exists(guid).await
    }

    /// Record every article as published now, expiring one year from now.
    ///
    /// Records are written in chunks of `max_batch_size()`. Within a chunk,
    /// records the store reports unprocessed are resent once; anything still
    /// unprocessed after that is logged and dropped.
    pub async fn mark_published(&self, articles: &[Article]) -> Result<(), StoreError> {
        if articles.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let expires_at = one_year_after(now);
        let records: Vec<PublicationRecord> = articles
            .iter()
            .map(|article| PublicationRecord::new(article, now, expires_at))
            .collect();

        let batch_size = self.store.max_batch_size().max(1);
        for (chunk_index, chunk) in records.chunks(batch_size).enumerate() {
            self.write_chunk(chunk_index, chunk.to_vec()).await?;
        }

        tracing::debug!(records = records.len(), "Marked articles as published");
        Ok(())
    }

    async fn write_chunk(
        &self,
        chunk_index: usize,
        chunk: Vec<PublicationRecord>,
    ) -> Result<(), StoreError> {
        let pending = Mutex::new(chunk);
        let pending_ref = &pending;
        let store = &self.store;

        let result = retry(
            RetryPolicy::unprocessed_writes(),
            "mark_published",
            |e: &StoreError| matches!(e, StoreError::Unprocessed(_)),
            |_attempt| async move {
                let batch = std::mem::take(&mut *lock(pending_ref));
                let unprocessed = store.batch_put(batch).await?;
                if unprocessed.is_empty() {
                    return Ok(());
                }
                let count = unprocessed.len();
                *lock(pending_ref) = unprocessed;
                Err(StoreError::Unprocessed(count))
            },
        )
        .await;

        match result {
            Err(StoreError::Unprocessed(count)) => {
                let dropped = lock(&pending);
                let guids: Vec<&str> = dropped.iter().map(|r| r.guid.as_str()).collect();
                tracing::warn!(
                    chunk = chunk_index,
                    unprocessed = count,
                    guids = ?guids,
                    "Records still unprocessed after retry; they may be delivered again"
                );
                Ok(())
            }
            other => other,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn one_year_after(now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_add_months(Months::new(12))
        .unwrap_or_else(|| now + Duration::days(365))
}
