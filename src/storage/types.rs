use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::feed::Article;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised by a [`PublicationStore`](super::PublicationStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database is locked by another writer. Writes hitting this are
    /// reported back as unprocessed rather than failing.
    #[error("Store is busy: {0}")]
    Busy(String),

    /// Records the store accepted the request for but did not write.
    #[error("Store left {0} records unprocessed")]
    Unprocessed(usize),

    /// A batch larger than the store's per-request limit was submitted.
    #[error("Batch of {size} records exceeds the store limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl StoreError {
    /// Classifies lock contention separately from other sqlx errors.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
        {
            return StoreError::Busy(err.to_string());
        }

        StoreError::Other(err)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// Durable proof that an article went out in a digest.
///
/// Keyed by `(guid, timestamp)`; the store drops it after `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PublicationRecord {
    pub guid: String,
    /// Unix seconds at which the article was delivered.
    pub timestamp: i64,
    /// Unix seconds after which the store may forget the record.
    pub expires_at: i64,
    pub topic: String,
    pub source: String,
    pub title: String,
    pub link: String,
}

impl PublicationRecord {
    pub fn new(article: &Article, published_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            guid: article.guid.clone(),
            timestamp: published_at.timestamp(),
            expires_at: expires_at.timestamp(),
            topic: article.topic.clone().unwrap_or_default(),
            source: article.source.clone().unwrap_or_default(),
            title: article.title.clone(),
            link: article.link.clone(),
        }
    }
}
