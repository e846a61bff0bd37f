//! Durable record of which articles were already delivered.

mod published;
mod schema;
mod tracker;
mod types;

use async_trait::async_trait;

pub use schema::SqliteStore;
pub use tracker::PublicationTracker;
pub use types::{PublicationRecord, StoreError};

/// Key-value store of publication records.
///
/// Implementations own record expiry: `exists` must ignore records past
/// their `expires_at`.
#[async_trait]
pub trait PublicationStore: Send + Sync {
    /// Whether any live record exists for `guid`.
    async fn exists(&self, guid: &str) -> Result<bool, StoreError>;

    /// Write up to `max_batch_size()` records. Returns the records that were
    /// not written; an empty vector means everything landed.
    async fn batch_put(
        &self,
        records: Vec<PublicationRecord>,
    ) -> Result<Vec<PublicationRecord>, StoreError>;

    /// Largest batch `batch_put` accepts.
    fn max_batch_size(&self) -> usize;
}
