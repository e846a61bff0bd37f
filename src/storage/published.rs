use async_trait::async_trait;
use chrono::Utc;
use sqlx::QueryBuilder;

use super::schema::SqliteStore;
use super::types::{PublicationRecord, StoreError};
use super::PublicationStore;

#[async_trait]
impl PublicationStore for SqliteStore {
    async fn exists(&self, guid: &str) -> Result<bool, StoreError> {
        let found: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM published_articles WHERE guid = ? AND expires_at > ?)",
        )
        .bind(guid)
        .bind(Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(found != 0)
    }

    async fn batch_put(
        &self,
        records: Vec<PublicationRecord>,
    ) -> Result<Vec<PublicationRecord>, StoreError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        if records.len() > Self::MAX_BATCH_ITEMS {
            return Err(StoreError::BatchTooLarge {
                size: records.len(),
                limit: Self::MAX_BATCH_ITEMS,
            });
        }

        match self.write_batch(&records).await {
            Ok(()) => Ok(Vec::new()),
            Err(e) => match StoreError::from_sqlx(e) {
                // Lock contention: nothing from this transaction landed.
                StoreError::Busy(reason) => {
                    tracing::debug!(
                        records = records.len(),
                        reason = %reason,
                        "Store busy, returning batch as unprocessed"
                    );
                    Ok(records)
                }
                other => Err(other),
            },
        }
    }

    fn max_batch_size(&self) -> usize {
        Self::MAX_BATCH_ITEMS
    }
}

impl SqliteStore {
    /// Insert one batch in a single transaction.
    ///
    /// A record sharing `(guid, timestamp)` with an existing row is ignored;
    /// either row proves the article was published.
    async fn write_batch(&self, records: &[PublicationRecord]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let mut builder = QueryBuilder::new(
            "INSERT OR IGNORE INTO published_articles \
             (guid, timestamp, expires_at, topic, source, title, link) ",
        );
        builder.push_values(records, |mut row, record| {
            row.push_bind(record.guid.clone())
                .push_bind(record.timestamp)
                .push_bind(record.expires_at)
                .push_bind(record.topic.clone())
                .push_bind(record.source.clone())
                .push_bind(record.title.clone())
                .push_bind(record.link.clone());
        });
        builder.build().execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Delete records whose expiry has passed. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM published_articles WHERE expires_at <= ?")
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        Ok(result.rows_affected())
    }

    /// All records stored for `guid`, oldest first. Expired rows included.
    pub async fn records_for(&self, guid: &str) -> Result<Vec<PublicationRecord>, StoreError> {
        sqlx::query_as::<_, PublicationRecord>(
            "SELECT guid, timestamp, expires_at, topic, source, title, link \
             FROM published_articles WHERE guid = ? ORDER BY timestamp ASC",
        )
        .bind(guid)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }
}
