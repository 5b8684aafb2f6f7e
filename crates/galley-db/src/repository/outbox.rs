//! # Sync Outbox Repository
//!
//! Durable queue of local mutations waiting for a backend acknowledgement.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Lifecycle                                     │
//! │                                                                         │
//! │  POS takes an order offline                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  queue(category, entity_id, operation, payload)                        │
//! │       │         synced_at = NULL, attempts = 0                         │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SyncOrchestrator run (once connectivity returns)               │   │
//! │  │                                                                 │   │
//! │  │  1. get_pending(batch, max_attempts)   oldest first            │   │
//! │  │  2. push batch to backend                                      │   │
//! │  │  3. acked  → mark_synced(ids)          one transaction         │   │
//! │  │     failed → mark_failed(id, error)    attempts += 1           │   │
//! │  │  4. pending_counts()                   authoritative counters  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  cleanup_synced(older_than) ← housekeeping                             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entries are replayed at least once. The backend deduplicates by entry id.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use galley_core::{OutboxCategory, OutboxOperation, PendingCounts, SyncOutboxEntry};

/// Repository for sync outbox operations.
#[derive(Debug, Clone)]
pub struct OutboxRepository {
    pool: SqlitePool,
}

impl OutboxRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OutboxRepository { pool }
    }

    /// Queues a mutation for replay.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let payload = serde_json::to_string(&order)?;
    /// db.outbox()
    ///     .queue(OutboxCategory::Orders, &order.id, OutboxOperation::Create, &payload)
    ///     .await?;
    /// ```
    pub async fn queue(
        &self,
        category: OutboxCategory,
        entity_id: &str,
        operation: OutboxOperation,
        payload: &str,
    ) -> DbResult<SyncOutboxEntry> {
        let entry = SyncOutboxEntry {
            id: Uuid::new_v4().to_string(),
            category,
            entity_id: entity_id.to_string(),
            operation,
            payload: payload.to_string(),
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            attempted_at: None,
            synced_at: None,
        };

        debug!(
            category = %category,
            entity_id = %entity_id,
            operation = operation.as_str(),
            "Queuing for sync"
        );

        sqlx::query(
            r#"
            INSERT INTO sync_outbox (
                id, category, entity_id, operation, payload,
                attempts, last_error, created_at, attempted_at, synced_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&entry.id)
        .bind(entry.category)
        .bind(&entry.entity_id)
        .bind(entry.operation)
        .bind(&entry.payload)
        .bind(entry.attempts)
        .bind(&entry.last_error)
        .bind(entry.created_at)
        .bind(entry.attempted_at)
        .bind(entry.synced_at)
        .execute(&self.pool)
        .await?;

        Ok(entry)
    }

    /// Returns up to `limit` unsynced entries, oldest first, skipping entries
    /// that already failed `max_attempts` times.
    pub async fn get_pending(&self, limit: u32, max_attempts: i64) -> DbResult<Vec<SyncOutboxEntry>> {
        let entries = sqlx::query_as::<_, SyncOutboxEntry>(
            r#"
            SELECT
                id, category, entity_id, operation, payload,
                attempts, last_error, created_at, attempted_at, synced_at
            FROM sync_outbox
            WHERE synced_at IS NULL AND attempts < ?1
            ORDER BY created_at ASC, rowid ASC
            LIMIT ?2
            "#,
        )
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Fetches one entry by id.
    pub async fn get(&self, id: &str) -> DbResult<SyncOutboxEntry> {
        sqlx::query_as::<_, SyncOutboxEntry>(
            r#"
            SELECT
                id, category, entity_id, operation, payload,
                attempts, last_error, created_at, attempted_at, synced_at
            FROM sync_outbox
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::not_found("Outbox entry", id))
    }

    /// Marks a batch of entries as acknowledged, in one transaction.
    ///
    /// Returns the number of rows that changed. Ids that are unknown or
    /// already synced are ignored.
    pub async fn mark_synced(&self, ids: &[String]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        let mut updated = 0;
        for id in ids {
            let result = sqlx::query(
                r#"
                UPDATE sync_outbox SET
                    synced_at = ?2,
                    attempted_at = ?2
                WHERE id = ?1 AND synced_at IS NULL
                "#,
            )
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            updated += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        debug!(requested = ids.len(), updated, "Marked outbox entries synced");
        Ok(updated)
    }

    /// Records a failed push attempt.
    pub async fn mark_failed(&self, id: &str, error: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE sync_outbox SET
                attempts = attempts + 1,
                last_error = ?2,
                attempted_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Counts unsynced entries per category.
    ///
    /// Entries past their retry budget are still counted: they have not
    /// reached the backend.
    pub async fn pending_counts(&self) -> DbResult<PendingCounts> {
        let rows: Vec<(OutboxCategory, i64)> = sqlx::query_as(
            r#"
            SELECT category, COUNT(*)
            FROM sync_outbox
            WHERE synced_at IS NULL
            GROUP BY category
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = PendingCounts::default();
        for (category, count) in rows {
            counts.add(category, count);
        }
        Ok(counts)
    }

    /// Deletes entries synced before `cutoff`. Returns the number deleted.
    pub async fn cleanup_synced(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM sync_outbox
            WHERE synced_at IS NOT NULL AND synced_at < ?1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    async fn repo() -> OutboxRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().outbox()
    }

    #[tokio::test]
    async fn test_queue_and_get_pending_oldest_first() {
        let repo = repo().await;

        let first = repo
            .queue(OutboxCategory::Orders, "ord-1", OutboxOperation::Create, "{}")
            .await
            .unwrap();
        let second = repo
            .queue(OutboxCategory::Sales, "sale-1", OutboxOperation::Create, "{}")
            .await
            .unwrap();

        let pending = repo.get_pending(10, 10).await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec![first.id.as_str(), second.id.as_str()]);
        assert_eq!(pending[0].category, OutboxCategory::Orders);
        assert_eq!(pending[0].operation, OutboxOperation::Create);
    }

    #[tokio::test]
    async fn test_pending_counts_per_category() {
        let repo = repo().await;

        for i in 0..3 {
            repo.queue(OutboxCategory::Orders, &format!("ord-{i}"), OutboxOperation::Update, "{}")
                .await
                .unwrap();
        }
        repo.queue(OutboxCategory::Invoices, "inv-1", OutboxOperation::Create, "{}")
            .await
            .unwrap();

        let counts = repo.pending_counts().await.unwrap();
        assert_eq!(counts.orders, 3);
        assert_eq!(counts.sales, 0);
        assert_eq!(counts.invoices, 1);
    }

    #[tokio::test]
    async fn test_mark_synced_removes_from_pending() {
        let repo = repo().await;
        let entry = repo
            .queue(OutboxCategory::Orders, "ord-1", OutboxOperation::Create, "{}")
            .await
            .unwrap();

        let updated = repo
            .mark_synced(&[entry.id.clone(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(updated, 1);

        assert!(repo.get_pending(10, 10).await.unwrap().is_empty());
        assert_eq!(repo.pending_counts().await.unwrap().total(), 0);
        assert!(repo.get(&entry.id).await.unwrap().synced_at.is_some());

        // acking twice changes nothing
        assert_eq!(repo.mark_synced(&[entry.id]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_failed_and_retry_budget() {
        let repo = repo().await;
        let entry = repo
            .queue(OutboxCategory::Orders, "ord-1", OutboxOperation::Create, "{}")
            .await
            .unwrap();

        repo.mark_failed(&entry.id, "503").await.unwrap();
        repo.mark_failed(&entry.id, "503 again").await.unwrap();

        let stored = repo.get(&entry.id).await.unwrap();
        assert_eq!(stored.attempts, 2);
        assert_eq!(stored.last_error.as_deref(), Some("503 again"));

        assert_eq!(repo.get_pending(10, 3).await.unwrap().len(), 1);
        assert!(repo.get_pending(10, 2).await.unwrap().is_empty());
        // still counted as pending
        assert_eq!(repo.pending_counts().await.unwrap().orders, 1);
    }

    #[tokio::test]
    async fn test_cleanup_synced() {
        let repo = repo().await;
        let synced = repo
            .queue(OutboxCategory::Orders, "ord-1", OutboxOperation::Create, "{}")
            .await
            .unwrap();
        repo.queue(OutboxCategory::Orders, "ord-2", OutboxOperation::Create, "{}")
            .await
            .unwrap();
        repo.mark_synced(&[synced.id.clone()]).await.unwrap();

        let deleted = repo
            .cleanup_synced(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(matches!(
            repo.get(&synced.id).await,
            Err(DbError::NotFound { .. })
        ));
        assert_eq!(repo.get_pending(10, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_pending_respects_limit() {
        let repo = repo().await;
        for i in 0..5 {
            repo.queue(OutboxCategory::Sales, &format!("sale-{i}"), OutboxOperation::Create, "{}")
                .await
                .unwrap();
        }

        assert_eq!(repo.get_pending(2, 10).await.unwrap().len(), 2);
    }
}
