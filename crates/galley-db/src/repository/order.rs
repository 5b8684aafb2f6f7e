//! # Order Cache Repository
//!
//! Last known revision of every order a client has seen. The kitchen board
//! reconciles each incoming revision against this, and a restarted client
//! rebuilds its board from [`OrderCacheRepository::list_active`].

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use galley_core::{Order, OrderStatus};

/// Repository for cached order revisions.
#[derive(Debug, Clone)]
pub struct OrderCacheRepository {
    pool: SqlitePool,
}

impl OrderCacheRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OrderCacheRepository { pool }
    }

    /// Stores `order`, replacing any previous revision with the same id.
    pub async fn upsert(&self, order: &Order) -> DbResult<()> {
        upsert_row(&self.pool, order).await
    }

    /// Makes `orders` the full set of active cached orders.
    ///
    /// Active rows missing from `orders` are dropped. Delivered and cancelled
    /// rows are left alone.
    pub async fn replace_active(&self, orders: &[Order]) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let dropped = sqlx::query("DELETE FROM order_cache WHERE status NOT IN (?1, ?2)")
            .bind(OrderStatus::Delivered)
            .bind(OrderStatus::Cancelled)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        for order in orders {
            upsert_row(&mut *tx, order).await?;
        }

        tx.commit().await?;
        debug!(active = orders.len(), dropped, "Replaced active orders");
        Ok(())
    }

    /// Returns the cached revision, if any.
    pub async fn get(&self, id: &str) -> DbResult<Option<Order>> {
        let payload: Option<String> =
            sqlx::query_scalar("SELECT payload FROM order_cache WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        payload
            .map(|json| serde_json::from_str::<Order>(&json).map_err(DbError::from))
            .transpose()
    }

    /// Returns orders that still belong on a kitchen display, oldest first.
    pub async fn list_active(&self) -> DbResult<Vec<Order>> {
        let payloads: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT payload FROM order_cache
            WHERE status NOT IN (?1, ?2)
            ORDER BY created_at ASC
            "#,
        )
        .bind(OrderStatus::Delivered)
        .bind(OrderStatus::Cancelled)
        .fetch_all(&self.pool)
        .await?;

        payloads
            .iter()
            .map(|json| serde_json::from_str::<Order>(json).map_err(DbError::from))
            .collect()
    }

    /// Drops the cached revision. Returns true if a row was removed.
    pub async fn remove(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM order_cache WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

async fn upsert_row<'e, E>(executor: E, order: &Order) -> DbResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let payload = serde_json::to_string(order)?;

    sqlx::query(
        r#"
        INSERT INTO order_cache (
            id, order_number, status, payload, created_at, updated_at, cached_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(id) DO UPDATE SET
            order_number = excluded.order_number,
            status = excluded.status,
            payload = excluded.payload,
            updated_at = excluded.updated_at,
            cached_at = excluded.cached_at
        "#,
    )
    .bind(&order.id)
    .bind(&order.order_number)
    .bind(order.status)
    .bind(payload)
    .bind(order.created_at)
    .bind(order.updated_at)
    .bind(Utc::now())
    .execute(executor)
    .await?;

    debug!(order_id = %order.id, status = %order.status, "Cached order revision");
    Ok(())
}
