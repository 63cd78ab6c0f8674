//! PostgreSQL implementation of QueueStore.
//!
//! Items live in a single `purge_queue` table (`id BIGSERIAL`, `type TEXT`,
//! `content VARCHAR(2048)`, indexed by `type`), created by the embedded migration.

use anyhow::anyhow;
use async_trait::async_trait;

use super::QueueStore;
use crate::domain::item::{MAX_ITEMS_PER_TYPE, PurgeInput, PurgeItem, PurgeItemId, PurgeType};
use crate::error::{PurgeError, Result};

pub mod pool_provider;

pub use pool_provider::{DbPools, PoolProvider};

/// Get the queue table migrator.
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// PostgreSQL-backed purge queue.
///
/// # Example
/// ```ignore
/// let pool = PgPool::connect("postgresql://localhost/purge").await?;
/// let store = PostgresQueueStore::new(pool);
/// store.create_table().await?;
/// store.insert_many(items).await?;
/// ```
pub struct PostgresQueueStore<P: PoolProvider = sqlx::PgPool> {
    pools: P,
}

impl<P: PoolProvider> PostgresQueueStore<P> {
    pub fn new(pools: P) -> Self {
        Self { pools }
    }

    pub fn pools(&self) -> &P {
        &self.pools
    }
}

fn persistence(operation: &'static str) -> impl FnOnce(sqlx::Error) -> PurgeError {
    move |e| PurgeError::persistence(operation, e)
}

#[derive(sqlx::FromRow)]
struct QueueRow {
    id: i64,
    #[sqlx(rename = "type")]
    kind: String,
    content: String,
}

impl TryFrom<QueueRow> for PurgeItem {
    type Error = PurgeError;

    fn try_from(row: QueueRow) -> Result<Self> {
        let kind: PurgeType = row.kind.parse().map_err(|e: String| {
            PurgeError::persistence("decode", anyhow!("row {}: {}", row.id, e))
        })?;
        Ok(PurgeItem {
            id: PurgeItemId(row.id),
            kind,
            content: row.content,
        })
    }
}

fn into_items(rows: Vec<QueueRow>) -> Result<Vec<PurgeItem>> {
    rows.into_iter().map(PurgeItem::try_from).collect()
}

#[async_trait]
impl<P: PoolProvider> QueueStore for PostgresQueueStore<P> {
    #[tracing::instrument(skip(self, items), fields(count = items.len()))]
    async fn insert_rows(&self, items: Vec<PurgeInput>) -> Result<u64> {
        if items.is_empty() {
            return Ok(0);
        }

        let (kinds, contents): (Vec<String>, Vec<String>) = items
            .into_iter()
            .map(|item| (item.kind.as_str().to_string(), item.content))
            .unzip();

        let result = sqlx::query(
            r#"
            INSERT INTO purge_queue (type, content)
            SELECT * FROM UNNEST($1::text[], $2::text[])
            "#,
        )
        .bind(&kinds)
        .bind(&contents)
        .execute(self.pools.write())
        .await
        .map_err(persistence("insert"))?;

        tracing::debug!(inserted = result.rows_affected(), "Queued purge items");
        Ok(result.rows_affected())
    }

    async fn select_queue(&self) -> Result<Vec<PurgeItem>> {
        // Each type is capped independently; groups come out in drain order.
        let rows = sqlx::query_as::<_, QueueRow>(
            r#"
            SELECT id, type, content
            FROM (
                SELECT
                    id,
                    type,
                    content,
                    ROW_NUMBER() OVER (PARTITION BY type ORDER BY id) AS type_rn
                FROM purge_queue
            ) ranked
            WHERE type_rn <= $1
            ORDER BY
                CASE type
                    WHEN 'file' THEN 1
                    WHEN 'host' THEN 2
                    WHEN 'prefix' THEN 3
                    ELSE 4
                END,
                id
            "#,
        )
        .bind(MAX_ITEMS_PER_TYPE as i64)
        .fetch_all(self.pools.write())
        .await
        .map_err(persistence("select"))?;

        into_items(rows)
    }

    #[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
    async fn delete_many(&self, ids: &[PurgeItemId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        let result = sqlx::query("DELETE FROM purge_queue WHERE id = ANY($1)")
            .bind(&ids)
            .execute(self.pools.write())
            .await
            .map_err(persistence("delete"))?;

        Ok(result.rows_affected())
    }

    async fn all(&self) -> Result<Vec<PurgeItem>> {
        let rows = sqlx::query_as::<_, QueueRow>(
            "SELECT id, type, content FROM purge_queue ORDER BY id",
        )
        .fetch_all(self.pools.read())
        .await
        .map_err(persistence("scan"))?;

        into_items(rows)
    }

    async fn create_table(&self) -> Result<()> {
        migrator()
            .run(self.pools.write())
            .await
            .map_err(|e| PurgeError::persistence("migrate", e))?;
        Ok(())
    }

    async fn reset_table(&self) -> Result<()> {
        sqlx::query("TRUNCATE TABLE purge_queue")
            .execute(self.pools.write())
            .await
            .map_err(persistence("truncate"))?;
        Ok(())
    }
}
