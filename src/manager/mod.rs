//! Queue storage for purge items.
//!
//! This module defines the `QueueStore` trait: a single append/scan/delete table of
//! purge requests. Implementations provide the raw operations; validation on write and
//! the id-based delete helpers are provided on top of them.

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::item::{PurgeInput, PurgeItem, PurgeItemId};
use crate::error::{PurgeError, Result};
use crate::validation::{self, ValidationError};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryQueueStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresQueueStore;

/// Outcome of a successful [`QueueStore::insert_many`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InsertReport {
    /// Rows written
    pub inserted: u64,
    /// Inputs rejected by validation, in input order
    pub rejected: Vec<ValidationError>,
}

/// Storage trait for the purge queue.
///
/// Deletion is always by exact id: a processor removes only the rows its own
/// selection returned, never rows matching a predicate, so items inserted after the
/// selection survive.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Write already-validated items; returns the number of rows written.
    async fn insert_rows(&self, items: Vec<PurgeInput>) -> Result<u64>;

    /// Up to 30 items of each type, grouped file, host, prefix, tag and in insertion
    /// order within each group.
    async fn select_queue(&self) -> Result<Vec<PurgeItem>>;

    /// Delete exactly the given ids; returns the number of rows deleted.
    async fn delete_many(&self, ids: &[PurgeItemId]) -> Result<u64>;

    /// Every queued item, unfiltered. For maintenance only.
    async fn all(&self) -> Result<Vec<PurgeItem>>;

    /// Create the queue table if it does not exist.
    async fn create_table(&self) -> Result<()>;

    /// Remove every queued item.
    async fn reset_table(&self) -> Result<()>;

    /// Validate and write items.
    ///
    /// Only items that pass validation are written. Rejected items are reported in
    /// the returned [`InsertReport`].
    ///
    /// # Errors
    /// [`PurgeError::NothingQueued`] with every rejection when no item is valid; no
    /// write is attempted in that case. A failed write returns the store's error and
    /// logs the rejections alongside it.
    #[tracing::instrument(skip(self, items), fields(count = items.len()))]
    async fn insert_many(&self, items: Vec<PurgeInput>) -> Result<InsertReport> {
        let (valid, rejected) = validation::validate_many(items);

        if !rejected.is_empty() {
            tracing::warn!(rejected = rejected.len(), "Rejected invalid purge items");
        }

        if valid.is_empty() {
            return Err(PurgeError::NothingQueued { rejected });
        }

        match self.insert_rows(valid).await {
            Ok(inserted) => Ok(InsertReport { inserted, rejected }),
            Err(e) => {
                if !rejected.is_empty() {
                    tracing::error!(
                        error = %e,
                        rejected = ?rejected,
                        "Purge queue write failed after rejecting invalid items"
                    );
                }
                Err(e)
            }
        }
    }

    /// Validate and write a single item.
    async fn insert(&self, item: PurgeInput) -> Result<()> {
        validation::validate(item.kind, &item.content)?;
        self.insert_rows(vec![item]).await?;
        Ok(())
    }

    /// Delete one item by id; returns whether a row was removed.
    async fn delete(&self, id: PurgeItemId) -> Result<bool> {
        Ok(self.delete_many(&[id]).await? > 0)
    }

    /// Delete exactly the rows `items` were read from.
    async fn delete_many_items(&self, items: &[PurgeItem]) -> Result<u64> {
        let ids: Vec<PurgeItemId> = items.iter().map(|item| item.id).collect();
        self.delete_many(&ids).await
    }

    /// Delete persisted rows that no longer pass validation, returning them.
    #[tracing::instrument(skip(self))]
    async fn purge_invalid(&self) -> Result<Vec<PurgeItem>> {
        let invalid: Vec<PurgeItem> = self
            .all()
            .await?
            .into_iter()
            .filter(|item| validation::validate(item.kind, &item.content).is_err())
            .collect();

        if !invalid.is_empty() {
            self.delete_many_items(&invalid).await?;
            tracing::info!(count = invalid.len(), "Removed invalid rows from purge queue");
        }

        Ok(invalid)
    }
}
