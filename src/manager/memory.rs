//! In-process queue store.
//!
//! Behaves like the database-backed store (auto-assigned ids, per-type bounded scan,
//! delete by id) without persistence across restarts. Failures can be injected to
//! exercise the pipeline's error paths.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::QueueStore;
use crate::domain::item::{MAX_ITEMS_PER_TYPE, PurgeInput, PurgeItem, PurgeItemId, PurgeType};
use crate::error::{PurgeError, Result};

#[derive(Default)]
pub struct InMemoryQueueStore {
    rows: Mutex<Vec<PurgeItem>>,
    next_id: AtomicI64,
    fail_inserts: AtomicBool,
    fail_deletes: AtomicBool,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following insert fail until reset.
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Make every following delete fail until reset.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    pub fn contains(&self, id: PurgeItemId) -> bool {
        self.rows.lock().iter().any(|row| row.id == id)
    }

    /// Insert without validation, as rows written by an older release would be.
    pub fn insert_unchecked(&self, item: PurgeInput) -> PurgeItemId {
        let id = PurgeItemId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.rows.lock().push(PurgeItem {
            id,
            kind: item.kind,
            content: item.content,
        });
        id
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn insert_rows(&self, items: Vec<PurgeInput>) -> Result<u64> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(PurgeError::persistence(
                "insert",
                anyhow::anyhow!("insert failure injected"),
            ));
        }

        let count = items.len() as u64;
        for item in items {
            self.insert_unchecked(item);
        }
        Ok(count)
    }

    async fn select_queue(&self) -> Result<Vec<PurgeItem>> {
        let rows = self.rows.lock();
        let selected = PurgeType::ALL
            .iter()
            .flat_map(|kind| {
                rows.iter()
                    .filter(move |row| row.kind == *kind)
                    .take(MAX_ITEMS_PER_TYPE)
                    .cloned()
            })
            .collect();
        Ok(selected)
    }

    async fn delete_many(&self, ids: &[PurgeItemId]) -> Result<u64> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(PurgeError::persistence(
                "delete",
                anyhow::anyhow!("delete failure injected"),
            ));
        }

        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|row| !ids.contains(&row.id));
        Ok((before - rows.len()) as u64)
    }

    async fn all(&self) -> Result<Vec<PurgeItem>> {
        Ok(self.rows.lock().clone())
    }

    async fn create_table(&self) -> Result<()> {
        Ok(())
    }

    async fn reset_table(&self) -> Result<()> {
        self.rows.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ValidationErrorKind;

    fn mixed_inputs() -> Vec<PurgeInput> {
        vec![
            PurgeInput::file("https://www.example.com/page"),
            PurgeInput::file("https://www.example.com/example"),
            PurgeInput::tag("site:1"),
            PurgeInput::host("host1.example.com"),
            PurgeInput::prefix("www.example.com/images/"),
            PurgeInput::tag("news"),
            PurgeInput::file("https://www.example.com/contact"),
            PurgeInput::tag("tag:sports"),
            PurgeInput::host("host2.example.com"),
            PurgeInput::prefix("www.example.com/css/"),
        ]
    }

    #[tokio::test]
    async fn test_create_and_delete() {
        let store = InMemoryQueueStore::new();
        let values = mixed_inputs();
        let count = values.len();

        let report = store.insert_many(values).await.unwrap();
        assert_eq!(report.inserted, count as u64);
        assert!(report.rejected.is_empty());

        let items = store.select_queue().await.unwrap();
        assert_eq!(items.len(), count);
        assert_eq!(items[0].kind, PurgeType::File);
        assert_eq!(items[0].content, "https://www.example.com/page");

        // Grouped in drain order
        let kinds: Vec<PurgeType> = items.iter().map(|i| i.kind).collect();
        let mut sorted = kinds.clone();
        sorted.sort();
        assert_eq!(kinds, sorted);

        let deleted = store.delete_many_items(&items).await.unwrap();
        assert_eq!(deleted, count as u64);
        assert!(store.select_queue().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_many_writes_only_valid_items() {
        let store = InMemoryQueueStore::new();
        let mut values: Vec<PurgeInput> = mixed_inputs().into_iter().take(8).collect();
        values.insert(3, PurgeInput::host("https://bad.example.com/path"));
        values.push(PurgeInput::tag(""));

        let report = store.insert_many(values).await.unwrap();

        assert_eq!(report.inserted, 8);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(report.rejected[0].kind, ValidationErrorKind::InvalidHost);
        assert_eq!(report.rejected[1].kind, ValidationErrorKind::InvalidTag);
        assert_eq!(store.len(), 8);
    }

    #[tokio::test]
    async fn test_insert_many_all_invalid_writes_nothing() {
        let store = InMemoryQueueStore::new();
        let values = vec![
            PurgeInput::tag(""),
            PurgeInput::host("not a host"),
            PurgeInput::prefix("https://example.com/x"),
        ];

        let err = store.insert_many(values).await.unwrap_err();

        match err {
            PurgeError::NothingQueued { rejected } => assert_eq!(rejected.len(), 3),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_select_queue_caps_each_type() {
        let store = InMemoryQueueStore::new();
        for i in 0..40 {
            store
                .insert(PurgeInput::file(format!("https://www.example.com/{i}")))
                .await
                .unwrap();
        }
        for i in 0..5 {
            store.insert(PurgeInput::tag(format!("tag-{i}"))).await.unwrap();
        }

        let items = store.select_queue().await.unwrap();

        assert_eq!(items.len(), 35);
        let files: Vec<&PurgeItem> = items.iter().filter(|i| i.kind == PurgeType::File).collect();
        assert_eq!(files.len(), 30);
        assert_eq!(files[0].content, "https://www.example.com/0");
        assert_eq!(files[29].content, "https://www.example.com/29");
        assert!(items[..30].iter().all(|i| i.kind == PurgeType::File));
        assert!(items[30..].iter().all(|i| i.kind == PurgeType::Tag));
        assert_eq!(items[30].content, "tag-0");
    }

    #[tokio::test]
    async fn test_delete_many_only_touches_given_ids() {
        let store = InMemoryQueueStore::new();
        store.insert(PurgeInput::tag("a")).await.unwrap();
        store.insert(PurgeInput::tag("b")).await.unwrap();
        let selected = store.select_queue().await.unwrap();

        store.insert(PurgeInput::tag("c")).await.unwrap();
        let deleted = store.delete_many_items(&selected).await.unwrap();

        assert_eq!(deleted, 2);
        let remaining = store.all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].content, "c");
    }

    #[tokio::test]
    async fn test_delete_single_and_reset() {
        let store = InMemoryQueueStore::new();
        store.insert(PurgeInput::tag("a")).await.unwrap();
        store.insert(PurgeInput::tag("b")).await.unwrap();
        let first = store.all().await.unwrap()[0].id;

        assert!(store.delete(first).await.unwrap());
        assert!(!store.delete(first).await.unwrap());
        assert_eq!(store.len(), 1);

        store.reset_table().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_insert_rejects_invalid_single_item() {
        let store = InMemoryQueueStore::new();
        let err = store.insert(PurgeInput::file("nope")).await.unwrap_err();
        assert!(matches!(err, PurgeError::Validation(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_purge_invalid_removes_only_bad_rows() {
        let store = InMemoryQueueStore::new();
        let good = store.insert_unchecked(PurgeInput::tag("news"));
        let bad = store.insert_unchecked(PurgeInput::host("https://bad.example.com/"));

        let removed = store.purge_invalid().await.unwrap();

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, bad);
        assert!(store.contains(good));
        assert!(!store.contains(bad));
    }

    #[tokio::test]
    async fn test_injected_insert_failure() {
        let store = InMemoryQueueStore::new();
        store.fail_inserts(true);
        let err = store.insert_many(vec![PurgeInput::tag("x")]).await.unwrap_err();
        assert!(matches!(err, PurgeError::Persistence { operation: "insert", .. }));
    }
}
