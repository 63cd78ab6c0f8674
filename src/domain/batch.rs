//! Purge batches: items grouped by type into the provider's request body.

use serde::{Deserialize, Serialize};

use super::item::{MAX_ITEMS_PER_TYPE, PurgeType, Purgeable};

/// Body of a single purge call.
///
/// Each list is omitted from the serialized body when empty. Built fresh for every
/// outgoing request and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeBatch {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prefixes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl PurgeBatch {
    /// Group items by type, preserving their relative order within each type.
    ///
    /// No per-type limit is applied; callers draining the queue already select at most
    /// [`MAX_ITEMS_PER_TYPE`] per type. Use [`PurgeBatch::chunked`] for unbounded input.
    pub fn from_items<'a, I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = &'a T>,
        T: Purgeable + 'a,
    {
        let mut batch = Self::default();
        for item in items {
            batch.push(item.kind(), item.content().to_string());
        }
        batch
    }

    /// Group items into as many batches as needed to keep every type within the
    /// provider's per-call limit.
    pub fn chunked<'a, I, T>(items: I) -> Vec<Self>
    where
        I: IntoIterator<Item = &'a T>,
        T: Purgeable + 'a,
    {
        let mut batches: Vec<Self> = Vec::new();
        for item in items {
            let kind = item.kind();
            let slot = batches
                .iter()
                .position(|batch| batch.bucket(kind).len() < MAX_ITEMS_PER_TYPE);
            let index = match slot {
                Some(index) => index,
                None => {
                    batches.push(Self::default());
                    batches.len() - 1
                }
            };
            batches[index].push(kind, item.content().to_string());
        }
        batches
    }

    pub fn push(&mut self, kind: PurgeType, content: String) {
        self.bucket_mut(kind).push(content);
    }

    /// Entries of the given type.
    pub fn bucket(&self, kind: PurgeType) -> &[String] {
        match kind {
            PurgeType::File => &self.files,
            PurgeType::Host => &self.hosts,
            PurgeType::Prefix => &self.prefixes,
            PurgeType::Tag => &self.tags,
        }
    }

    fn bucket_mut(&mut self, kind: PurgeType) -> &mut Vec<String> {
        match kind {
            PurgeType::File => &mut self.files,
            PurgeType::Host => &mut self.hosts,
            PurgeType::Prefix => &mut self.prefixes,
            PurgeType::Tag => &mut self.tags,
        }
    }

    /// Total number of entries across all types.
    pub fn len(&self) -> usize {
        PurgeType::ALL.iter().map(|kind| self.bucket(*kind).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Group items by type into one batch.
pub fn make_purge_request<T: Purgeable>(items: &[T]) -> PurgeBatch {
    PurgeBatch::from_items(items)
}
