//! Per-unit-of-work purge buffer.
//!
//! A [`PurgeAccumulator`] collects validated purge items while a unit of work runs and
//! hands them off exactly once when it ends: to the queue when possible, directly to
//! the provider otherwise.

use std::mem;
use std::sync::Arc;

use serde_json::json;
use tokio_util::task::TaskTracker;

use crate::client::CloudflareClient;
use crate::domain::batch::PurgeBatch;
use crate::domain::item::{PurgeInput, PurgeType};
use crate::domain::response::ApiResponse;
use crate::http::HttpClient;
use crate::logging::{Logger, error_context};
use crate::manager::{InsertReport, QueueStore};
use crate::validation::{self, ValidationError};

/// What a flush did with the buffered items.
#[derive(Debug, Clone)]
pub enum FlushOutcome {
    /// Nothing was buffered
    Empty,
    /// Items were written to the queue
    Queued(InsertReport),
    /// Queueing failed; the fallback purge succeeded for every batch
    Purged(Vec<ApiResponse>),
    /// Queueing failed and at least one fallback purge batch failed
    Failed(Vec<ApiResponse>),
}

impl FlushOutcome {
    /// Whether the items were queued or purged.
    pub fn is_handled(&self) -> bool {
        !matches!(self, FlushOutcome::Failed(_))
    }
}

/// Buffers purge items for one unit of work.
///
/// Each `add_*` validates its input first; invalid input is returned to the caller
/// and never buffered. Call [`flush`](Self::flush) when the unit of work ends. An
/// accumulator dropped with a non-empty buffer flushes in the background on the
/// current tokio runtime, as a task of its [`TaskTracker`]. Items whose background
/// flush never runs (the runtime shut down first) are logged at error.
pub struct PurgeAccumulator<S, H>
where
    S: QueueStore + 'static,
    H: HttpClient + 'static,
{
    store: Arc<S>,
    client: Arc<CloudflareClient<H>>,
    logger: Logger,
    tracker: TaskTracker,
    items: Vec<PurgeInput>,
}

impl<S, H> PurgeAccumulator<S, H>
where
    S: QueueStore + 'static,
    H: HttpClient + 'static,
{
    pub fn new(store: Arc<S>, client: Arc<CloudflareClient<H>>, logger: Logger) -> Self {
        Self {
            store,
            client,
            logger,
            tracker: TaskTracker::new(),
            items: Vec::new(),
        }
    }

    /// Track background flushes on `tracker`, so the host can wait for them at shutdown.
    pub fn with_tracker(mut self, tracker: TaskTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn add_file(&mut self, url: impl Into<String>) -> Result<(), ValidationError> {
        self.add_item(PurgeType::File, url)
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) -> Result<(), ValidationError> {
        self.add_item(PurgeType::Tag, tag)
    }

    pub fn add_host(&mut self, host: impl Into<String>) -> Result<(), ValidationError> {
        self.add_item(PurgeType::Host, host)
    }

    pub fn add_prefix(&mut self, prefix: impl Into<String>) -> Result<(), ValidationError> {
        self.add_item(PurgeType::Prefix, prefix)
    }

    pub fn add_item(
        &mut self,
        kind: PurgeType,
        content: impl Into<String>,
    ) -> Result<(), ValidationError> {
        let content = content.into();
        validation::validate(kind, &content)?;
        self.items.push(PurgeInput::new(kind, content));
        Ok(())
    }

    /// Add an item whose type name has not been checked yet.
    pub fn add_raw(&mut self, kind: &str, content: impl Into<String>) -> Result<(), ValidationError> {
        let content = content.into();
        let kind = validation::validate_raw(kind, &content)?;
        self.items.push(PurgeInput::new(kind, content));
        Ok(())
    }

    pub fn items(&self) -> &[PurgeInput] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Hand the buffered items off and clear the buffer.
    ///
    /// Items go to the queue. If nothing could be queued they are purged immediately
    /// instead. The buffer is empty afterwards whatever the outcome, so a second call
    /// is a no-op.
    pub async fn flush(&mut self) -> FlushOutcome {
        let items = mem::take(&mut self.items);
        flush_items(
            self.store.as_ref(),
            self.client.as_ref(),
            &self.logger,
            items,
        )
        .await
    }
}

impl<S, H> Drop for PurgeAccumulator<S, H>
where
    S: QueueStore + 'static,
    H: HttpClient + 'static,
{
    fn drop(&mut self) {
        if self.items.is_empty() {
            return;
        }

        let items = mem::take(&mut self.items);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = self.store.clone();
                let client = self.client.clone();
                let mut pending = PendingFlush {
                    items,
                    logger: self.logger.clone(),
                    done: false,
                };
                self.tracker.spawn_on(
                    async move {
                        flush_items(
                            store.as_ref(),
                            client.as_ref(),
                            &pending.logger,
                            pending.items.clone(),
                        )
                        .await;
                        pending.done = true;
                    },
                    &handle,
                );
            }
            Err(_) => {
                self.logger.error(
                    "Dropped unflushed purge items outside a runtime",
                    json!({ "items": items }),
                );
            }
        }
    }
}

/// Items owned by a background flush task.
///
/// If the task is dropped before finishing (its runtime shut down), the items are
/// logged instead of vanishing.
struct PendingFlush {
    items: Vec<PurgeInput>,
    logger: Logger,
    done: bool,
}

impl Drop for PendingFlush {
    fn drop(&mut self) {
        if !self.done && !self.items.is_empty() {
            self.logger.error(
                "Purge items dropped before their flush completed",
                json!({ "items": self.items }),
            );
        }
    }
}

#[tracing::instrument(skip_all, fields(count = items.len()))]
async fn flush_items<S, H>(
    store: &S,
    client: &CloudflareClient<H>,
    logger: &Logger,
    items: Vec<PurgeInput>,
) -> FlushOutcome
where
    S: QueueStore,
    H: HttpClient,
{
    if items.is_empty() {
        return FlushOutcome::Empty;
    }

    match store.insert_many(items.clone()).await {
        Ok(report) => {
            if report.inserted > 0 {
                logger.info(
                    "Queued items for purge",
                    json!({ "count": report.inserted }),
                );
            }
            if !report.rejected.is_empty() {
                logger.error(
                    "Items rejected by purge queue",
                    json!({ "errors": report.rejected }),
                );
            }
            FlushOutcome::Queued(report)
        }
        Err(e) => {
            logger.error(
                "Failed to queue items for purge",
                json!({ "error": error_context(&e), "items": items }),
            );
            purge_now(client, logger, &items).await
        }
    }
}

async fn purge_now<H: HttpClient>(
    client: &CloudflareClient<H>,
    logger: &Logger,
    items: &[PurgeInput],
) -> FlushOutcome {
    let mut responses = Vec::new();
    for batch in PurgeBatch::chunked(items) {
        responses.push(client.purge(&batch).await);
    }

    if responses.iter().all(ApiResponse::is_success) {
        logger.info(
            "Successfully purged cache",
            json!({ "responses": responses }),
        );
        FlushOutcome::Purged(responses)
    } else {
        logger.error(
            "Failed to purge cache",
            json!({ "items": items, "responses": responses }),
        );
        FlushOutcome::Failed(responses)
    }
}
