//! Entry points the host application wires to its scheduler and lifecycle events.

use std::sync::Arc;

use tokio_util::task::TaskTracker;

use crate::accumulator::PurgeAccumulator;
use crate::client::CloudflareClient;
use crate::config::PurgeConfig;
use crate::daemon::{ProcessorConfig, PurgeQueueService};
use crate::domain::batch::PurgeBatch;
use crate::domain::item::{PurgeItem, RawPurgeInput};
use crate::domain::response::ApiResponse;
use crate::error::{PurgeError, Result};
use crate::http::{HttpClient, ReqwestHttpClient};
use crate::logging::{Logger, error_context};
use crate::manager::{InsertReport, QueueStore};
use crate::validation;

/// The pipeline's four host-facing operations, plus per-unit-of-work accumulators.
///
/// Owns the single store handle, client and logger constructed at startup; everything
/// it hands out shares them.
pub struct PurgeHooks<S, H>
where
    S: QueueStore + 'static,
    H: HttpClient + 'static,
{
    store: Arc<S>,
    client: Arc<CloudflareClient<H>>,
    logger: Logger,
    processor: Arc<PurgeQueueService<S, H>>,
    tracker: TaskTracker,
}

impl<S: QueueStore + 'static> PurgeHooks<S, ReqwestHttpClient> {
    /// Hooks using the store given and a client built from `config`.
    pub fn from_config(config: &PurgeConfig, store: Arc<S>) -> Self {
        Self::new(
            store,
            Arc::new(CloudflareClient::from_config(config)),
            config.logger(),
        )
        .with_processor_config(ProcessorConfig::from(config))
    }
}

impl<S, H> PurgeHooks<S, H>
where
    S: QueueStore + 'static,
    H: HttpClient + 'static,
{
    pub fn new(store: Arc<S>, client: Arc<CloudflareClient<H>>, logger: Logger) -> Self {
        let processor = Arc::new(PurgeQueueService::new(
            store.clone(),
            client.clone(),
            logger.clone(),
        ));
        Self {
            store,
            client,
            logger,
            processor,
            tracker: TaskTracker::new(),
        }
    }

    /// Replace the processor with one using `config`.
    pub fn with_processor_config(mut self, config: ProcessorConfig) -> Self {
        self.processor = Arc::new(
            PurgeQueueService::new(self.store.clone(), self.client.clone(), self.logger.clone())
                .with_config(config),
        );
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn client(&self) -> &Arc<CloudflareClient<H>> {
        &self.client
    }

    /// The shared queue processor, for [`PurgeQueueService::run`].
    pub fn processor(&self) -> Arc<PurgeQueueService<S, H>> {
        self.processor.clone()
    }

    /// Create the queue table.
    pub async fn create_table(&self) -> Result<()> {
        self.store.create_table().await.inspect_err(|e| {
            self.logger.log_error("Failed to create purge queue table", e);
        })
    }

    /// Validate and queue untyped `{type, content}` inputs.
    ///
    /// Inputs with an unknown type are rejected alongside those failing their type's
    /// rule; the report lists every rejection in input order.
    ///
    /// # Errors
    /// - [`PurgeError::NothingQueued`] when no input is valid
    /// - the store's error when the write fails; the rejections are logged with it
    pub async fn queue_many(&self, items: Vec<RawPurgeInput>) -> Result<InsertReport> {
        let (valid, rejected) = validation::validate_many_raw(items);

        if valid.is_empty() {
            let error = PurgeError::NothingQueued { rejected };
            self.logger
                .log_error("Failed to insert items into purge queue", &error);
            return Err(error);
        }

        match self.store.insert_many(valid).await {
            Ok(mut report) => {
                let mut all = rejected;
                all.append(&mut report.rejected);
                report.rejected = all;
                Ok(report)
            }
            Err(e) => {
                let mut context = error_context(&e);
                context["rejected"] = serde_json::json!(rejected);
                self.logger
                    .error("Failed to insert items into purge queue", context);
                Err(e)
            }
        }
    }

    /// Drain one batch from the queue. See [`PurgeQueueService::process_queue`].
    pub async fn process_queue(&self) -> Result<Vec<PurgeItem>> {
        self.processor.process_queue().await
    }

    /// Purge a batch immediately, bypassing the queue.
    pub async fn purge_cache(&self, batch: &PurgeBatch) -> ApiResponse {
        let response = self.client.purge(batch).await;
        if !response.is_success() {
            self.logger.error(
                "Failed to purge cache",
                serde_json::json!({ "batch": batch, "response": response }),
            );
        }
        response
    }

    /// A fresh buffer for one unit of work.
    ///
    /// Background flushes of dropped accumulators are tracked; see [`Self::shutdown`].
    pub fn accumulator(&self) -> PurgeAccumulator<S, H> {
        PurgeAccumulator::new(self.store.clone(), self.client.clone(), self.logger.clone())
            .with_tracker(self.tracker.clone())
    }

    /// Wait for every background flush started by a dropped accumulator.
    ///
    /// Call before the runtime shuts down. Accumulators dropped afterwards are still
    /// flushed, but are no longer waited for.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Credentials;
    use crate::domain::item::PurgeInput;
    use crate::http::{HttpResponse, MockHttpClient};
    use crate::logging::{LogLevel, RecordingSink};
    use crate::manager::InMemoryQueueStore;
    use crate::validation::ValidationErrorKind;

    const PURGE_KEY: &str = "POST /client/v4/zones/zone-1/purge_cache";

    fn hooks() -> (
        PurgeHooks<InMemoryQueueStore, MockHttpClient>,
        Arc<MockHttpClient>,
        RecordingSink,
    ) {
        let http = Arc::new(MockHttpClient::new());
        let client = Arc::new(CloudflareClient::with_client(
            Credentials::new("zone-1", "ops@example.com", "key"),
            http.clone(),
        ));
        let sink = RecordingSink::new();
        let logger = Logger::new(LogLevel::Debug, Arc::new(sink.clone()));
        (
            PurgeHooks::new(Arc::new(InMemoryQueueStore::new()), client, logger),
            http,
            sink,
        )
    }

    #[tokio::test]
    async fn test_queue_many_merges_type_and_content_rejections() {
        let (hooks, _, _) = hooks();
        hooks.create_table().await.unwrap();

        let report = hooks
            .queue_many(vec![
                RawPurgeInput::new("tag", "news"),
                RawPurgeInput::new("zone", "everything"),
                RawPurgeInput::new("host", "host1.example.com"),
                RawPurgeInput::new("file", "not-a-url"),
            ])
            .await
            .unwrap();

        assert_eq!(report.inserted, 2);
        let kinds: Vec<ValidationErrorKind> = report.rejected.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![ValidationErrorKind::InvalidType, ValidationErrorKind::InvalidFile]
        );
        assert_eq!(hooks.store().len(), 2);
    }

    #[tokio::test]
    async fn test_queue_many_all_invalid_is_error() {
        let (hooks, _, sink) = hooks();

        let err = hooks
            .queue_many(vec![RawPurgeInput::new("", "x")])
            .await
            .unwrap_err();

        assert!(matches!(err, PurgeError::NothingQueued { ref rejected } if rejected.len() == 1));
        assert_eq!(sink.at(LogLevel::Error)[0].context["code"], "insert_error");
    }

    #[tokio::test]
    async fn test_purge_cache_logs_failures() {
        let (hooks, http, sink) = hooks();
        http.add_response(PURGE_KEY, Ok(HttpResponse::new(500, "oops")));

        let batch = PurgeBatch::from_items(&[PurgeInput::tag("news")]);
        let response = hooks.purge_cache(&batch).await;

        assert!(!response.is_success());
        assert_eq!(sink.at(LogLevel::Error)[0].message, "Failed to purge cache");
    }

    #[tokio::test]
    async fn test_queue_many_write_failure_logs_rejections() {
        let (hooks, _, sink) = hooks();
        hooks.store().fail_inserts(true);

        let err = hooks
            .queue_many(vec![
                RawPurgeInput::new("tag", "news"),
                RawPurgeInput::new("zone", "everything"),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, PurgeError::Persistence { .. }));
        let errors = sink.at(LogLevel::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].context["code"], "persistence_error");
        assert_eq!(errors[0].context["rejected"][0]["kind"], "invalid_type");
        assert_eq!(errors[0].context["rejected"][0]["content"], "everything");
    }

    #[test]
    fn test_shutdown_waits_for_dropped_accumulators() {
        let (hooks, _, sink) = hooks();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            {
                let mut acc = hooks.accumulator();
                acc.add_tag("news").unwrap();
                acc.add_host("host1.example.com").unwrap();
            }
            hooks.shutdown().await;
        });
        drop(runtime);

        assert_eq!(hooks.store().len(), 2);
        assert!(sink.at(LogLevel::Error).is_empty());
    }

    #[tokio::test]
    async fn test_accumulator_shares_store() {
        let (hooks, _, _) = hooks();
        let mut acc = hooks.accumulator();
        acc.add_tag("news").unwrap();
        acc.flush().await;

        let purged_candidates = hooks.store().select_queue().await.unwrap();
        assert_eq!(purged_candidates.len(), 1);
    }
}
