//! Queue processor: drains the purge queue through the provider API.
//!
//! [`PurgeQueueService::process_queue`] performs one drain: select, purge, delete the
//! exact rows selected. [`PurgeQueueService::run`] calls it on a fixed interval until
//! shut down, stretching the wait after a rate limit.
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::client::CloudflareClient;
use crate::config::PurgeConfig;
use crate::domain::batch::make_purge_request;
use crate::domain::item::PurgeItem;
use crate::error::{PurgeError, Result};
use crate::http::HttpClient;
use crate::logging::Logger;
use crate::manager::QueueStore;

#[cfg(feature = "metrics")]
use crate::metrics::PurgeMetrics;

/// Configuration for the queue processor loop.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProcessorConfig {
    /// How long to sleep between drains
    pub interval_ms: u64,

    /// Upper bound on how long a `Retry-After` hint may delay the next drain
    pub max_retry_after_secs: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            max_retry_after_secs: 3_600,
        }
    }
}

impl From<&PurgeConfig> for ProcessorConfig {
    fn from(config: &PurgeConfig) -> Self {
        Self {
            interval_ms: config.process_interval_ms,
            max_retry_after_secs: config.max_retry_after_secs,
        }
    }
}

impl ProcessorConfig {
    /// Delay before the drain following one that ended with `outcome`.
    pub fn next_delay<T>(&self, outcome: &Result<T>) -> Duration {
        let interval = Duration::from_millis(self.interval_ms);
        match outcome {
            Err(e) => match e.retry_after() {
                Some(secs) => {
                    let hinted = Duration::from_secs(secs.min(self.max_retry_after_secs));
                    interval.max(hinted)
                }
                None => interval,
            },
            Ok(_) => interval,
        }
    }
}

/// Drains the purge queue.
///
/// Overlapping drains may select the same rows and purge them twice; that is
/// harmless since purges are idempotent. Each drain deletes only the ids its own
/// selection returned, so rows inserted while a purge call is in flight survive.
pub struct PurgeQueueService<S, H>
where
    S: QueueStore,
    H: HttpClient,
{
    store: Arc<S>,
    client: Arc<CloudflareClient<H>>,
    logger: Logger,
    config: ProcessorConfig,
    #[cfg(feature = "metrics")]
    metrics: Option<PurgeMetrics>,
}

impl<S, H> PurgeQueueService<S, H>
where
    S: QueueStore + 'static,
    H: HttpClient + 'static,
{
    pub fn new(store: Arc<S>, client: Arc<CloudflareClient<H>>, logger: Logger) -> Self {
        Self {
            store,
            client,
            logger,
            config: ProcessorConfig::default(),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    pub fn with_config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: PurgeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Drain one batch from the queue.
    ///
    /// Returns the purged items, or an empty list (without calling the provider) when
    /// the queue is empty. Never sleeps or retries: a rate limit is returned as
    /// [`PurgeError::RateLimited`] for the caller to schedule around.
    ///
    /// # Errors
    /// - Any [`CloudflareClient::send`] error, with the selected rows left queued
    /// - [`PurgeError::Provider`] when the envelope reports failure, rows left queued
    /// - [`PurgeError::StaleQueue`] when the purge succeeded but the rows could not be
    ///   deleted; the delete is not retried
    #[tracing::instrument(skip(self))]
    pub async fn process_queue(&self) -> Result<Vec<PurgeItem>> {
        let items = match self.store.select_queue().await {
            Ok(items) => items,
            Err(e) => {
                self.logger.log_error("Failed to read purge queue", &e);
                return Err(e);
            }
        };

        if items.is_empty() {
            self.logger.debug("No items in purge queue", json!({}));
            return Ok(items);
        }

        let outcome = self.purge_and_delete(items).await;
        self.record(&outcome);
        outcome
    }

    async fn purge_and_delete(&self, items: Vec<PurgeItem>) -> Result<Vec<PurgeItem>> {
        let response = match self.client.send(&make_purge_request(&items)).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                let error = PurgeError::Provider { response };
                self.logger.log_error("Failed to purge cache", &error);
                return Err(error);
            }
            Err(error) => {
                self.logger.log_error("Failed to purge cache", &error);
                return Err(error);
            }
        };

        if let Err(source) = self.store.delete_many_items(&items).await {
            let error = PurgeError::StaleQueue {
                items,
                source: Box::new(source),
            };
            self.logger
                .log_error("Failed to delete items from purge queue", &error);
            return Err(error);
        }

        self.logger.debug(
            "Successfully purged cache",
            json!({ "items": items, "result": response.result() }),
        );
        Ok(items)
    }

    #[cfg(feature = "metrics")]
    fn record(&self, outcome: &Result<Vec<PurgeItem>>) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        match outcome {
            Ok(items) => {
                metrics.record_attempt("success", items.len());
                metrics.record_purged(items);
            }
            Err(PurgeError::StaleQueue { items, .. }) => {
                metrics.record_attempt("purge_queue_error", items.len());
                metrics.record_purged(items);
            }
            Err(e) => metrics.record_attempt(e.code(), 0),
        }
    }

    #[cfg(not(feature = "metrics"))]
    fn record(&self, _outcome: &Result<Vec<PurgeItem>>) {}

    /// Drain the queue periodically until `shutdown` is cancelled.
    ///
    /// Failures are logged by [`Self::process_queue`] and never end the loop. After a
    /// rate limit the next drain waits for the `Retry-After` hint, capped at
    /// `max_retry_after_secs`, if that is longer than the interval.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        tracing::info!(
            interval_ms = self.config.interval_ms,
            "Purge queue processor starting"
        );

        loop {
            let outcome = self.process_queue().await;
            let delay = self.config.next_delay(&outcome);

            if let Err(PurgeError::RateLimited { retry_after }) = &outcome {
                tracing::warn!(
                    retry_after,
                    delay_ms = delay.as_millis() as u64,
                    "Purge rate limited, delaying next drain"
                );
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => {
                    tracing::info!("Purge queue processor shutting down");
                    break;
                }
            }
        }
    }
}
