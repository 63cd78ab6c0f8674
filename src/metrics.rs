//! Prometheus metrics for queue processing.
//!
//! - **Counters**: purge calls by outcome, purged items by type
//! - **Histograms**: items per drained batch

#[cfg(feature = "metrics")]
use prometheus::{CounterVec, Histogram, HistogramOpts, Opts, Registry};

#[cfg(feature = "metrics")]
use crate::domain::item::PurgeItem;
#[cfg(feature = "metrics")]
use anyhow::Result;

/// Metrics for the queue processor.
#[cfg(feature = "metrics")]
#[derive(Clone)]
pub struct PurgeMetrics {
    registry: Registry,
    purge_calls_total: CounterVec,
    items_purged_total: CounterVec,
    batch_size: Histogram,
}

#[cfg(feature = "metrics")]
impl PurgeMetrics {
    /// Create the metrics and register them with `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if metrics fail to register (e.g., duplicate registration).
    pub fn new(registry: Registry) -> Result<Self> {
        let purge_calls_total = CounterVec::new(
            Opts::new(
                "edge_purge_calls_total",
                "Queue drain attempts by outcome",
            ),
            &["outcome"],
        )
        .map_err(|e| metrics_error("purge_calls_total", e))?;

        let items_purged_total = CounterVec::new(
            Opts::new(
                "edge_purge_items_purged_total",
                "Queued items confirmed purged, by type",
            ),
            &["type"],
        )
        .map_err(|e| metrics_error("items_purged_total", e))?;

        let batch_size = Histogram::with_opts(
            HistogramOpts::new(
                "edge_purge_batch_size",
                "Number of items selected per queue drain",
            )
            .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 90.0, 120.0]),
        )
        .map_err(|e| metrics_error("batch_size", e))?;

        registry
            .register(Box::new(purge_calls_total.clone()))
            .map_err(|e| metrics_error("purge_calls_total", e))?;
        registry
            .register(Box::new(items_purged_total.clone()))
            .map_err(|e| metrics_error("items_purged_total", e))?;
        registry
            .register(Box::new(batch_size.clone()))
            .map_err(|e| metrics_error("batch_size", e))?;

        Ok(Self {
            registry,
            purge_calls_total,
            items_purged_total,
            batch_size,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a drain attempt; `outcome` is `"success"` or an error code.
    pub fn record_attempt(&self, outcome: &str, selected: usize) {
        self.purge_calls_total.with_label_values(&[outcome]).inc();
        self.batch_size.observe(selected as f64);
    }

    pub fn record_purged(&self, items: &[PurgeItem]) {
        for item in items {
            self.items_purged_total
                .with_label_values(&[item.kind.as_str()])
                .inc();
        }
    }
}

#[cfg(feature = "metrics")]
fn metrics_error(name: &str, e: prometheus::Error) -> anyhow::Error {
    anyhow::anyhow!("Failed to set up metric {}: {}", name, e)
}
