//! Queued CDN cache purging.
//!
//! Purge requests (file URLs, hosts, path prefixes, cache tags) are validated, buffered
//! per unit of work, persisted to a queue, and periodically drained to the provider's
//! purge API in batches of at most 30 entries per type. When the queue cannot be
//! written the buffered items are purged immediately instead.
//!
//! Queue storage is pluggable behind [`QueueStore`], with a PostgreSQL implementation
//! and an in-memory one for tests.

pub mod accumulator;
pub mod client;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod error;
pub mod hooks;
pub mod http;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod validation;

// Re-export commonly used types
pub use accumulator::{FlushOutcome, PurgeAccumulator};
pub use client::{CloudflareClient, Credentials};
pub use config::PurgeConfig;
pub use daemon::{ProcessorConfig, PurgeQueueService};
pub use domain::*;
pub use error::{PurgeError, Result};
pub use hooks::PurgeHooks;
pub use http::{HttpClient, HttpResponse, MockHttpClient, ReqwestHttpClient};
pub use logging::{LogLevel, LogSink, Logger, RecordingSink, TracingSink};
pub use manager::{InMemoryQueueStore, InsertReport, QueueStore};
#[cfg(feature = "postgres")]
pub use manager::postgres::{DbPools, PoolProvider, PostgresQueueStore, migrator};
#[cfg(feature = "metrics")]
pub use metrics::PurgeMetrics;
pub use validation::{ValidationError, ValidationErrorKind};
