//! Host-supplied configuration.
//!
//! Loaded once at startup from an optional file and `CF_ENT_CACHE_*` environment
//! variables, then treated as immutable.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::client::{Credentials, DEFAULT_API_BASE, DEFAULT_TIMEOUT_MS};
use crate::error::Result;
use crate::logging::{LogLevel, Logger};

/// Prefix of environment variables read by [`PurgeConfig::load`].
pub const ENV_PREFIX: &str = "CF_ENT_CACHE";

/// Configuration for the purge pipeline.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PurgeConfig {
    /// Zone whose cache is purged
    pub zone_id: String,

    /// Account email sent in `X-Auth-Email`
    pub email: String,

    /// API key sent in `X-Auth-Key`
    #[serde(skip_serializing)]
    pub api_key: String,

    /// Minimum severity forwarded to the log sink
    pub log_level: LogLevel,

    /// Base URL of the provider API
    pub api_base: String,

    /// Timeout for each purge call in milliseconds
    pub timeout_ms: u64,

    /// How often the queue processor drains the queue
    pub process_interval_ms: u64,

    /// Upper bound on how long the processor honours a `Retry-After` hint
    pub max_retry_after_secs: u64,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            zone_id: String::new(),
            email: String::new(),
            api_key: String::new(),
            log_level: LogLevel::default(),
            api_base: DEFAULT_API_BASE.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            process_interval_ms: 60_000,
            max_retry_after_secs: 3_600,
        }
    }
}

impl PurgeConfig {
    /// Load configuration from an optional file, overridden by environment variables
    /// (e.g. `CF_ENT_CACHE_ZONE_ID`, `CF_ENT_CACHE_LOG_LEVEL`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.zone_id, &self.email, &self.api_key)
    }

    /// Logger at the configured threshold, writing to `tracing`.
    pub fn logger(&self) -> Logger {
        Logger::tracing(self.log_level)
    }
}

impl fmt::Debug for PurgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PurgeConfig")
            .field("zone_id", &self.zone_id)
            .field("email", &self.email)
            .field("api_key", &"<redacted>")
            .field("log_level", &self.log_level)
            .field("api_base", &self.api_base)
            .field("timeout_ms", &self.timeout_ms)
            .field("process_interval_ms", &self.process_interval_ms)
            .field("max_retry_after_secs", &self.max_retry_after_secs)
            .finish()
    }
}
