//! Error types for the purge pipeline.

use thiserror::Error;

use crate::domain::item::PurgeItem;
use crate::domain::response::ApiResponse;
use crate::validation::ValidationError;

/// Result type alias using the purge error type.
pub type Result<T> = std::result::Result<T, PurgeError>;

/// Main error type for the purge pipeline.
#[derive(Error, Debug)]
pub enum PurgeError {
    /// Input rejected before it could be queued or sent
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Request body could not be serialized
    #[error("Failed to encode purge request: {0}")]
    Encode(#[source] serde_json::Error),

    /// Response body was not a provider envelope
    #[error("Failed to decode purge response (HTTP {status}): {source}")]
    Decode {
        status: u16,
        #[source]
        source: serde_json::Error,
    },

    /// No response was received
    #[error("HTTP request failed: {0}")]
    Transport(#[source] anyhow::Error),

    /// Provider answered 429; retry no sooner than `retry_after` seconds
    #[error("Rate limited by provider, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    /// Non-success status with a body that is not an envelope
    #[error("Unexpected HTTP status {status}")]
    HttpStatus { status: u16, body: String },

    /// Provider envelope reported failure
    #[error("Provider reported purge failure: {}", describe_errors(.response))]
    Provider { response: ApiResponse },

    /// Queue store read or write failed
    #[error("Queue storage failed during {operation}: {source}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Every item offered to the queue was rejected, nothing was written
    #[error("No items were queued ({} rejected)", .rejected.len())]
    NothingQueued { rejected: Vec<ValidationError> },

    /// Items were purged remotely but could not be removed from the queue
    #[error("Purged {} items but failed to remove them from the queue: {source}", .items.len())]
    StaleQueue {
        items: Vec<PurgeItem>,
        #[source]
        source: Box<PurgeError>,
    },

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl PurgeError {
    pub(crate) fn persistence(
        operation: &'static str,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        PurgeError::Persistence {
            operation,
            source: source.into(),
        }
    }

    /// The `Retry-After` hint carried by a rate-limit failure.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            PurgeError::RateLimited { retry_after } => Some(*retry_after),
            PurgeError::Provider { response } => response.retry_after(),
            _ => None,
        }
    }

    /// Short machine-readable code for log context.
    pub fn code(&self) -> &'static str {
        match self {
            PurgeError::Validation(e) => e.kind.as_str(),
            PurgeError::Encode(_) => "json_encode_error",
            PurgeError::Decode { .. } => "json_decode_error",
            PurgeError::Transport(_) => "request_error",
            PurgeError::RateLimited { .. } => "cloudflare_rate_limit",
            PurgeError::HttpStatus { .. } => "http_status_error",
            PurgeError::Provider { .. } => "purge_error",
            PurgeError::Persistence { .. } => "persistence_error",
            PurgeError::NothingQueued { .. } => "insert_error",
            PurgeError::StaleQueue { .. } => "purge_queue_error",
            PurgeError::Config(_) => "config_error",
        }
    }
}

impl From<reqwest::Error> for PurgeError {
    fn from(e: reqwest::Error) -> Self {
        PurgeError::Transport(e.into())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for PurgeError {
    fn from(e: sqlx::Error) -> Self {
        PurgeError::persistence("query", e)
    }
}

fn describe_errors(response: &ApiResponse) -> String {
    if response.errors().is_empty() {
        return "no error details".to_string();
    }
    response
        .errors()
        .iter()
        .map(|info| format!("[{}] {}", info.code, info.message))
        .collect::<Vec<_>>()
        .join("; ")
}
