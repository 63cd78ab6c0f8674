//! Client for the provider's zone purge endpoint.

use std::fmt;
use std::sync::Arc;

use crate::config::PurgeConfig;
use crate::domain::batch::PurgeBatch;
use crate::domain::response::ApiResponse;
use crate::error::{PurgeError, Result};
use crate::http::{HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient};

/// Default base URL of the provider API.
pub const DEFAULT_API_BASE: &str = "https://api.cloudflare.com/client/v4/";

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Account credentials and zone for purge calls.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub zone_id: String,
    pub email: String,
    pub api_key: String,
}

impl Credentials {
    pub fn new(
        zone_id: impl Into<String>,
        email: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            zone_id: zone_id.into(),
            email: email.into(),
            api_key: api_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("zone_id", &self.zone_id)
            .field("email", &self.email)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Purge client owning its credentials and HTTP transport.
///
/// Constructed once at startup and shared by reference (or `Arc`) with every caller.
///
/// # Example
/// ```ignore
/// let client = CloudflareClient::new(Credentials::new(zone, email, key));
/// let response = client.purge(&make_purge_request(&items)).await;
/// if !response.is_success() { /* ... */ }
/// ```
pub struct CloudflareClient<H: HttpClient> {
    http_client: Arc<H>,
    credentials: Credentials,
    api_base: String,
    timeout_ms: u64,
}

impl CloudflareClient<ReqwestHttpClient> {
    /// Client using reqwest and the public API endpoint.
    pub fn new(credentials: Credentials) -> Self {
        Self::with_client(credentials, Arc::new(ReqwestHttpClient::new()))
    }

    /// Client built from host configuration.
    pub fn from_config(config: &PurgeConfig) -> Self {
        Self::new(config.credentials())
            .with_api_base(config.api_base.clone())
            .with_timeout_ms(config.timeout_ms)
    }
}

impl<H: HttpClient> CloudflareClient<H> {
    /// Client using a custom HTTP transport.
    pub fn with_client(credentials: Credentials, http_client: Arc<H>) -> Self {
        Self {
            http_client,
            credentials,
            api_base: DEFAULT_API_BASE.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn http_client(&self) -> &Arc<H> {
        &self.http_client
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Full URL of the zone's purge endpoint.
    pub fn purge_url(&self) -> String {
        format!(
            "{}/zones/{}/purge_cache",
            self.api_base.trim_end_matches('/'),
            self.credentials.zone_id
        )
    }

    /// Purge a batch, folding every failure into a failure envelope.
    ///
    /// Failures are annotated with a message identifying the stage that failed
    /// (`json_encode_error`, `request_error`, `retry` after a rate limit, the HTTP
    /// status, or `json_decode_error`).
    pub async fn purge(&self, batch: &PurgeBatch) -> ApiResponse {
        match self.send(batch).await {
            Ok(response) => response,
            Err(e) => ApiResponse::from_error(&e),
        }
    }

    /// Purge a batch, returning the provider's envelope or a typed error.
    ///
    /// An envelope is returned whenever one could be decoded, even for a non-2xx
    /// status; its `success` flag is authoritative. A body that does not decode is
    /// reported as [`PurgeError::HttpStatus`] for non-2xx responses and
    /// [`PurgeError::Decode`] otherwise.
    ///
    /// # Errors
    /// - [`PurgeError::Encode`] if the batch cannot be serialized
    /// - [`PurgeError::Transport`] if no response was received
    /// - [`PurgeError::RateLimited`] on HTTP 429, with the `Retry-After` seconds
    #[tracing::instrument(skip(self, batch), fields(zone_id = %self.credentials.zone_id, items = batch.len()))]
    pub async fn send(&self, batch: &PurgeBatch) -> Result<ApiResponse> {
        let body = serde_json::to_string(batch).map_err(PurgeError::Encode)?;

        let request = HttpRequest::post(self.purge_url(), body)
            .with_header("X-Auth-Email", self.credentials.email.as_str())
            .with_header("X-Auth-Key", self.credentials.api_key.as_str())
            .with_header("Content-Type", "application/json");

        let response = self.http_client.execute(&request, self.timeout_ms).await?;
        classify(response)
    }
}

fn classify(response: HttpResponse) -> Result<ApiResponse> {
    if response.status == 429 {
        let retry_after = parse_retry_after(response.header("retry-after"));
        tracing::warn!(retry_after, "Purge rate limited");
        return Err(PurgeError::RateLimited { retry_after });
    }

    match serde_json::from_str::<ApiResponse>(&response.body) {
        Ok(envelope) => {
            tracing::debug!(
                status = response.status,
                success = envelope.is_success(),
                "Purge response received"
            );
            Ok(envelope)
        }
        Err(_) if !response.is_success() => {
            tracing::warn!(status = response.status, "Purge failed with undecodable body");
            Err(PurgeError::HttpStatus {
                status: response.status,
                body: response.body,
            })
        }
        Err(source) => Err(PurgeError::Decode {
            status: response.status,
            source,
        }),
    }
}

/// Seconds from a `Retry-After` header; absent or non-numeric values read as 0.
fn parse_retry_after(value: Option<&str>) -> u64 {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0)
}
