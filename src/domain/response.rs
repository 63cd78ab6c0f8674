//! The provider's response envelope.

use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PurgeError;

/// A code or message in the envelope; the provider uses both numbers and strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InfoValue {
    Number(i64),
    Text(String),
}

impl fmt::Display for InfoValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfoValue::Number(n) => write!(f, "{}", n),
            InfoValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for InfoValue {
    fn from(n: i64) -> Self {
        InfoValue::Number(n)
    }
}

impl From<u64> for InfoValue {
    fn from(n: u64) -> Self {
        InfoValue::Number(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<u16> for InfoValue {
    fn from(n: u16) -> Self {
        InfoValue::Number(i64::from(n))
    }
}

impl From<&str> for InfoValue {
    fn from(s: &str) -> Self {
        InfoValue::Text(s.to_string())
    }
}

impl From<String> for InfoValue {
    fn from(s: String) -> Self {
        InfoValue::Text(s)
    }
}

/// One entry of the envelope's `errors` or `messages` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub code: InfoValue,
    pub message: InfoValue,
}

impl ResponseInfo {
    pub fn new(code: impl Into<InfoValue>, message: impl Into<InfoValue>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Result of a purge call: `{success, errors, messages, result}`.
///
/// Built from the provider's JSON verbatim, or synthesized locally for failures that
/// never produced an envelope. The `errors` and `messages` lists may be appended to as
/// the response passes up the call chain; `success` never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    success: bool,
    #[serde(default)]
    errors: Vec<ResponseInfo>,
    #[serde(default)]
    messages: Vec<ResponseInfo>,
    #[serde(default)]
    result: Option<serde_json::Value>,
}

impl ApiResponse {
    pub fn new(
        success: bool,
        errors: Vec<ResponseInfo>,
        messages: Vec<ResponseInfo>,
        result: Option<serde_json::Value>,
    ) -> Self {
        Self {
            success,
            errors,
            messages,
            result,
        }
    }

    /// An empty failure, to be annotated by the caller.
    pub fn failure() -> Self {
        Self::new(false, Vec::new(), Vec::new(), None)
    }

    /// A failure whose `errors` list is the error and its chain of sources.
    pub fn from_source(error: &(dyn StdError + 'static)) -> Self {
        let mut errors = Vec::new();
        let mut current = Some(error);
        while let Some(err) = current {
            errors.push(ResponseInfo::new(0i64, err.to_string()));
            current = err.source();
        }
        Self::new(false, errors, Vec::new(), None)
    }

    /// The failure envelope describing `error`, annotated with the message key that
    /// identifies where the pipeline failed.
    pub fn from_error(error: &PurgeError) -> Self {
        match error {
            PurgeError::Provider { response } => response.clone(),
            PurgeError::RateLimited { retry_after } => Self::failure()
                .add_error("cloudflare_rate_limit", "Cloudflare rate limit reached.")
                .add_message("retry", *retry_after),
            PurgeError::Encode(_) => {
                Self::from_source(error).add_message("json_encode_error", "Unable to encode request.")
            }
            PurgeError::Decode { .. } => Self::from_source(error)
                .add_message("json_decode_error", "Unable to decode response."),
            PurgeError::Transport(_) => {
                Self::from_source(error).add_message("request_error", "Request failed.")
            }
            PurgeError::HttpStatus { status, .. } => {
                Self::from_source(error).add_message(*status, "Unexpected response status.")
            }
            other => Self::from_source(other),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn errors(&self) -> &[ResponseInfo] {
        &self.errors
    }

    pub fn messages(&self) -> &[ResponseInfo] {
        &self.messages
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        self.result.as_ref()
    }

    pub fn add_error(mut self, code: impl Into<InfoValue>, message: impl Into<InfoValue>) -> Self {
        self.errors.push(ResponseInfo::new(code, message));
        self
    }

    pub fn add_message(
        mut self,
        code: impl Into<InfoValue>,
        message: impl Into<InfoValue>,
    ) -> Self {
        self.messages.push(ResponseInfo::new(code, message));
        self
    }

    /// Seconds the provider asked us to wait, when this is a rate-limit failure.
    pub fn retry_after(&self) -> Option<u64> {
        self.messages.iter().find_map(|info| match (&info.code, &info.message) {
            (InfoValue::Text(code), InfoValue::Number(secs)) if code == "retry" => {
                u64::try_from(*secs).ok()
            }
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_provider_envelope_verbatim() {
        let body = r#"{
            "success": false,
            "errors": [{"code": 1012, "message": "Request must contain one of \"purge_everything\", \"files\", \"tags\", \"hosts\" or \"prefixes\""}],
            "messages": [],
            "result": null
        }"#;

        let response: ApiResponse = serde_json::from_str(body).unwrap();

        assert!(!response.is_success());
        assert_eq!(response.errors().len(), 1);
        assert_eq!(response.errors()[0].code, InfoValue::Number(1012));
        assert!(response.messages().is_empty());
        assert!(response.result().is_none());
    }

    #[test]
    fn test_success_envelope_keeps_result() {
        let body = r#"{"success": true, "errors": [], "messages": [], "result": {"id": "abc"}}"#;
        let response: ApiResponse = serde_json::from_str(body).unwrap();
        assert!(response.is_success());
        assert_eq!(response.result(), Some(&serde_json::json!({"id": "abc"})));
    }

    #[test]
    fn test_envelope_without_success_is_rejected() {
        assert!(serde_json::from_str::<ApiResponse>(r#"{"errors": []}"#).is_err());
    }

    #[test]
    fn test_rate_limit_error_becomes_retry_message() {
        let response = ApiResponse::from_error(&PurgeError::RateLimited { retry_after: 120 });

        assert!(!response.is_success());
        assert_eq!(
            response.errors()[0],
            ResponseInfo::new("cloudflare_rate_limit", "Cloudflare rate limit reached.")
        );
        assert_eq!(response.messages(), &[ResponseInfo::new("retry", 120i64)]);
        assert_eq!(response.retry_after(), Some(120));
    }

    #[test]
    fn test_transport_error_is_annotated() {
        let error = PurgeError::Transport(anyhow::anyhow!("connection refused"));
        let response = ApiResponse::from_error(&error);

        assert!(!response.is_success());
        assert!(!response.errors().is_empty());
        assert_eq!(response.messages()[0].code, InfoValue::from("request_error"));
        assert_eq!(response.retry_after(), None);
    }

    #[test]
    fn test_status_error_uses_status_as_message_key() {
        let error = PurgeError::HttpStatus {
            status: 502,
            body: "<html>bad gateway</html>".to_string(),
        };
        let response = ApiResponse::from_error(&error);
        assert_eq!(response.messages()[0].code, InfoValue::Number(502));
    }
}
