//! Input validation for purge requests.
//!
//! Every item is checked here before it may enter the queue or an outgoing batch. The
//! checks are pure and deterministic; a rejected item produces a [`ValidationError`]
//! naming the rule that failed.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::domain::item::{MAX_CONTENT_LENGTH, PurgeInput, PurgeType, RawPurgeInput};

/// Maximum number of `/` separators allowed in a prefix path.
pub const MAX_PREFIX_SEGMENTS: usize = 30;

const MAX_HOSTNAME_LENGTH: usize = 253;
const MAX_LABEL_LENGTH: usize = 63;

/// Hostnames must end in a top-level domain of 2 to 13 lowercase letters.
static TLD_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.[a-z]{2,13}$").expect("TLD pattern is valid"));

/// Which rule rejected an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    InvalidType,
    InvalidFile,
    InvalidHost,
    InvalidPrefix,
    InvalidTag,
}

impl ValidationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationErrorKind::InvalidType => "invalid_type",
            ValidationErrorKind::InvalidFile => "invalid_file",
            ValidationErrorKind::InvalidHost => "invalid_host",
            ValidationErrorKind::InvalidPrefix => "invalid_prefix",
            ValidationErrorKind::InvalidTag => "invalid_tag",
        }
    }

    fn for_type(kind: PurgeType) -> Self {
        match kind {
            PurgeType::File => ValidationErrorKind::InvalidFile,
            PurgeType::Host => ValidationErrorKind::InvalidHost,
            PurgeType::Prefix => ValidationErrorKind::InvalidPrefix,
            PurgeType::Tag => ValidationErrorKind::InvalidTag,
        }
    }
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected purge input.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{kind}: {reason} ({content:?})")]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub content: String,
    pub reason: String,
}

impl ValidationError {
    fn new(kind: ValidationErrorKind, content: &str, reason: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.to_string(),
            reason: reason.into(),
        }
    }
}

/// Check that `content` is acceptable for a purge of type `kind`.
pub fn validate(kind: PurgeType, content: &str) -> Result<(), ValidationError> {
    if content.chars().count() > MAX_CONTENT_LENGTH {
        return Err(ValidationError::new(
            ValidationErrorKind::for_type(kind),
            content,
            format!("Content exceeds {} characters", MAX_CONTENT_LENGTH),
        ));
    }

    match kind {
        PurgeType::File => validate_file(content),
        PurgeType::Host => check_hostname(content)
            .map_err(|reason| ValidationError::new(ValidationErrorKind::InvalidHost, content, reason)),
        PurgeType::Prefix => validate_prefix(content),
        PurgeType::Tag if content.is_empty() => Err(ValidationError::new(
            ValidationErrorKind::InvalidTag,
            content,
            "Invalid tag",
        )),
        PurgeType::Tag => Ok(()),
    }
}

/// Validate an input whose type arrives as a string.
pub fn validate_raw(kind: &str, content: &str) -> Result<PurgeType, ValidationError> {
    let kind: PurgeType = kind.parse().map_err(|_| {
        ValidationError::new(
            ValidationErrorKind::InvalidType,
            content,
            format!("Invalid type {:?}", kind),
        )
    })?;
    validate(kind, content)?;
    Ok(kind)
}

/// Partition inputs into those that pass and the errors for those that don't.
///
/// Both outputs keep the relative order of the input.
pub fn validate_many(items: Vec<PurgeInput>) -> (Vec<PurgeInput>, Vec<ValidationError>) {
    let mut valid = Vec::with_capacity(items.len());
    let mut errors = Vec::new();

    for item in items {
        match validate(item.kind, &item.content) {
            Ok(()) => valid.push(item),
            Err(e) => errors.push(e),
        }
    }

    (valid, errors)
}

/// [`validate_many`] for inputs with untyped `type` fields.
pub fn validate_many_raw(items: Vec<RawPurgeInput>) -> (Vec<PurgeInput>, Vec<ValidationError>) {
    let mut valid = Vec::with_capacity(items.len());
    let mut errors = Vec::new();

    for item in items {
        match validate_raw(&item.kind, &item.content) {
            Ok(kind) => valid.push(PurgeInput::new(kind, item.content)),
            Err(e) => errors.push(e),
        }
    }

    (valid, errors)
}

fn validate_file(content: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::new(ValidationErrorKind::InvalidFile, content, reason);

    let url = Url::parse(content).map_err(|_| invalid("Invalid URL"))?;
    let host = url.host_str().ok_or_else(|| invalid("Invalid URL"))?;
    check_hostname(host).map_err(invalid)
}

fn validate_prefix(content: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::new(ValidationErrorKind::InvalidPrefix, content, reason);

    if content.contains("://") {
        return Err(invalid("Invalid prefix, must not include URI schemes"));
    }

    // A scheme is required to recover host and path from the prefix.
    let url = Url::parse(&format!("https://{}", content))
        .map_err(|_| invalid("Invalid prefix, unable to parse"))?;

    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("Invalid prefix, must not include query or fragment"));
    }

    if url.path().matches('/').count() > MAX_PREFIX_SEGMENTS {
        return Err(invalid("Invalid prefix, path contains too many segments"));
    }

    // The recovered host may be a bare path segment such as `images`, so no TLD is required.
    match url.host_str() {
        Some(host) if is_hostname_syntax(host) => Ok(()),
        _ => Err(invalid("Invalid prefix, invalid hostname")),
    }
}

/// RFC 1123 hostname syntax plus a lowercase alphabetic TLD.
fn check_hostname(host: &str) -> Result<(), &'static str> {
    if is_hostname_syntax(host) && TLD_SUFFIX.is_match(host) {
        Ok(())
    } else {
        Err("Invalid hostname")
    }
}

/// RFC 1123 label and length rules only.
fn is_hostname_syntax(host: &str) -> bool {
    if host.is_empty() || host.len() > MAX_HOSTNAME_LENGTH {
        return false;
    }

    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LENGTH
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}
