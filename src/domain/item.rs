//! Purge items: the single typed invalidation requests that flow through the queue.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Maximum number of entries the provider accepts per type in one purge call.
pub const MAX_ITEMS_PER_TYPE: usize = 30;

/// Maximum stored length of an item's content (width of the `content` column).
pub const MAX_CONTENT_LENGTH: usize = 2048;

/// The kind of cached content a purge item targets.
///
/// The declaration order is the fixed order in which queued groups are drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurgeType {
    File,
    Host,
    Prefix,
    Tag,
}

impl PurgeType {
    /// All types in drain order.
    pub const ALL: [PurgeType; 4] = [
        PurgeType::File,
        PurgeType::Host,
        PurgeType::Prefix,
        PurgeType::Tag,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PurgeType::File => "file",
            PurgeType::Host => "host",
            PurgeType::Prefix => "prefix",
            PurgeType::Tag => "tag",
        }
    }
}

impl fmt::Display for PurgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PurgeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(PurgeType::File),
            "host" => Ok(PurgeType::Host),
            "prefix" => Ok(PurgeType::Prefix),
            "tag" => Ok(PurgeType::Tag),
            _ => Err(format!("Invalid purge type: {}", s)),
        }
    }
}

/// Identifier assigned by the queue store on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurgeItemId(pub i64);

impl fmt::Display for PurgeItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for PurgeItemId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A purge request that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeInput {
    #[serde(rename = "type")]
    pub kind: PurgeType,
    pub content: String,
}

impl PurgeInput {
    pub fn new(kind: PurgeType, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }

    pub fn file(url: impl Into<String>) -> Self {
        Self::new(PurgeType::File, url)
    }

    pub fn host(host: impl Into<String>) -> Self {
        Self::new(PurgeType::Host, host)
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::new(PurgeType::Prefix, prefix)
    }

    pub fn tag(tag: impl Into<String>) -> Self {
        Self::new(PurgeType::Tag, tag)
    }
}

/// A purge request as received from the host, before its type is known to be valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPurgeInput {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub content: String,
}

impl RawPurgeInput {
    pub fn new(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            content: content.into(),
        }
    }
}

/// A purge request persisted in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeItem {
    pub id: PurgeItemId,
    #[serde(rename = "type")]
    pub kind: PurgeType,
    pub content: String,
}

impl PurgeItem {
    /// The item without its storage identity.
    pub fn input(&self) -> PurgeInput {
        PurgeInput {
            kind: self.kind,
            content: self.content.clone(),
        }
    }
}

/// Anything that can be grouped into a purge batch.
pub trait Purgeable {
    fn kind(&self) -> PurgeType;
    fn content(&self) -> &str;
}

impl Purgeable for PurgeInput {
    fn kind(&self) -> PurgeType {
        self.kind
    }

    fn content(&self) -> &str {
        &self.content
    }
}

impl Purgeable for PurgeItem {
    fn kind(&self) -> PurgeType {
        self.kind
    }

    fn content(&self) -> &str {
        &self.content
    }
}
