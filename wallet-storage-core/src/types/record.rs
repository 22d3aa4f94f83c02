//! Record model shared by every backend

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Prefix that marks a tag as plaintext-searchable.
pub const PLAINTEXT_TAG_PREFIX: char = '~';

/// Tag map of a record.
///
/// Keys starting with `~` are plaintext tags, every other key is an
/// encrypted tag whose name and value were produced by the crypto layer.
pub type Tags = BTreeMap<String, String>;

/// A persisted wallet record.
///
/// `value` is opaque ciphertext; storage never looks inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageRecord {
    /// Record type namespace (e.g. `did`, `key`, `credential`)
    #[serde(rename = "type")]
    pub record_type: String,
    /// Identifier, unique within a wallet and type
    pub id: String,
    /// Encrypted value bytes
    pub value: Vec<u8>,
    /// Searchable tags
    #[serde(default)]
    pub tags: Tags,
}

impl StorageRecord {
    /// Create a record without tags.
    #[must_use]
    pub fn new(record_type: impl Into<String>, id: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            record_type: record_type.into(),
            id: id.into(),
            value,
            tags: Tags::new(),
        }
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    #[must_use]
    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    /// `(type, id)` identity of this record.
    #[must_use]
    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.record_type, &self.id)
    }
}

/// `(type, id)` pair identifying a record inside one wallet.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordKey {
    #[serde(rename = "type")]
    pub record_type: String,
    pub id: String,
}

impl RecordKey {
    #[must_use]
    pub fn new(record_type: &str, id: &str) -> Self {
        Self {
            record_type: record_type.to_string(),
            id: id.to_string(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.record_type, self.id)
    }
}

/// Tag name split by searchability kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagName {
    /// Name and value are ciphertext; only equality-style predicates apply
    Encrypted(String),
    /// Name stored with a `~` prefix, value kept in plaintext
    Plaintext(String),
}

impl TagName {
    /// Parse a stored tag key (`~name` for plaintext).
    #[must_use]
    pub fn parse(key: &str) -> Self {
        match key.strip_prefix(PLAINTEXT_TAG_PREFIX) {
            Some(name) => Self::Plaintext(name.to_string()),
            None => Self::Encrypted(key.to_string()),
        }
    }

    /// Tag name usable as a WQL key.
    ///
    /// Rejects empty names and encrypted names starting with `$`, which the
    /// query language reserves for operators.
    pub fn new(key: &str) -> StorageResult<Self> {
        let name = Self::parse(key);
        match &name {
            Self::Encrypted(n) | Self::Plaintext(n) if n.is_empty() => Err(
                StorageError::MalformedQuery("tag name must not be empty".to_string()),
            ),
            Self::Encrypted(n) if n.starts_with('$') => Err(StorageError::MalformedQuery(
                format!("tag name '{n}' collides with an operator"),
            )),
            _ => Ok(name),
        }
    }

    /// Whether the name can appear as a WQL key.
    #[must_use]
    pub fn is_query_key(&self) -> bool {
        Self::new(&self.storage_key()).is_ok()
    }

    /// Key under which the tag is stored in a record's tag map.
    #[must_use]
    pub fn storage_key(&self) -> String {
        match self {
            Self::Encrypted(name) => name.clone(),
            Self::Plaintext(name) => format!("{PLAINTEXT_TAG_PREFIX}{name}"),
        }
    }

    #[must_use]
    pub fn is_plaintext(&self) -> bool {
        matches!(self, Self::Plaintext(_))
    }
}

impl fmt::Display for TagName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}
