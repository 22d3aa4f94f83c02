//! Common query language
//!
//! A backend-independent predicate tree over record tags. The raw form is a
//! WQL-style JSON object:
//!
//! ```json
//! {"$or": [{"~alias": {"$like": "st%"}}, {"seed": "00000000000000000000000000000My5"}]}
//! ```
//!
//! Every backend consumes the parsed [`Query`] through its own
//! [`QueryTranslator`]; a translator must cover every variant, emulating
//! what the native engine cannot express.

mod parse;

use std::fmt;
use std::str::FromStr;

use serde_json::{json, Map, Value};

use crate::error::{StorageError, StorageResult};
use crate::types::TagName;

pub use parse::parse;

/// Parsed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// All children hold; an empty list matches everything
    And(Vec<Query>),
    /// At least one child holds
    Or(Vec<Query>),
    /// The child does not hold
    Not(Box<Query>),
    /// Tag present with exactly this value
    Eq(TagName, String),
    /// Tag present with a different value
    Neq(TagName, String),
    /// Tag present and byte-wise greater (plaintext tags only)
    Gt(TagName, String),
    /// Tag present and byte-wise greater or equal (plaintext tags only)
    Gte(TagName, String),
    /// Tag present and byte-wise lower (plaintext tags only)
    Lt(TagName, String),
    /// Tag present and byte-wise lower or equal (plaintext tags only)
    Lte(TagName, String),
    /// Tag present and matching an SQL LIKE pattern (plaintext tags only)
    Like(TagName, String),
    /// Tag present with one of the values
    In(TagName, Vec<String>),
}

/// Translation of a [`Query`] into a backend's native representation.
///
/// Implementations must be total: every variant maps to something that
/// selects exactly the records the variant describes.
pub trait QueryTranslator {
    /// Native query form
    type Output;

    fn translate(&self, query: &Query) -> Self::Output;
}

impl Query {
    /// Query matching every record.
    #[must_use]
    pub fn all() -> Self {
        Self::And(Vec::new())
    }

    #[must_use]
    pub fn equals(tag: &str, value: &str) -> Self {
        Self::Eq(TagName::parse(tag), value.to_string())
    }

    #[must_use]
    pub fn not_equals(tag: &str, value: &str) -> Self {
        Self::Neq(TagName::parse(tag), value.to_string())
    }

    #[must_use]
    pub fn greater_than(tag: &str, value: &str) -> Self {
        Self::Gt(TagName::parse(tag), value.to_string())
    }

    #[must_use]
    pub fn less_than(tag: &str, value: &str) -> Self {
        Self::Lt(TagName::parse(tag), value.to_string())
    }

    #[must_use]
    pub fn like(tag: &str, pattern: &str) -> Self {
        Self::Like(TagName::parse(tag), pattern.to_string())
    }

    #[must_use]
    pub fn in_set(tag: &str, values: &[&str]) -> Self {
        Self::In(
            TagName::parse(tag),
            values.iter().map(ToString::to_string).collect(),
        )
    }

    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Check that the query has a WQL form `parse` accepts.
    pub fn validate(&self) -> StorageResult<()> {
        match self {
            Self::And(children) => children.iter().try_for_each(Self::validate),
            Self::Or(children) if children.is_empty() => Err(StorageError::MalformedQuery(
                "'$or' requires at least one subquery".to_string(),
            )),
            Self::Or(children) => children.iter().try_for_each(Self::validate),
            Self::Not(child) => child.validate(),
            Self::Eq(name, _)
            | Self::Neq(name, _)
            | Self::Gt(name, _)
            | Self::Gte(name, _)
            | Self::Lt(name, _)
            | Self::Lte(name, _)
            | Self::Like(name, _) => TagName::new(&name.storage_key()).map(drop),
            Self::In(name, values) if values.is_empty() => Err(StorageError::MalformedQuery(
                format!("'$in' on tag '{name}' requires at least one value"),
            )),
            Self::In(name, _) => TagName::new(&name.storage_key()).map(drop),
        }
    }

    /// Whether this query trivially matches every record.
    #[must_use]
    pub fn is_match_all(&self) -> bool {
        matches!(self, Self::And(children) if children.is_empty())
    }

    /// Canonical WQL JSON form.
    ///
    /// `parse(&q.to_json())` yields `q` back when every tag name is a valid
    /// WQL key ([`TagName::is_query_key`]) and no `$or` is empty; use
    /// [`Query::validate`] to check a programmatically built query.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::And(children) if children.is_empty() => Value::Object(Map::new()),
            Self::And(children) => json!({ "$and": children.iter().map(Self::to_json).collect::<Vec<_>>() }),
            Self::Or(children) => json!({ "$or": children.iter().map(Self::to_json).collect::<Vec<_>>() }),
            Self::Not(child) => json!({ "$not": child.to_json() }),
            Self::Eq(name, value) => tag_clause(name, Value::String(value.clone())),
            Self::Neq(name, value) => tag_clause(name, json!({ "$neq": value })),
            Self::Gt(name, value) => tag_clause(name, json!({ "$gt": value })),
            Self::Gte(name, value) => tag_clause(name, json!({ "$gte": value })),
            Self::Lt(name, value) => tag_clause(name, json!({ "$lt": value })),
            Self::Lte(name, value) => tag_clause(name, json!({ "$lte": value })),
            Self::Like(name, value) => tag_clause(name, json!({ "$like": value })),
            Self::In(name, values) => tag_clause(name, json!({ "$in": values })),
        }
    }
}

fn tag_clause(name: &TagName, predicate: Value) -> Value {
    let mut map = Map::new();
    map.insert(name.storage_key(), predicate);
    Value::Object(map)
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl FromStr for Query {
    type Err = StorageError;

    fn from_str(s: &str) -> StorageResult<Self> {
        let raw: Value = serde_json::from_str(s)
            .map_err(|e| StorageError::MalformedQuery(format!("invalid JSON: {e}")))?;
        parse(&raw)
    }
}

impl TryFrom<&Value> for Query {
    type Error = StorageError;

    fn try_from(raw: &Value) -> StorageResult<Self> {
        parse(raw)
    }
}
