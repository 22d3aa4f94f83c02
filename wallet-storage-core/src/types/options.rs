//! Search options and backend metadata

use serde::{Deserialize, Serialize};

/// Options controlling what a search produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchOptions {
    /// Stream matching records (disable to only count)
    pub retrieve_records: bool,
    /// Compute the number of matching records up front
    pub retrieve_total_count: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            retrieve_records: true,
            retrieve_total_count: false,
        }
    }
}

impl SearchOptions {
    #[must_use]
    pub fn with_total_count(mut self) -> Self {
        self.retrieve_total_count = true;
        self
    }

    /// Count-only search.
    #[must_use]
    pub fn count_only() -> Self {
        Self {
            retrieve_records: false,
            retrieve_total_count: true,
        }
    }
}

/// Description of one recognised configuration or credential field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendField {
    /// Machine-readable field key
    pub key: String,
    /// Whether the backend refuses to start without it
    pub required: bool,
    /// Secret fields are never echoed back or logged
    pub secret: bool,
    /// Help text
    pub description: String,
}

impl BackendField {
    #[must_use]
    pub fn new(key: &str, required: bool, description: &str) -> Self {
        Self {
            key: key.to_string(),
            required,
            secret: false,
            description: description.to_string(),
        }
    }

    #[must_use]
    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }
}

/// Backend metadata (type level), obtainable before any wallet is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendMetadata {
    /// Name the backend registers under
    pub storage_type: String,
    /// Short description
    pub description: String,
    /// Closed set of `storage_config` fields
    pub config_fields: Vec<BackendField>,
    /// Closed set of `storage_credentials` fields
    pub credential_fields: Vec<BackendField>,
}
