//! Wallet configuration and credential pass-through types

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Storage type used when a wallet config does not name one.
pub const DEFAULT_STORAGE_TYPE: &str = "default";

fn default_storage_type() -> String {
    DEFAULT_STORAGE_TYPE.to_string()
}

/// Wallet configuration supplied at create time and again at open time.
///
/// `storage_config` is forwarded untouched to the selected backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WalletConfig {
    /// Wallet identifier, unique per backend
    pub id: String,
    /// Name of the registered backend
    #[serde(default = "default_storage_type")]
    pub storage_type: String,
    /// Backend-specific connection parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_config: Option<serde_json::Value>,
}

impl WalletConfig {
    /// Config for the default storage type.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            storage_type: default_storage_type(),
            storage_config: None,
        }
    }

    #[must_use]
    pub fn with_storage(
        mut self,
        storage_type: impl Into<String>,
        storage_config: Option<serde_json::Value>,
    ) -> Self {
        self.storage_type = storage_type.into();
        self.storage_config = storage_config;
        self
    }
}

/// Credentials supplied fresh at every create/open call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WalletCredentials {
    /// Backend-specific secrets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_credentials: Option<StorageCredentials>,
}

impl WalletCredentials {
    #[must_use]
    pub fn new(storage_credentials: Option<serde_json::Value>) -> Self {
        Self {
            storage_credentials: storage_credentials.map(StorageCredentials::new),
        }
    }
}

/// Opaque backend secret bundle.
///
/// `Debug` never prints the contents.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageCredentials(serde_json::Value);

impl StorageCredentials {
    #[must_use]
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Raw secret bundle, for the backend constructor only.
    #[must_use]
    pub fn expose(&self) -> &serde_json::Value {
        &self.0
    }
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StorageCredentials([REDACTED])")
    }
}

/// Parse an optional backend config blob into the backend's closed field set.
///
/// A missing blob yields `T::default()`.
pub fn parse_storage_config<T>(storage_type: &str, raw: Option<&serde_json::Value>) -> StorageResult<T>
where
    T: DeserializeOwned + Default,
{
    match raw {
        None | Some(serde_json::Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
            StorageError::InvalidConfig(format!("{storage_type} storage_config: {e}"))
        }),
    }
}

/// Parse backend credentials; the error never echoes secret values.
pub fn parse_storage_credentials<T>(
    storage_type: &str,
    raw: Option<&StorageCredentials>,
) -> StorageResult<T>
where
    T: DeserializeOwned,
{
    let value = raw.map_or(serde_json::Value::Null, |c| c.expose().clone());
    serde_json::from_value(value).map_err(|e| {
        // Type errors quote the offending value; only field-level errors are safe to echo.
        let message = e.to_string();
        let detail = if message.starts_with("missing field") || message.starts_with("unknown field")
        {
            message
        } else {
            "malformed value".to_string()
        };
        StorageError::InvalidConfig(format!("{storage_type} storage_credentials: {detail}"))
    })
}
