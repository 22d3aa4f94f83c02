//! Unified error type definition
//!
//! Every backend maps its native failures into one of these kinds before the
//! error crosses the storage capability boundary.

use serde::Serialize;
use thiserror::Error;

use crate::registry::InterfaceVersion;

/// Storage layer error type
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", content = "details")]
pub enum StorageError {
    /// Backend resources cannot be reached or initialized
    #[error("Connection error: {0}")]
    Connection(String),

    /// Backend rejected the supplied credentials
    #[error("Credentials rejected: {0}")]
    Credentials(String),

    /// A record (or wallet) with the same identity already exists
    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    /// A storage type with the same name is already registered
    #[error("Storage type already registered: {0}")]
    DuplicateRegistration(String),

    /// Referenced record, wallet or type/id pair is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Query structure is invalid
    #[error("Malformed query: {0}")]
    MalformedQuery(String),

    /// Backend was built against an incompatible interface version
    #[error("Interface version mismatch for '{storage_type}': expected {expected}, found {found}")]
    VersionMismatch {
        storage_type: String,
        expected: InterfaceVersion,
        found: InterfaceVersion,
    },

    /// No backend registered under this name
    #[error("Unknown storage type: {0}")]
    UnknownStorageType(String),

    /// Transient or persistent backend I/O failure
    #[error("I/O error: {0}")]
    Io(String),

    /// `storage_config` / `storage_credentials` do not match the backend's fields
    #[error("Invalid storage configuration: {0}")]
    InvalidConfig(String),

    /// Plugin initializer failed or returned without registering a backend
    #[error("Plugin initialization failed: {0}")]
    PluginInit(String),
}

impl StorageError {
    /// Whether it is expected behavior (caller input, absent records, deployment
    /// mistakes), used for log classification.
    ///
    /// Level `warn` should be used when returning `true` and level `error` when returning `false`.
    /// **Please update this method when new variants are added.**
    #[must_use]
    pub fn is_expected(&self) -> bool {
        match self {
            Self::Credentials(_)
            | Self::DuplicateId(_)
            | Self::DuplicateRegistration(_)
            | Self::NotFound(_)
            | Self::MalformedQuery(_)
            | Self::VersionMismatch { .. }
            | Self::UnknownStorageType(_)
            | Self::InvalidConfig(_) => true,
            Self::Connection(_) | Self::Io(_) | Self::PluginInit(_) => false,
        }
    }

    /// Shorthand for the `NotFound` error of a typed record.
    #[must_use]
    pub fn record_not_found(record_type: &str, id: &str) -> Self {
        Self::NotFound(format!("record '{id}' of type '{record_type}'"))
    }

    /// Shorthand for the `DuplicateId` error of a typed record.
    #[must_use]
    pub fn duplicate_record(record_type: &str, id: &str) -> Self {
        Self::DuplicateId(format!("record '{id}' of type '{record_type}'"))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Storage layer Result type alias
pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_not_found_record() {
        let e = StorageError::record_not_found("did", "VREsKVpdEtWCcCmMfddYuT");
        assert_eq!(
            e.to_string(),
            "Not found: record 'VREsKVpdEtWCcCmMfddYuT' of type 'did'"
        );
    }

    #[test]
    fn display_version_mismatch() {
        let e = StorageError::VersionMismatch {
            storage_type: "postgres_storage".to_string(),
            expected: InterfaceVersion::new(1, 0),
            found: InterfaceVersion::new(2, 1),
        };
        assert_eq!(
            e.to_string(),
            "Interface version mismatch for 'postgres_storage': expected 1.0, found 2.1"
        );
    }

    #[test]
    fn serializes_with_code_tag() {
        let e = StorageError::UnknownStorageType("postgres_storage".to_string());
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["code"], "UnknownStorageType");
        assert_eq!(json["details"], "postgres_storage");
    }

    #[test]
    fn backend_faults_are_not_expected() {
        assert!(!StorageError::Io("disk full".into()).is_expected());
        assert!(!StorageError::Connection("refused".into()).is_expected());
        assert!(StorageError::NotFound("x".into()).is_expected());
        assert!(StorageError::MalformedQuery("x".into()).is_expected());
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let e: StorageError = io.into();
        assert!(matches!(e, StorageError::Io(msg) if msg.contains("denied")));
    }
}
