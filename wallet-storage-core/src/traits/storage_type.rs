//! Backend factory Trait

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageResult;
use crate::traits::StorageBackend;
use crate::types::{BackendMetadata, StorageCredentials};

/// Backend factory, registered by name in the
/// [`StorageRegistry`](crate::registry::StorageRegistry).
///
/// `config` and `credentials` are the wallet's opaque pass-through blobs; each
/// backend parses them into its own closed field set.
#[async_trait]
pub trait StorageType: Send + Sync {
    /// Static description of the backend and the fields it accepts
    fn metadata(&self) -> BackendMetadata;

    /// Provision a new wallet storage and write its initial metadata blob.
    ///
    /// Fails with `DuplicateId` when a wallet with this id already exists.
    async fn create_storage(
        &self,
        id: &str,
        config: Option<&Value>,
        credentials: Option<&StorageCredentials>,
        metadata: &[u8],
    ) -> StorageResult<()>;

    /// Open an existing wallet storage.
    ///
    /// On failure nothing opened along the way may stay held.
    async fn open_storage(
        &self,
        id: &str,
        config: Option<&Value>,
        credentials: Option<&StorageCredentials>,
    ) -> StorageResult<Box<dyn StorageBackend>>;

    /// Remove a wallet storage and every record in it.
    async fn delete_storage(
        &self,
        id: &str,
        config: Option<&Value>,
        credentials: Option<&StorageCredentials>,
    ) -> StorageResult<()>;
}
