//! Open storage handle Trait

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};
use crate::query::Query;
use crate::traits::SearchCursor;
use crate::transaction::StorageOp;
use crate::types::{SearchOptions, StorageRecord, Tags};

/// Storage Backend Trait
///
/// One open storage session. Every mutation funnels into [`apply`], which
/// must be all-or-nothing: on error the backend undoes whatever part of the
/// batch it already performed before returning.
///
/// Errors crossing this boundary are always [`StorageError`] kinds, never a
/// native driver error.
///
/// [`apply`]: StorageBackend::apply
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Fetch one record.
    ///
    /// # Arguments
    /// * `record_type` - Record type namespace
    /// * `id` - Record id within the type
    async fn get(&self, record_type: &str, id: &str) -> StorageResult<StorageRecord>;

    /// Apply a batch of operations atomically, in order.
    async fn apply(&self, ops: &[StorageOp]) -> StorageResult<()>;

    /// Start a search over records of `record_type`.
    ///
    /// The cursor is lazy and finite; records committed after this call may
    /// or may not be observed, half-committed batches never are.
    async fn search(
        &self,
        record_type: &str,
        query: &Query,
        options: SearchOptions,
    ) -> StorageResult<Box<dyn SearchCursor>>;

    /// Cursor over every record of every type.
    async fn scan_all(&self) -> StorageResult<Box<dyn SearchCursor>>;

    /// Wallet-level metadata blob
    async fn get_metadata(&self) -> StorageResult<Vec<u8>>;

    /// Replace the wallet-level metadata blob
    async fn set_metadata(&self, metadata: &[u8]) -> StorageResult<()>;

    /// Release everything this handle owns. Later calls fail with `Io`.
    async fn close(&self) -> StorageResult<()>;

    async fn add(&self, record: &StorageRecord) -> StorageResult<()> {
        self.apply(&[StorageOp::Add(record.clone())]).await
    }

    /// Replace the value and/or the whole tag map of a record.
    async fn update(
        &self,
        record_type: &str,
        id: &str,
        value: Option<&[u8]>,
        tags: Option<&Tags>,
    ) -> StorageResult<()> {
        let mut ops = Vec::with_capacity(2);
        if let Some(value) = value {
            ops.push(StorageOp::update_value(record_type, id, value.to_vec()));
        }
        if let Some(tags) = tags {
            ops.push(StorageOp::update_tags(record_type, id, tags.clone()));
        }
        if ops.is_empty() {
            // Nothing to change, but absence must still be reported.
            return self.get(record_type, id).await.map(|_| ());
        }
        self.apply(&ops).await
    }

    /// Merge tags into a record, overwriting same-named ones.
    async fn add_tags(&self, record_type: &str, id: &str, tags: &Tags) -> StorageResult<()> {
        self.apply(&[StorageOp::add_tags(record_type, id, tags.clone())])
            .await
    }

    /// Remove named tags from a record; unknown names are ignored.
    async fn delete_tags(&self, record_type: &str, id: &str, names: &[String]) -> StorageResult<()> {
        self.apply(&[StorageOp::delete_tags(record_type, id, names.to_vec())])
            .await
    }

    async fn delete(&self, record_type: &str, id: &str) -> StorageResult<()> {
        self.apply(&[StorageOp::delete(record_type, id)]).await
    }
}

/// Error returned by handles used after `close`.
#[must_use]
pub fn closed_handle_error() -> StorageError {
    StorageError::Io("storage handle is closed".to_string())
}
