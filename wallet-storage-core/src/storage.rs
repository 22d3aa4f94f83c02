//! Open wallet storage handle
//!
//! [`Storage`] is what the wallet core holds between open and close. It
//! dispatches to the backend chosen at open time and owns the handle's write
//! exclusion: at most one transaction or single mutation runs per handle.

use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{StorageError, StorageResult};
use crate::query::Query;
use crate::search::RecordSearch;
use crate::traits::StorageBackend;
use crate::transaction::Transaction;
use crate::types::{SearchOptions, StorageRecord, Tags};

fn log_failure(wallet_id: &str, op: &str, err: &StorageError) {
    if err.is_expected() {
        log::warn!("[{wallet_id}] {op} failed: {err}");
    } else {
        log::error!("[{wallet_id}] {op} failed: {err}");
    }
}

/// Open storage of one wallet.
pub struct Storage {
    wallet_id: String,
    storage_type: String,
    backend: Arc<dyn StorageBackend>,
    write_lock: Arc<Mutex<()>>,
}

impl Storage {
    #[must_use]
    pub fn new(wallet_id: &str, storage_type: &str, backend: Box<dyn StorageBackend>) -> Self {
        Self {
            wallet_id: wallet_id.to_string(),
            storage_type: storage_type.to_string(),
            backend: Arc::from(backend),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    #[must_use]
    pub fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    /// Name of the registered backend serving this wallet
    #[must_use]
    pub fn storage_type(&self) -> &str {
        &self.storage_type
    }

    pub async fn get(&self, record_type: &str, id: &str) -> StorageResult<StorageRecord> {
        log::debug!("[{}] get {record_type}/{id}", self.wallet_id);
        self.backend
            .get(record_type, id)
            .await
            .inspect_err(|e| log_failure(&self.wallet_id, "get", e))
    }

    pub async fn add(&self, record: &StorageRecord) -> StorageResult<()> {
        log::debug!(
            "[{}] add {}/{} ({} tags)",
            self.wallet_id,
            record.record_type,
            record.id,
            record.tags.len()
        );
        let _guard = self.write_lock.lock().await;
        self.backend
            .add(record)
            .await
            .inspect_err(|e| log_failure(&self.wallet_id, "add", e))
    }

    /// Replace a record's value and/or its whole tag map.
    pub async fn update(
        &self,
        record_type: &str,
        id: &str,
        value: Option<&[u8]>,
        tags: Option<&Tags>,
    ) -> StorageResult<()> {
        log::debug!("[{}] update {record_type}/{id}", self.wallet_id);
        let _guard = self.write_lock.lock().await;
        self.backend
            .update(record_type, id, value, tags)
            .await
            .inspect_err(|e| log_failure(&self.wallet_id, "update", e))
    }

    pub async fn add_tags(&self, record_type: &str, id: &str, tags: &Tags) -> StorageResult<()> {
        log::debug!("[{}] add_tags {record_type}/{id}", self.wallet_id);
        let _guard = self.write_lock.lock().await;
        self.backend
            .add_tags(record_type, id, tags)
            .await
            .inspect_err(|e| log_failure(&self.wallet_id, "add_tags", e))
    }

    pub async fn delete_tags(
        &self,
        record_type: &str,
        id: &str,
        names: &[String],
    ) -> StorageResult<()> {
        log::debug!("[{}] delete_tags {record_type}/{id}", self.wallet_id);
        let _guard = self.write_lock.lock().await;
        self.backend
            .delete_tags(record_type, id, names)
            .await
            .inspect_err(|e| log_failure(&self.wallet_id, "delete_tags", e))
    }

    pub async fn delete(&self, record_type: &str, id: &str) -> StorageResult<()> {
        log::debug!("[{}] delete {record_type}/{id}", self.wallet_id);
        let _guard = self.write_lock.lock().await;
        self.backend
            .delete(record_type, id)
            .await
            .inspect_err(|e| log_failure(&self.wallet_id, "delete", e))
    }

    /// Search records of `record_type` matching `query`.
    pub async fn search(
        &self,
        record_type: &str,
        query: &Query,
        options: SearchOptions,
    ) -> StorageResult<RecordSearch> {
        log::debug!("[{}] search {record_type} where {query}", self.wallet_id);
        let cursor = self
            .backend
            .search(record_type, query, options)
            .await
            .inspect_err(|e| log_failure(&self.wallet_id, "search", e))?;
        Ok(RecordSearch::new(cursor))
    }

    /// Every record of every type, for export.
    pub async fn scan_all(&self) -> StorageResult<RecordSearch> {
        log::debug!("[{}] scan_all", self.wallet_id);
        let cursor = self
            .backend
            .scan_all()
            .await
            .inspect_err(|e| log_failure(&self.wallet_id, "scan_all", e))?;
        Ok(RecordSearch::new(cursor))
    }

    pub async fn get_metadata(&self) -> StorageResult<Vec<u8>> {
        self.backend
            .get_metadata()
            .await
            .inspect_err(|e| log_failure(&self.wallet_id, "get_metadata", e))
    }

    pub async fn set_metadata(&self, metadata: &[u8]) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        self.backend
            .set_metadata(metadata)
            .await
            .inspect_err(|e| log_failure(&self.wallet_id, "set_metadata", e))
    }

    /// Open a transaction, waiting for any other one on this handle to end.
    pub async fn begin(&self) -> Transaction {
        let guard = Arc::clone(&self.write_lock).lock_owned().await;
        Transaction::begin(&self.wallet_id, Arc::clone(&self.backend), guard)
    }

    /// Close the handle. Waits for an open transaction to finish first.
    pub async fn close(self) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        self.backend
            .close()
            .await
            .inspect_err(|e| log_failure(&self.wallet_id, "close", e))?;
        log::info!("[{}] Storage closed ({})", self.wallet_id, self.storage_type);
        Ok(())
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("wallet_id", &self.wallet_id)
            .field("storage_type", &self.storage_type)
            .finish_non_exhaustive()
    }
}
