//! Common transaction protocol
//!
//! A [`Transaction`] buffers [`StorageOp`]s and hands them to the backend's
//! atomic `apply` in one batch at commit time. It holds the handle's write
//! guard for its whole life, so other mutations on the same handle wait
//! until it is committed, rolled back or dropped.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::error::StorageResult;
use crate::traits::StorageBackend;
use crate::types::{StorageRecord, Tags};

/// One pending mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum StorageOp {
    /// Insert a new record; `DuplicateId` if `(type, id)` exists
    Add(StorageRecord),
    /// Replace the value, tags untouched
    UpdateValue {
        record_type: String,
        id: String,
        value: Vec<u8>,
    },
    /// Replace the whole tag map, value untouched
    UpdateTags {
        record_type: String,
        id: String,
        tags: Tags,
    },
    /// Merge tags, overwriting same-named ones
    AddTags {
        record_type: String,
        id: String,
        tags: Tags,
    },
    /// Remove the named tags
    DeleteTags {
        record_type: String,
        id: String,
        names: Vec<String>,
    },
    Delete { record_type: String, id: String },
}

impl StorageOp {
    #[must_use]
    pub fn update_value(record_type: &str, id: &str, value: Vec<u8>) -> Self {
        Self::UpdateValue {
            record_type: record_type.to_string(),
            id: id.to_string(),
            value,
        }
    }

    #[must_use]
    pub fn update_tags(record_type: &str, id: &str, tags: Tags) -> Self {
        Self::UpdateTags {
            record_type: record_type.to_string(),
            id: id.to_string(),
            tags,
        }
    }

    #[must_use]
    pub fn add_tags(record_type: &str, id: &str, tags: Tags) -> Self {
        Self::AddTags {
            record_type: record_type.to_string(),
            id: id.to_string(),
            tags,
        }
    }

    #[must_use]
    pub fn delete_tags(record_type: &str, id: &str, names: Vec<String>) -> Self {
        Self::DeleteTags {
            record_type: record_type.to_string(),
            id: id.to_string(),
            names,
        }
    }

    #[must_use]
    pub fn delete(record_type: &str, id: &str) -> Self {
        Self::Delete {
            record_type: record_type.to_string(),
            id: id.to_string(),
        }
    }

    /// Type of the record the operation targets
    #[must_use]
    pub fn record_type(&self) -> &str {
        match self {
            Self::Add(record) => &record.record_type,
            Self::UpdateValue { record_type, .. }
            | Self::UpdateTags { record_type, .. }
            | Self::AddTags { record_type, .. }
            | Self::DeleteTags { record_type, .. }
            | Self::Delete { record_type, .. } => record_type,
        }
    }

    /// Id of the record the operation targets
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Add(record) => &record.id,
            Self::UpdateValue { id, .. }
            | Self::UpdateTags { id, .. }
            | Self::AddTags { id, .. }
            | Self::DeleteTags { id, .. }
            | Self::Delete { id, .. } => id,
        }
    }

    /// Short operation name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Add(_) => "add",
            Self::UpdateValue { .. } => "update_value",
            Self::UpdateTags { .. } => "update_tags",
            Self::AddTags { .. } => "add_tags",
            Self::DeleteTags { .. } => "delete_tags",
            Self::Delete { .. } => "delete",
        }
    }
}

/// Transaction state machine.
///
/// `Open -> Committing -> Committed | RolledBack`, or `Open -> RolledBack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionState {
    Open,
    Committing,
    Committed,
    RolledBack,
}

/// Atomic, ordered batch of mutations against one storage handle.
pub struct Transaction {
    id: Uuid,
    wallet_id: String,
    backend: Arc<dyn StorageBackend>,
    ops: Vec<StorageOp>,
    state: TransactionState,
    _write_guard: OwnedMutexGuard<()>,
}

impl Transaction {
    pub(crate) fn begin(
        wallet_id: &str,
        backend: Arc<dyn StorageBackend>,
        write_guard: OwnedMutexGuard<()>,
    ) -> Self {
        let id = Uuid::new_v4();
        log::debug!("[{wallet_id}] Transaction {id} opened");
        Self {
            id,
            wallet_id: wallet_id.to_string(),
            backend,
            ops: Vec::new(),
            state: TransactionState::Open,
            _write_guard: write_guard,
        }
    }

    /// Transaction handle
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Operations queued so far, in issuance order
    #[must_use]
    pub fn operations(&self) -> &[StorageOp] {
        &self.ops
    }

    pub fn push(&mut self, op: StorageOp) -> &mut Self {
        log::debug!(
            "[{}] Transaction {} queued {} {}/{}",
            self.wallet_id,
            self.id,
            op.kind(),
            op.record_type(),
            op.id()
        );
        self.ops.push(op);
        self
    }

    pub fn add(&mut self, record: StorageRecord) -> &mut Self {
        self.push(StorageOp::Add(record))
    }

    pub fn update_value(&mut self, record_type: &str, id: &str, value: Vec<u8>) -> &mut Self {
        self.push(StorageOp::update_value(record_type, id, value))
    }

    pub fn update_tags(&mut self, record_type: &str, id: &str, tags: Tags) -> &mut Self {
        self.push(StorageOp::update_tags(record_type, id, tags))
    }

    pub fn add_tags(&mut self, record_type: &str, id: &str, tags: Tags) -> &mut Self {
        self.push(StorageOp::add_tags(record_type, id, tags))
    }

    pub fn delete_tags(&mut self, record_type: &str, id: &str, names: Vec<String>) -> &mut Self {
        self.push(StorageOp::delete_tags(record_type, id, names))
    }

    pub fn delete(&mut self, record_type: &str, id: &str) -> &mut Self {
        self.push(StorageOp::delete(record_type, id))
    }

    /// Apply every queued operation atomically.
    ///
    /// # Errors
    /// The backend's error; the transaction is already rolled back by then
    /// and nothing it queued is visible.
    pub async fn commit(mut self) -> StorageResult<()> {
        self.state = TransactionState::Committing;
        if self.ops.is_empty() {
            self.state = TransactionState::Committed;
            log::debug!("[{}] Transaction {} committed (empty)", self.wallet_id, self.id);
            return Ok(());
        }

        match self.backend.apply(&self.ops).await {
            Ok(()) => {
                self.state = TransactionState::Committed;
                log::debug!(
                    "[{}] Transaction {} committed {} operation(s)",
                    self.wallet_id,
                    self.id,
                    self.ops.len()
                );
                Ok(())
            }
            Err(e) => {
                self.state = TransactionState::RolledBack;
                if e.is_expected() {
                    log::warn!(
                        "[{}] Transaction {} rolled back: {e}",
                        self.wallet_id,
                        self.id
                    );
                } else {
                    log::error!(
                        "[{}] Transaction {} rolled back: {e}",
                        self.wallet_id,
                        self.id
                    );
                }
                Err(e)
            }
        }
    }

    /// Discard every queued operation.
    pub fn rollback(mut self) {
        self.state = TransactionState::RolledBack;
        log::debug!(
            "[{}] Transaction {} rolled back ({} operation(s) discarded)",
            self.wallet_id,
            self.id,
            self.ops.len()
        );
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Open {
            self.state = TransactionState::RolledBack;
            log::warn!(
                "[{}] Transaction {} dropped while open, {} operation(s) discarded",
                self.wallet_id,
                self.id,
                self.ops.len()
            );
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("wallet_id", &self.wallet_id)
            .field("state", &self.state)
            .field("ops", &self.ops.len())
            .finish_non_exhaustive()
    }
}
