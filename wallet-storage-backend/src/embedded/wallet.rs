//! Shared embedded wallet

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use wallet_storage_core::{StorageError, StorageOp, StorageResult};

use super::run_blocking;
use super::state::{write_snapshot, UndoLog, WalletState};

/// State of one wallet, shared by every open handle on it.
///
/// Writers hold the write lock from the first applied op until the snapshot
/// is on disk, so readers never see a half-applied batch. The snapshot write
/// itself runs on the blocking pool; readers await the lock meanwhile.
#[derive(Debug)]
pub struct EmbeddedWallet {
    id: String,
    /// Snapshot file; `None` for in-memory wallets
    file: Option<PathBuf>,
    state: RwLock<WalletState>,
    deleted: AtomicBool,
}

impl EmbeddedWallet {
    pub fn new(id: &str, file: Option<PathBuf>, state: WalletState) -> Self {
        Self {
            id: id.to_string(),
            file,
            state: RwLock::new(state),
            deleted: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::SeqCst);
    }

    fn ensure_live(&self) -> StorageResult<()> {
        if self.deleted.load(Ordering::SeqCst) {
            Err(StorageError::NotFound(format!("wallet '{}'", self.id)))
        } else {
            Ok(())
        }
    }

    pub async fn read(&self) -> StorageResult<RwLockReadGuard<'_, WalletState>> {
        self.ensure_live()?;
        let state = self.state.read().await;
        self.ensure_live()?;
        Ok(state)
    }

    async fn write(&self) -> StorageResult<RwLockWriteGuard<'_, WalletState>> {
        self.ensure_live()?;
        let state = self.state.write().await;
        self.ensure_live()?;
        Ok(state)
    }

    /// Apply a batch atomically and make it durable.
    pub async fn apply(&self, ops: &[StorageOp]) -> StorageResult<()> {
        let mut state = self.write().await?;
        let undo = state.apply(ops)?;
        self.persist_or_revert(&mut state, undo).await
    }

    pub async fn set_metadata(&self, metadata: &[u8]) -> StorageResult<()> {
        let mut state = self.write().await?;
        let undo = state.replace_metadata(metadata);
        self.persist_or_revert(&mut state, undo).await
    }

    /// Write the snapshot for file-backed wallets.
    ///
    /// Every mutation rewrites the whole file, so write cost grows with the
    /// wallet.
    async fn persist(&self, state: &WalletState) -> StorageResult<()> {
        let Some(path) = self.file.clone() else {
            return Ok(());
        };
        let bytes = state.to_snapshot_bytes()?;
        run_blocking(move || write_snapshot(&path, &bytes)).await
    }

    async fn persist_or_revert(&self, state: &mut WalletState, undo: UndoLog) -> StorageResult<()> {
        if let Err(e) = self.persist(state).await {
            log::error!("[{}] Failed to persist wallet snapshot, reverting batch: {e}", self.id);
            undo.revert(state);
            return Err(e);
        }
        Ok(())
    }
}
