//! Open handle on an embedded wallet

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use wallet_storage_core::traits::closed_handle_error;
use wallet_storage_core::types::{SearchOptions, StorageRecord};
use wallet_storage_core::{
    Query, QueryTranslator, SearchCursor, StorageBackend, StorageError, StorageOp, StorageResult,
};

use crate::handle::HandleGuard;

use super::query::PredicateCompiler;
use super::search::EmbeddedCursor;
use super::wallet::EmbeddedWallet;

/// Embedded storage handle
#[derive(Debug)]
pub struct EmbeddedBackend {
    wallet: Mutex<Option<Arc<EmbeddedWallet>>>,
    guard: HandleGuard,
}

impl EmbeddedBackend {
    pub(crate) fn new(wallet: Arc<EmbeddedWallet>, guard: HandleGuard) -> Self {
        Self {
            wallet: Mutex::new(Some(wallet)),
            guard,
        }
    }

    fn wallet(&self) -> StorageResult<Arc<EmbeddedWallet>> {
        self.wallet
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(closed_handle_error)
    }
}

#[async_trait]
impl StorageBackend for EmbeddedBackend {
    async fn get(&self, record_type: &str, id: &str) -> StorageResult<StorageRecord> {
        let wallet = self.wallet()?;
        let key = (record_type.to_string(), id.to_string());
        let found = wallet
            .read()
            .await?
            .records
            .get(&key)
            .map(|stored| stored.to_record(&key));
        found.ok_or_else(|| StorageError::record_not_found(record_type, id))
    }

    async fn apply(&self, ops: &[StorageOp]) -> StorageResult<()> {
        let wallet = self.wallet()?;
        wallet.apply(ops).await?;
        log::debug!("[{}] Applied {} operation(s)", wallet.id(), ops.len());
        Ok(())
    }

    async fn search(
        &self,
        record_type: &str,
        query: &Query,
        options: SearchOptions,
    ) -> StorageResult<Box<dyn SearchCursor>> {
        let wallet = self.wallet()?;
        let predicate = PredicateCompiler.translate(query);
        let cursor = EmbeddedCursor::new(
            wallet,
            Some(record_type.to_string()),
            predicate,
            options.retrieve_records,
            options.retrieve_total_count,
        )
        .await?;
        Ok(Box::new(cursor))
    }

    async fn scan_all(&self) -> StorageResult<Box<dyn SearchCursor>> {
        let wallet = self.wallet()?;
        let predicate = PredicateCompiler.translate(&Query::all());
        Ok(Box::new(
            EmbeddedCursor::new(wallet, None, predicate, true, false).await?,
        ))
    }

    async fn get_metadata(&self) -> StorageResult<Vec<u8>> {
        let wallet = self.wallet()?;
        let metadata = wallet.read().await?.metadata.clone();
        Ok(metadata)
    }

    async fn set_metadata(&self, metadata: &[u8]) -> StorageResult<()> {
        self.wallet()?.set_metadata(metadata).await
    }

    async fn close(&self) -> StorageResult<()> {
        let wallet = self
            .wallet
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(wallet) = wallet {
            log::debug!("[{}] Embedded handle closed", wallet.id());
        }
        self.guard.release();
        Ok(())
    }
}
