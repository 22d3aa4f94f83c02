//! 钱包存储服务
//!
//! Creates, opens and deletes wallet storages through whichever backend the
//! wallet config names. The registry is consulted exactly once per call.

use std::sync::Arc;

use crate::error::StorageResult;
use crate::registry::StorageRegistry;
use crate::storage::Storage;
use crate::traits::StorageType;
use crate::types::{BackendMetadata, WalletConfig, WalletCredentials};

/// Wallet storage service
pub struct WalletStorageService {
    registry: Arc<StorageRegistry>,
}

impl WalletStorageService {
    #[must_use]
    pub fn new(registry: Arc<StorageRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &StorageRegistry {
        &self.registry
    }

    fn resolve(&self, config: &WalletConfig) -> StorageResult<Arc<dyn StorageType>> {
        self.registry
            .resolve(&config.storage_type)
            .inspect_err(|e| log::warn!("[{}] {e}", config.id))
    }

    /// Provision storage for a new wallet.
    ///
    /// `metadata` is the initial wallet metadata blob (wrapped keys).
    pub async fn create_wallet(
        &self,
        config: &WalletConfig,
        credentials: &WalletCredentials,
        metadata: &[u8],
    ) -> StorageResult<()> {
        // 1. 解析存储类型
        let storage_type = self.resolve(config)?;

        // 2. 交给后端创建
        log::info!(
            "Creating wallet '{}' with storage type '{}'",
            config.id,
            config.storage_type
        );
        storage_type
            .create_storage(
                &config.id,
                config.storage_config.as_ref(),
                credentials.storage_credentials.as_ref(),
                metadata,
            )
            .await
            .inspect_err(|e| log_lifecycle_failure("create", &config.id, e))?;

        log::info!("Wallet '{}' created", config.id);
        Ok(())
    }

    /// Open an existing wallet's storage.
    pub async fn open_wallet(
        &self,
        config: &WalletConfig,
        credentials: &WalletCredentials,
    ) -> StorageResult<Storage> {
        let storage_type = self.resolve(config)?;

        let backend = storage_type
            .open_storage(
                &config.id,
                config.storage_config.as_ref(),
                credentials.storage_credentials.as_ref(),
            )
            .await
            .inspect_err(|e| log_lifecycle_failure("open", &config.id, e))?;

        log::info!(
            "Wallet '{}' opened with storage type '{}'",
            config.id,
            config.storage_type
        );
        Ok(Storage::new(&config.id, &config.storage_type, backend))
    }

    /// Remove a wallet's storage and every record in it.
    pub async fn delete_wallet(
        &self,
        config: &WalletConfig,
        credentials: &WalletCredentials,
    ) -> StorageResult<()> {
        let storage_type = self.resolve(config)?;

        storage_type
            .delete_storage(
                &config.id,
                config.storage_config.as_ref(),
                credentials.storage_credentials.as_ref(),
            )
            .await
            .inspect_err(|e| log_lifecycle_failure("delete", &config.id, e))?;

        log::info!("Wallet '{}' deleted", config.id);
        Ok(())
    }

    /// Metadata of every registered backend.
    #[must_use]
    pub fn list_storage_types(&self) -> Vec<BackendMetadata> {
        self.registry.metadata()
    }
}

fn log_lifecycle_failure(action: &str, wallet_id: &str, err: &crate::error::StorageError) {
    if err.is_expected() {
        log::warn!("Failed to {action} wallet '{wallet_id}': {err}");
    } else {
        log::error!("Failed to {action} wallet '{wallet_id}': {err}");
    }
}
