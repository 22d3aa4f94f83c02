//! Plugin initializers and builtin registration.

use std::sync::Arc;

use wallet_storage_core::types::BackendMetadata;
use wallet_storage_core::{StorageRegistry, StorageResult, STORAGE_INTERFACE_VERSION};

#[cfg(feature = "embedded")]
use crate::embedded::{EmbeddedStorageType, EMBEDDED_STORAGE_TYPE};
#[cfg(feature = "relational")]
use crate::relational::{PostgresStorageType, POSTGRES_STORAGE_TYPE};

/// Initializer for the embedded `"default"` storage type.
///
/// Matches [`wallet_storage_core::PluginInitializer`], so hosts can hand it to
/// [`StorageRegistry::load_plugin`].
#[cfg(feature = "embedded")]
pub fn default_storage_init(registry: &StorageRegistry) -> StorageResult<()> {
    registry.register(
        EMBEDDED_STORAGE_TYPE,
        Arc::new(EmbeddedStorageType::new()),
        STORAGE_INTERFACE_VERSION,
    )
}

/// Initializer for the relational `"postgres_storage"` storage type.
#[cfg(feature = "relational")]
pub fn postgres_storage_init(registry: &StorageRegistry) -> StorageResult<()> {
    registry.register(
        POSTGRES_STORAGE_TYPE,
        Arc::new(PostgresStorageType::new()),
        STORAGE_INTERFACE_VERSION,
    )
}

/// Registers every storage type enabled via feature flags.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use wallet_storage_backend::register_builtin_backends;
/// use wallet_storage_core::{StorageRegistry, WalletStorageService};
///
/// let registry = Arc::new(StorageRegistry::new());
/// register_builtin_backends(&registry).unwrap();
/// let service = WalletStorageService::new(registry);
/// ```
pub fn register_builtin_backends(registry: &StorageRegistry) -> StorageResult<()> {
    #[cfg(feature = "embedded")]
    registry.load_plugin("embedded", default_storage_init)?;
    #[cfg(feature = "relational")]
    registry.load_plugin("relational", postgres_storage_init)?;
    Ok(())
}

/// Returns metadata for all storage types enabled via feature flags.
pub fn get_all_backend_metadata() -> Vec<BackendMetadata> {
    vec![
        #[cfg(feature = "embedded")]
        EmbeddedStorageType::backend_metadata(),
        #[cfg(feature = "relational")]
        PostgresStorageType::backend_metadata(),
    ]
}
