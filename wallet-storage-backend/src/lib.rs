//! # wallet-storage-backend
//!
//! Builtin storage types for the wallet storage layer.
//!
//! | Storage type | Feature Flag | Backing store |
//! |--------------|-------------|---------------|
//! | `default` | `embedded` | In memory, or JSON snapshots under `storage_config.path` |
//! | `postgres_storage` | `postgres` / `sqlite` | Relational schema through `SeaORM` |
//!
//! ## Feature Flags
//!
//! - **`embedded`** *(default)*: the embedded `default` storage type.
//! - **`postgres`** *(default)*: relational storage with the Postgres driver.
//! - **`sqlite`** *(default)*: relational storage with the `SQLite` driver, for
//!   local deployments and tests.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use wallet_storage_backend::register_builtin_backends;
//! use wallet_storage_core::{
//!     Query, SearchOptions, StorageRecord, StorageRegistry, WalletConfig, WalletCredentials,
//!     WalletStorageService,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(StorageRegistry::new());
//!     register_builtin_backends(&registry)?;
//!     let service = WalletStorageService::new(registry);
//!
//!     let config = WalletConfig::new("alice");
//!     let credentials = WalletCredentials::default();
//!     service.create_wallet(&config, &credentials, b"wrapped keys").await?;
//!
//!     let storage = service.open_wallet(&config, &credentials).await?;
//!     storage
//!         .add(&StorageRecord::new("did", "VREsKVpdEtWCcCmMfddYuT", b"ciphertext".to_vec())
//!             .with_tag("~seed", "00000000000000000000000000000My5"))
//!         .await?;
//!
//!     let query = Query::equals("~seed", "00000000000000000000000000000My5");
//!     let mut search = storage.search("did", &query, SearchOptions::default()).await?;
//!     while let Some(record) = search.next().await? {
//!         println!("{}", record.id);
//!     }
//!
//!     storage.close().await?;
//!     Ok(())
//! }
//! ```

#[cfg(feature = "embedded")]
pub mod embedded;
mod factory;
#[cfg(any(feature = "embedded", feature = "relational"))]
mod handle;
#[cfg(feature = "relational")]
pub mod relational;

#[cfg(feature = "embedded")]
pub use embedded::{EmbeddedConfig, EmbeddedStorageType, EMBEDDED_STORAGE_TYPE};
#[cfg(feature = "embedded")]
pub use factory::default_storage_init;
#[cfg(feature = "relational")]
pub use factory::postgres_storage_init;
pub use factory::{get_all_backend_metadata, register_builtin_backends};
#[cfg(feature = "relational")]
pub use relational::{PostgresStorageType, POSTGRES_STORAGE_TYPE};
