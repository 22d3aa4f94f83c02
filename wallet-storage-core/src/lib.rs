//! Wallet Storage Core Library
//!
//! Pluggable storage abstraction for identity wallets, including:
//! - Record model with plaintext/encrypted tag kinds
//! - Common query language (WQL) and the translator seam backends implement
//! - Common transaction protocol
//! - Storage capability interface traits
//! - Process-wide plugin registry of storage types
//!
//! Backends live in their own crates and plug in through [`StorageRegistry`];
//! the wallet core only ever talks to [`Storage`] handles.

pub mod error;
pub mod query;
pub mod registry;
pub mod search;
pub mod services;
pub mod storage;
pub mod traits;
pub mod transaction;
pub mod types;
pub mod utils;

#[cfg(test)]
mod test_utils;

// Re-export common types
pub use error::{StorageError, StorageResult};
pub use query::{Query, QueryTranslator};
pub use registry::{
    InterfaceVersion, PluginInitializer, StorageRegistry, STORAGE_INTERFACE_VERSION,
};
pub use search::RecordSearch;
pub use services::WalletStorageService;
pub use storage::Storage;
pub use traits::{SearchCursor, StorageBackend, StorageType};
pub use transaction::{StorageOp, Transaction, TransactionState};
pub use types::{
    SearchOptions, StorageCredentials, StorageRecord, TagName, Tags, WalletConfig,
    WalletCredentials,
};
