//! Type definition module

mod config;
mod options;
mod record;

pub use config::{
    parse_storage_config, parse_storage_credentials, StorageCredentials, WalletConfig,
    WalletCredentials, DEFAULT_STORAGE_TYPE,
};
pub use options::{BackendField, BackendMetadata, SearchOptions};
pub use record::{RecordKey, StorageRecord, TagName, Tags, PLAINTEXT_TAG_PREFIX};
