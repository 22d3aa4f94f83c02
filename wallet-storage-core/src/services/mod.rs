//! 业务逻辑服务层

mod wallet_storage_service;

pub use wallet_storage_service::WalletStorageService;
