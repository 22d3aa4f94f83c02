//! Embedded default storage
//!
//! Reference backend needing no external service. Records live in an ordered
//! map per wallet, shared by every handle on that wallet. With a `path` in the
//! storage config each committed batch is persisted as a JSON snapshot at
//! `<path>/<wallet id>/wallet.json`; without one wallets live for the
//! lifetime of the storage type instance.
//!
//! Every committed batch rewrites the whole snapshot, so write cost grows
//! linearly with wallet size. File I/O runs on tokio's blocking pool.

mod backend;
mod query;
mod search;
mod state;
mod wallet;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use wallet_storage_core::types::{
    parse_storage_config, BackendField, BackendMetadata, StorageCredentials,
};
use wallet_storage_core::{StorageBackend, StorageError, StorageResult, StorageType};

use crate::handle::HandleGuard;

pub use backend::EmbeddedBackend;
pub use query::{LikePattern, Predicate, PredicateCompiler};

use state::{is_snapshot_temp, write_snapshot, WalletState};
use wallet::EmbeddedWallet;

/// Name the embedded backend registers under.
pub const EMBEDDED_STORAGE_TYPE: &str = "default";

const SNAPSHOT_FILE: &str = "wallet.json";

/// `storage_config` accepted by the embedded backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddedConfig {
    /// Directory holding one sub-directory per wallet; in-memory when absent
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WalletLocation {
    root: Option<PathBuf>,
    id: String,
}

impl WalletLocation {
    fn dir(&self) -> Option<PathBuf> {
        self.root.as_ref().map(|root| root.join(&self.id))
    }

    fn snapshot_file(&self) -> Option<PathBuf> {
        self.dir().map(|dir| dir.join(SNAPSHOT_FILE))
    }
}

/// Embedded storage type (factory)
#[derive(Debug, Default)]
pub struct EmbeddedStorageType {
    wallets: Mutex<HashMap<WalletLocation, Arc<EmbeddedWallet>>>,
    /// Serializes create/open/delete so disk checks and the cache agree
    lifecycle: tokio::sync::Mutex<()>,
    open_handles: Arc<AtomicUsize>,
}

impl EmbeddedStorageType {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles opened and not yet closed or dropped.
    #[must_use]
    pub fn open_handle_count(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    /// Backend metadata
    #[must_use]
    pub fn backend_metadata() -> BackendMetadata {
        BackendMetadata {
            storage_type: EMBEDDED_STORAGE_TYPE.to_string(),
            description: "Embedded store, in memory or as JSON snapshots on local disk".to_string(),
            config_fields: vec![BackendField::new(
                "path",
                false,
                "Directory for wallet files; wallets stay in memory when omitted",
            )],
            credential_fields: Vec::new(),
        }
    }

    fn locate(
        id: &str,
        config: Option<&Value>,
        credentials: Option<&StorageCredentials>,
    ) -> StorageResult<WalletLocation> {
        validate_wallet_id(id)?;
        let config: EmbeddedConfig = parse_storage_config(EMBEDDED_STORAGE_TYPE, config)?;
        reject_credentials(credentials)?;
        Ok(WalletLocation {
            root: config.path,
            id: id.to_string(),
        })
    }

    fn wallets(&self) -> std::sync::MutexGuard<'_, HashMap<WalletLocation, Arc<EmbeddedWallet>>> {
        self.wallets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Wallet ids double as directory names.
fn validate_wallet_id(id: &str) -> StorageResult<()> {
    let invalid = id.is_empty()
        || id == "."
        || id == ".."
        || id.chars().any(|c| matches!(c, '/' | '\\' | '\0'));
    if invalid {
        return Err(StorageError::InvalidConfig(format!(
            "wallet id '{id}' is not a valid path segment"
        )));
    }
    Ok(())
}

fn reject_credentials(credentials: Option<&StorageCredentials>) -> StorageResult<()> {
    let empty = credentials.is_none_or(|c| {
        let raw = c.expose();
        raw.is_null() || raw.as_object().is_some_and(serde_json::Map::is_empty)
    });
    if empty {
        Ok(())
    } else {
        Err(StorageError::InvalidConfig(format!(
            "{EMBEDDED_STORAGE_TYPE} storage does not accept storage_credentials"
        )))
    }
}

fn io_error(action: &str, path: &Path, err: &std::io::Error) -> StorageError {
    StorageError::Io(format!("Failed to {action} '{}': {err}", path.display()))
}

/// Run file work on the blocking pool.
pub(crate) async fn run_blocking<T, F>(task: F) -> StorageResult<T>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| StorageError::Io(format!("Task join error: {e}")))?
}

/// Remove the snapshot and its temp files, then the wallet directory once
/// nothing else is left in it. `false` when there was no snapshot to remove.
fn remove_wallet_files(dir: &Path, snapshot: &Path) -> StorageResult<bool> {
    if !snapshot.exists() {
        return Ok(false);
    }
    std::fs::remove_file(snapshot).map_err(|e| io_error("remove", snapshot, &e))?;

    let entries = std::fs::read_dir(dir).map_err(|e| io_error("read directory", dir, &e))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if is_snapshot_temp(snapshot, &path) {
            std::fs::remove_file(&path).map_err(|e| io_error("remove", &path, &e))?;
        }
    }
    if let Err(e) = std::fs::remove_dir(dir) {
        log::warn!("Keeping wallet directory '{}': {e}", dir.display());
    }
    Ok(true)
}

#[async_trait]
impl StorageType for EmbeddedStorageType {
    fn metadata(&self) -> BackendMetadata {
        Self::backend_metadata()
    }

    async fn create_storage(
        &self,
        id: &str,
        config: Option<&Value>,
        credentials: Option<&StorageCredentials>,
        metadata: &[u8],
    ) -> StorageResult<()> {
        let location = Self::locate(id, config, credentials)?;
        let _lifecycle = self.lifecycle.lock().await;

        if self.wallets().contains_key(&location) {
            return Err(StorageError::DuplicateId(format!("wallet '{id}'")));
        }

        let state = WalletState {
            metadata: metadata.to_vec(),
            ..WalletState::default()
        };
        if let (Some(dir), Some(file)) = (location.dir(), location.snapshot_file()) {
            let bytes = state.to_snapshot_bytes()?;
            let wallet_id = id.to_string();
            run_blocking(move || {
                if file.exists() {
                    return Err(StorageError::DuplicateId(format!("wallet '{wallet_id}'")));
                }
                std::fs::create_dir_all(&dir).map_err(|e| io_error("create directory", &dir, &e))?;
                write_snapshot(&file, &bytes)
            })
            .await?;
        }

        let wallet = EmbeddedWallet::new(id, location.snapshot_file(), state);
        self.wallets().insert(location, Arc::new(wallet));
        log::info!("[{id}] Embedded wallet created");
        Ok(())
    }

    async fn open_storage(
        &self,
        id: &str,
        config: Option<&Value>,
        credentials: Option<&StorageCredentials>,
    ) -> StorageResult<Box<dyn StorageBackend>> {
        let location = Self::locate(id, config, credentials)?;
        let _lifecycle = self.lifecycle.lock().await;

        let cached = self.wallets().get(&location).cloned();
        let wallet = if let Some(wallet) = cached {
            wallet
        } else {
            let file = location
                .snapshot_file()
                .ok_or_else(|| StorageError::NotFound(format!("wallet '{id}'")))?;
            let wallet_id = id.to_string();
            let (file, state) = run_blocking(move || {
                if !file.exists() {
                    return Err(StorageError::NotFound(format!("wallet '{wallet_id}'")));
                }
                let state = WalletState::load(&file)?;
                Ok((file, state))
            })
            .await?;
            let wallet = Arc::new(EmbeddedWallet::new(id, Some(file), state));
            self.wallets().insert(location, Arc::clone(&wallet));
            wallet
        };

        log::debug!("[{id}] Embedded wallet opened");
        Ok(Box::new(EmbeddedBackend::new(
            wallet,
            HandleGuard::acquire(&self.open_handles),
        )))
    }

    async fn delete_storage(
        &self,
        id: &str,
        config: Option<&Value>,
        credentials: Option<&StorageCredentials>,
    ) -> StorageResult<()> {
        let location = Self::locate(id, config, credentials)?;
        let _lifecycle = self.lifecycle.lock().await;

        let cached = self.wallets().remove(&location);
        let removed = match (location.dir(), location.snapshot_file()) {
            (Some(dir), Some(snapshot)) => {
                match run_blocking(move || remove_wallet_files(&dir, &snapshot)).await {
                    Ok(removed) => removed,
                    Err(e) => {
                        if let Some(wallet) = cached {
                            self.wallets().insert(location, wallet);
                        }
                        return Err(e);
                    }
                }
            }
            _ => false,
        };
        if cached.is_none() && !removed {
            return Err(StorageError::NotFound(format!("wallet '{id}'")));
        }
        if let Some(wallet) = &cached {
            wallet.mark_deleted();
        }

        log::info!("[{id}] Embedded wallet deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wallet_storage_core::types::StorageRecord;
    use wallet_storage_core::{Query, SearchOptions, StorageCredentials};

    use super::*;

    #[test]
    fn wallet_id_validation() {
        assert!(validate_wallet_id("wallet-1").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b"] {
            assert!(
                matches!(validate_wallet_id(bad), Err(StorageError::InvalidConfig(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn config_rejects_unknown_fields() {
        let res = EmbeddedStorageType::locate("w", Some(&json!({"url": "x"})), None);
        assert!(matches!(res, Err(StorageError::InvalidConfig(_))));
    }

    #[test]
    fn credentials_must_be_empty() {
        let empty = StorageCredentials::new(json!({}));
        assert!(EmbeddedStorageType::locate("w", None, Some(&empty)).is_ok());

        let creds = StorageCredentials::new(json!({"password": "x"}));
        let res = EmbeddedStorageType::locate("w", None, Some(&creds));
        assert!(matches!(res, Err(StorageError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn handles_share_one_wallet() {
        let storage_type = EmbeddedStorageType::new();
        storage_type.create_storage("w", None, None, b"").await.unwrap();

        let a = storage_type.open_storage("w", None, None).await.unwrap();
        let b = storage_type.open_storage("w", None, None).await.unwrap();
        assert_eq!(storage_type.open_handle_count(), 2);

        a.add(&StorageRecord::new("did", "x", b"v".to_vec())).await.unwrap();
        assert_eq!(b.get("did", "x").await.unwrap().value, b"v");

        a.close().await.unwrap();
        assert!(a.get("did", "x").await.is_err());
        drop(b);
        assert_eq!(storage_type.open_handle_count(), 0);
    }

    #[tokio::test]
    async fn file_wallet_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let config = json!({"path": tmp.path()});

        let first = EmbeddedStorageType::new();
        first
            .create_storage("w", Some(&config), None, b"keys")
            .await
            .unwrap();
        let handle = first.open_storage("w", Some(&config), None).await.unwrap();
        handle
            .add(&StorageRecord::new("did", "x", vec![1, 2, 3]).with_tag("~k", "v"))
            .await
            .unwrap();
        handle.close().await.unwrap();

        // A fresh factory only sees what reached the disk.
        let second = EmbeddedStorageType::new();
        let handle = second.open_storage("w", Some(&config), None).await.unwrap();
        assert_eq!(handle.get_metadata().await.unwrap(), b"keys");
        let mut cursor = handle
            .search("did", &Query::equals("~k", "v"), SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(cursor.fetch_next().await.unwrap().unwrap().value, vec![1, 2, 3]);

        let res = second.create_storage("w", Some(&config), None, b"").await;
        assert!(matches!(res, Err(StorageError::DuplicateId(_))));
    }

    #[tokio::test]
    async fn delete_only_removes_wallet_files() {
        let tmp = tempfile::tempdir().unwrap();
        let config = json!({"path": tmp.path()});
        let storage_type = EmbeddedStorageType::new();

        // A directory that never held a wallet is not one.
        let photos = tmp.path().join("photos");
        std::fs::create_dir_all(&photos).unwrap();
        std::fs::write(photos.join("holiday.jpg"), b"jpeg").unwrap();
        assert!(matches!(
            storage_type.delete_storage("photos", Some(&config), None).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(photos.join("holiday.jpg").exists());

        // Foreign files next to a snapshot survive the wallet.
        storage_type
            .create_storage("w", Some(&config), None, b"")
            .await
            .unwrap();
        let wallet_dir = tmp.path().join("w");
        std::fs::write(wallet_dir.join("notes.txt"), b"keep").unwrap();
        std::fs::write(wallet_dir.join("wallet.json.0a1b.tmp"), b"partial").unwrap();

        storage_type.delete_storage("w", Some(&config), None).await.unwrap();
        assert!(!wallet_dir.join(SNAPSHOT_FILE).exists());
        assert!(!wallet_dir.join("wallet.json.0a1b.tmp").exists());
        assert!(wallet_dir.join("notes.txt").exists());
        assert!(matches!(
            EmbeddedStorageType::new()
                .open_storage("w", Some(&config), None)
                .await,
            Err(StorageError::NotFound(_))
        ));

        // An empty wallet directory goes with the snapshot.
        storage_type
            .create_storage("empty", Some(&config), None, b"")
            .await
            .unwrap();
        storage_type
            .delete_storage("empty", Some(&config), None)
            .await
            .unwrap();
        assert!(!tmp.path().join("empty").exists());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn file_writes_do_not_stall_readers_on_one_thread() {
        let tmp = tempfile::tempdir().unwrap();
        let config = json!({"path": tmp.path()});
        let storage_type = EmbeddedStorageType::new();
        storage_type
            .create_storage("w", Some(&config), None, b"")
            .await
            .unwrap();
        let writer = storage_type.open_storage("w", Some(&config), None).await.unwrap();
        let reader = storage_type.open_storage("w", Some(&config), None).await.unwrap();

        let write = async {
            for n in 0..20u8 {
                writer
                    .add(&StorageRecord::new("did", &n.to_string(), vec![n]))
                    .await
                    .unwrap();
            }
        };
        let read = async {
            for _ in 0..20 {
                let _ = reader.get("did", "0").await;
                tokio::task::yield_now().await;
            }
        };
        let both = async {
            tokio::join!(write, read);
        };
        let finished = tokio::time::timeout(std::time::Duration::from_secs(30), both).await;
        assert!(finished.is_ok(), "readers and writers must interleave on one thread");

        let reopened = EmbeddedStorageType::new()
            .open_storage("w", Some(&config), None)
            .await
            .unwrap();
        let mut all = reopened.scan_all().await.unwrap();
        let mut count = 0;
        while all.fetch_next().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 20);
    }

    #[tokio::test]
    async fn delete_invalidates_open_handles() {
        let storage_type = EmbeddedStorageType::new();
        storage_type.create_storage("w", None, None, b"").await.unwrap();
        let handle = storage_type.open_storage("w", None, None).await.unwrap();

        storage_type.delete_storage("w", None, None).await.unwrap();

        assert!(matches!(
            handle.get("did", "x").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage_type.open_storage("w", None, None).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage_type.delete_storage("w", None, None).await,
            Err(StorageError::NotFound(_))
        ));
    }
}
