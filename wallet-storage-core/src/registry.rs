//! Plugin registry
//!
//! Process-wide table mapping storage type names to backend factories.
//! Registration is rare and resolution frequent, so both go through a single
//! `RwLock`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::traits::StorageType;
use crate::types::BackendMetadata;

/// Version of the storage capability interface a backend was built against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InterfaceVersion {
    pub major: u16,
    pub minor: u16,
}

impl InterfaceVersion {
    #[must_use]
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// A backend is usable when it speaks the same major version and does not
    /// rely on a newer minor revision than the core provides.
    #[must_use]
    pub fn is_compatible_with(&self, core: &Self) -> bool {
        self.major == core.major && self.minor <= core.minor
    }
}

impl fmt::Display for InterfaceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Interface version implemented by this core.
pub const STORAGE_INTERFACE_VERSION: InterfaceVersion = InterfaceVersion::new(1, 0);

/// Entry point a backend module exposes to the host.
///
/// Must call [`StorageRegistry::register`] before returning `Ok`.
pub type PluginInitializer = fn(&StorageRegistry) -> StorageResult<()>;

#[derive(Clone)]
struct Registration {
    factory: Arc<dyn StorageType>,
    version: InterfaceVersion,
}

static GLOBAL_REGISTRY: LazyLock<StorageRegistry> = LazyLock::new(StorageRegistry::new);

/// Storage type registry
pub struct StorageRegistry {
    entries: RwLock<HashMap<String, Registration>>,
}

impl StorageRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Process-wide registry, created on first use.
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL_REGISTRY
    }

    /// Register a backend factory under `name`.
    ///
    /// # Errors
    /// `DuplicateRegistration` when the name is taken, whatever version either
    /// side carries; otherwise `VersionMismatch` when `version` is
    /// incompatible with [`STORAGE_INTERFACE_VERSION`].
    pub fn register(
        &self,
        name: &str,
        factory: Arc<dyn StorageType>,
        version: InterfaceVersion,
    ) -> StorageResult<()> {
        if name.is_empty() {
            return Err(StorageError::InvalidConfig(
                "storage type name must not be empty".to_string(),
            ));
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // A taken name wins over a version check: the first registration stays.
        if let Some(existing) = entries.get(name) {
            log::warn!(
                "Storage type '{name}' already registered (interface {}), rejecting {version}",
                existing.version
            );
            return Err(StorageError::DuplicateRegistration(name.to_string()));
        }
        if !version.is_compatible_with(&STORAGE_INTERFACE_VERSION) {
            log::warn!(
                "Rejected storage type '{name}': interface {version}, core {STORAGE_INTERFACE_VERSION}"
            );
            return Err(StorageError::VersionMismatch {
                storage_type: name.to_string(),
                expected: STORAGE_INTERFACE_VERSION,
                found: version,
            });
        }
        entries.insert(name.to_string(), Registration { factory, version });
        drop(entries);

        log::info!("Registered storage type '{name}' (interface {version})");
        Ok(())
    }

    /// Factory registered under `name`.
    pub fn resolve(&self, name: &str) -> StorageResult<Arc<dyn StorageType>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|entry| Arc::clone(&entry.factory))
            .ok_or_else(|| StorageError::UnknownStorageType(name.to_string()))
    }

    /// Remove a registration; returns whether it existed.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some();
        if removed {
            log::info!("Unregistered storage type '{name}'");
        }
        removed
    }

    /// Interface version a registered type was built against.
    #[must_use]
    pub fn version_of(&self, name: &str) -> Option<InterfaceVersion> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|entry| entry.version)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn registered_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Metadata of every registered backend, sorted by name.
    #[must_use]
    pub fn metadata(&self) -> Vec<BackendMetadata> {
        let factories: Vec<(String, Arc<dyn StorageType>)> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, entry)| (name.clone(), Arc::clone(&entry.factory)))
            .collect();

        let mut metadata: Vec<BackendMetadata> = factories
            .into_iter()
            .map(|(name, factory)| {
                let mut meta = factory.metadata();
                meta.storage_type = name;
                meta
            })
            .collect();
        metadata.sort_by(|a, b| a.storage_type.cmp(&b.storage_type));
        metadata
    }

    /// Run a backend module's initializer.
    ///
    /// # Errors
    /// Whatever the initializer returns, or `PluginInit` when it returned
    /// successfully without registering anything new.
    pub fn load_plugin(&self, plugin: &str, init: PluginInitializer) -> StorageResult<()> {
        let before = self.len();
        log::debug!("Loading storage plugin '{plugin}'");

        if let Err(e) = init(self) {
            if e.is_expected() {
                log::warn!("Storage plugin '{plugin}' failed to initialize: {e}");
            } else {
                log::error!("Storage plugin '{plugin}' failed to initialize: {e}");
            }
            return Err(e);
        }

        if self.len() <= before {
            log::error!("Storage plugin '{plugin}' returned without registering a storage type");
            return Err(StorageError::PluginInit(format!(
                "plugin '{plugin}' did not register a storage type"
            )));
        }
        Ok(())
    }

    /// Drop every registration (process teardown).
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let count = entries.len();
        entries.clear();
        drop(entries);
        log::info!("Cleared storage registry ({count} entries)");
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StorageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StorageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageRegistry")
            .field("types", &self.registered_types())
            .finish()
    }
}
