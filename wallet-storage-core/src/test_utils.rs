//! Test helpers
//!
//! Mock backend and storage type with a live-handle counter and injectable
//! failures.

#![allow(clippy::unwrap_used)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{StorageError, StorageResult};
use crate::query::Query;
use crate::traits::{closed_handle_error, SearchCursor, StorageBackend, StorageType, VecSearchCursor};
use crate::transaction::StorageOp;
use crate::types::{
    BackendField, BackendMetadata, SearchOptions, StorageCredentials, StorageRecord, Tags,
};

type RecordMap = BTreeMap<(String, String), StorageRecord>;

#[derive(Default)]
struct MockWallet {
    records: Mutex<RecordMap>,
    metadata: Mutex<Vec<u8>>,
}

// ===== MockBackend =====

#[derive(Clone)]
pub struct MockBackend {
    wallet: Arc<MockWallet>,
    closed: Arc<AtomicBool>,
    apply_calls: Arc<AtomicUsize>,
    /// If Some, the next `apply` fails with this error
    fail_next: Arc<Mutex<Option<StorageError>>>,
    open_handles: Option<Arc<AtomicUsize>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::for_wallet(Arc::new(MockWallet::default()), None)
    }

    fn for_wallet(wallet: Arc<MockWallet>, open_handles: Option<Arc<AtomicUsize>>) -> Self {
        if let Some(counter) = &open_handles {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Self {
            wallet,
            closed: Arc::new(AtomicBool::new(false)),
            apply_calls: Arc::new(AtomicUsize::new(0)),
            fail_next: Arc::new(Mutex::new(None)),
            open_handles,
        }
    }

    /// Another handle onto the same state, flags and counters.
    pub fn shared_handle(&self) -> Self {
        self.clone()
    }

    pub fn fail_next_apply(&self, err: StorageError) {
        *self.fail_next.lock().unwrap() = Some(err);
    }

    pub fn record_count(&self) -> usize {
        self.wallet.records.lock().unwrap().len()
    }

    pub fn apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.is_closed() {
            Err(closed_handle_error())
        } else {
            Ok(())
        }
    }
}

fn apply_one(records: &mut RecordMap, op: &StorageOp) -> StorageResult<()> {
    let key = (op.record_type().to_string(), op.id().to_string());
    if let StorageOp::Add(record) = op {
        if records.contains_key(&key) {
            return Err(StorageError::duplicate_record(&key.0, &key.1));
        }
        records.insert(key, record.clone());
        return Ok(());
    }

    let Some(existing) = records.get_mut(&key) else {
        return Err(StorageError::record_not_found(&key.0, &key.1));
    };
    match op {
        StorageOp::UpdateValue { value, .. } => existing.value.clone_from(value),
        StorageOp::UpdateTags { tags, .. } => existing.tags.clone_from(tags),
        StorageOp::AddTags { tags, .. } => existing.tags.extend(tags.clone()),
        StorageOp::DeleteTags { names, .. } => {
            for name in names {
                existing.tags.remove(name);
            }
        }
        StorageOp::Delete { .. } => {
            records.remove(&key);
        }
        StorageOp::Add(_) => unreachable!(),
    }
    Ok(())
}

fn matches(query: &Query, tags: &Tags) -> bool {
    let tag = |name: &crate::types::TagName| tags.get(&name.storage_key());
    match query {
        Query::And(children) => children.iter().all(|q| matches(q, tags)),
        Query::Or(children) => children.iter().any(|q| matches(q, tags)),
        Query::Not(child) => !matches(child, tags),
        Query::Eq(name, v) => tag(name) == Some(v),
        Query::Neq(name, v) => tag(name).is_some_and(|t| t != v),
        Query::Gt(name, v) => tag(name).is_some_and(|t| t > v),
        Query::Gte(name, v) => tag(name).is_some_and(|t| t >= v),
        Query::Lt(name, v) => tag(name).is_some_and(|t| t < v),
        Query::Lte(name, v) => tag(name).is_some_and(|t| t <= v),
        Query::In(name, values) => tag(name).is_some_and(|t| values.contains(t)),
        Query::Like(..) => unimplemented!("LIKE is not used by core tests"),
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    async fn get(&self, record_type: &str, id: &str) -> StorageResult<StorageRecord> {
        self.ensure_open()?;
        self.wallet
            .records
            .lock()
            .unwrap()
            .get(&(record_type.to_string(), id.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::record_not_found(record_type, id))
    }

    async fn apply(&self, ops: &[StorageOp]) -> StorageResult<()> {
        self.ensure_open()?;
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fail_next.lock().unwrap().take() {
            return Err(err);
        }

        let mut records = self.wallet.records.lock().unwrap();
        let mut working = records.clone();
        for op in ops {
            apply_one(&mut working, op)?;
        }
        *records = working;
        Ok(())
    }

    async fn search(
        &self,
        record_type: &str,
        query: &Query,
        options: SearchOptions,
    ) -> StorageResult<Box<dyn SearchCursor>> {
        self.ensure_open()?;
        let found: Vec<StorageRecord> = self
            .wallet
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.record_type == record_type && matches(query, &r.tags))
            .cloned()
            .collect();
        let total = options.retrieve_total_count.then_some(found.len());
        let records = if options.retrieve_records { found } else { Vec::new() };
        Ok(Box::new(VecSearchCursor::new(records, total)))
    }

    async fn scan_all(&self) -> StorageResult<Box<dyn SearchCursor>> {
        self.ensure_open()?;
        let all = self.wallet.records.lock().unwrap().values().cloned().collect();
        Ok(Box::new(VecSearchCursor::new(all, None)))
    }

    async fn get_metadata(&self) -> StorageResult<Vec<u8>> {
        self.ensure_open()?;
        Ok(self.wallet.metadata.lock().unwrap().clone())
    }

    async fn set_metadata(&self, metadata: &[u8]) -> StorageResult<()> {
        self.ensure_open()?;
        *self.wallet.metadata.lock().unwrap() = metadata.to_vec();
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Some(counter) = &self.open_handles {
                counter.fetch_sub(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}

// ===== MockStorageType =====

pub struct MockStorageType {
    wallets: Mutex<HashMap<String, Arc<MockWallet>>>,
    /// If Some, open/create reject any other `password` credential
    expected_password: Option<String>,
    open_handles: Arc<AtomicUsize>,
}

impl MockStorageType {
    pub fn new() -> Self {
        Self {
            wallets: Mutex::new(HashMap::new()),
            expected_password: None,
            open_handles: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_password(password: &str) -> Self {
        Self {
            expected_password: Some(password.to_string()),
            ..Self::new()
        }
    }

    /// Handles opened and not yet closed
    pub fn open_handle_count(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    fn check_credentials(&self, credentials: Option<&StorageCredentials>) -> StorageResult<()> {
        let Some(expected) = &self.expected_password else {
            return Ok(());
        };
        let supplied = credentials
            .and_then(|c| c.expose().get("password"))
            .and_then(Value::as_str);
        if supplied == Some(expected.as_str()) {
            Ok(())
        } else {
            Err(StorageError::Credentials(
                "password authentication failed".to_string(),
            ))
        }
    }
}

#[async_trait]
impl StorageType for MockStorageType {
    fn metadata(&self) -> BackendMetadata {
        BackendMetadata {
            storage_type: "mock".to_string(),
            description: "In-process mock".to_string(),
            config_fields: Vec::new(),
            credential_fields: vec![BackendField::new("password", false, "Password").secret()],
        }
    }

    async fn create_storage(
        &self,
        id: &str,
        _config: Option<&Value>,
        credentials: Option<&StorageCredentials>,
        metadata: &[u8],
    ) -> StorageResult<()> {
        self.check_credentials(credentials)?;
        let mut wallets = self.wallets.lock().unwrap();
        if wallets.contains_key(id) {
            return Err(StorageError::DuplicateId(format!("wallet '{id}'")));
        }
        let wallet = MockWallet {
            metadata: Mutex::new(metadata.to_vec()),
            ..MockWallet::default()
        };
        wallets.insert(id.to_string(), Arc::new(wallet));
        Ok(())
    }

    async fn open_storage(
        &self,
        id: &str,
        _config: Option<&Value>,
        credentials: Option<&StorageCredentials>,
    ) -> StorageResult<Box<dyn StorageBackend>> {
        self.check_credentials(credentials)?;
        let wallet = self
            .wallets
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("wallet '{id}'")))?;
        Ok(Box::new(MockBackend::for_wallet(
            wallet,
            Some(Arc::clone(&self.open_handles)),
        )))
    }

    async fn delete_storage(
        &self,
        id: &str,
        _config: Option<&Value>,
        credentials: Option<&StorageCredentials>,
    ) -> StorageResult<()> {
        self.check_credentials(credentials)?;
        self.wallets
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(format!("wallet '{id}'")))
    }
}
