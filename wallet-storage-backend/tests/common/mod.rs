//! 共享测试工具和辅助函数

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use wallet_storage_backend::{EmbeddedStorageType, PostgresStorageType};
use wallet_storage_core::{
    Storage, StorageRecord, StorageRegistry, StorageResult, WalletConfig, WalletCredentials,
    WalletStorageService, STORAGE_INTERFACE_VERSION,
};

/// Postgres URL for the server-backed tests, e.g. `postgres://postgres:pw@localhost:5432/wallets_test`.
pub const POSTGRES_URL_VAR: &str = "WALLET_STORAGE_TEST_POSTGRES_URL";

/// 跳过测试的宏（当环境变量缺失时）
#[macro_export]
macro_rules! skip_if_no_env {
    ($($var:expr),+) => {
        $(
            if std::env::var($var).is_err() {
                eprintln!("跳过测试: 缺少环境变量 {}", $var);
                return;
            }
        )+
    };
}

/// 断言 `Result` 为 `Ok`，并解包返回内部值（失败则直接让测试失败）。
#[macro_export]
macro_rules! require_ok {
    ($expr:expr $(,)?) => {{
        let res = $expr;
        assert!(res.is_ok(), "expected Ok(..), got {res:?}");
        let Ok(val) = res else {
            return;
        };
        val
    }};
}

/// Backend flavours every conformance test runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    EmbeddedMemory,
    EmbeddedFile,
    RelationalSqlite,
}

impl BackendKind {
    pub const ALL: [Self; 3] = [
        Self::EmbeddedMemory,
        Self::EmbeddedFile,
        Self::RelationalSqlite,
    ];
}

/// One freshly created wallet plus the registry and storage types behind it.
pub struct Fixture {
    pub kind: BackendKind,
    pub service: WalletStorageService,
    pub config: WalletConfig,
    pub credentials: WalletCredentials,
    embedded: Arc<EmbeddedStorageType>,
    relational: Arc<PostgresStorageType>,
    _dir: TempDir,
}

impl Fixture {
    pub async fn new(kind: BackendKind) -> Self {
        Self::with_metadata(kind, b"wallet metadata").await
    }

    pub async fn with_metadata(kind: BackendKind, metadata: &[u8]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let embedded = Arc::new(EmbeddedStorageType::new());
        let relational = Arc::new(PostgresStorageType::new());

        let registry = StorageRegistry::new();
        registry
            .register("default", embedded.clone(), STORAGE_INTERFACE_VERSION)
            .expect("register default");
        registry
            .register("postgres_storage", relational.clone(), STORAGE_INTERFACE_VERSION)
            .expect("register postgres_storage");
        let service = WalletStorageService::new(Arc::new(registry));

        let config = match kind {
            BackendKind::EmbeddedMemory => WalletConfig::new("conformance"),
            BackendKind::EmbeddedFile => WalletConfig::new("conformance")
                .with_storage("default", Some(json!({"path": dir.path()}))),
            BackendKind::RelationalSqlite => WalletConfig::new("conformance").with_storage(
                "postgres_storage",
                Some(sqlite_config(&dir, 2)),
            ),
        };
        let credentials = WalletCredentials::default();

        service
            .create_wallet(&config, &credentials, metadata)
            .await
            .expect("create wallet");

        Self {
            kind,
            service,
            config,
            credentials,
            embedded,
            relational,
            _dir: dir,
        }
    }

    pub async fn open(&self) -> Storage {
        self.service
            .open_wallet(&self.config, &self.credentials)
            .await
            .expect("open wallet")
    }

    /// Handles still holding backend resources.
    pub fn open_handles(&self) -> usize {
        self.embedded.open_handle_count() + self.relational.open_handle_count()
    }
}

/// `sqlite:` config for the relational backend, small pages to exercise paging.
pub fn sqlite_config(dir: &TempDir, search_batch_size: u64) -> Value {
    json!({
        "url": format!("sqlite://{}?mode=rwc", dir.path().join("wallets.db").display()),
        "search_batch_size": search_batch_size,
    })
}

pub fn record(record_type: &str, id: &str, tags: &[(&str, &str)]) -> StorageRecord {
    tags.iter().fold(
        StorageRecord::new(record_type, id, format!("value of {id}").into_bytes()),
        |record, (name, value)| record.with_tag(*name, *value),
    )
}

/// Records shared by the search tests.
pub fn search_dataset() -> Vec<StorageRecord> {
    vec![
        record("cred", "alpha", &[("~name", "Alice"), ("~age", "30"), ("enc", "c1")]),
        record("cred", "beta", &[("~name", "alice"), ("~age", "25"), ("enc", "c2")]),
        record("cred", "gamma", &[("~name", "Bob"), ("~age", "40")]),
        record("cred", "delta", &[("~name", "Bo_b"), ("enc", "c1")]),
        record("cred", "epsilon", &[("~age", "35")]),
        record("cred", "zeta", &[]),
        record("other", "alpha", &[("~name", "Alice")]),
    ]
}

pub async fn insert_all(storage: &Storage, records: &[StorageRecord]) -> StorageResult<()> {
    for record in records {
        storage.add(record).await?;
    }
    Ok(())
}

/// Sorted ids of every `record_type` record matching `query`.
pub async fn search_ids(
    storage: &Storage,
    record_type: &str,
    query: &wallet_storage_core::Query,
) -> StorageResult<Vec<String>> {
    let mut search = storage
        .search(record_type, query, wallet_storage_core::SearchOptions::default())
        .await?;
    let mut ids: Vec<String> = search
        .collect_all()
        .await?
        .into_iter()
        .map(|record| record.id)
        .collect();
    ids.sort();
    Ok(ids)
}

pub fn ids(list: &[&str]) -> Vec<String> {
    let mut ids: Vec<String> = list.iter().map(ToString::to_string).collect();
    ids.sort();
    ids
}

/// WQL queries over [`search_dataset`] with the `cred` ids each must return.
pub fn search_cases() -> Vec<(&'static str, Vec<&'static str>)> {
    vec![
        ("{}", vec!["alpha", "beta", "gamma", "delta", "epsilon", "zeta"]),
        (r#"{"~name": "Alice"}"#, vec!["alpha"]),
        (r#"{"~name": {"$neq": "Alice"}}"#, vec!["beta", "gamma", "delta"]),
        (
            r#"{"$not": {"~name": "Alice"}}"#,
            vec!["beta", "gamma", "delta", "epsilon", "zeta"],
        ),
        (r#"{"~age": {"$gt": "30"}}"#, vec!["gamma", "epsilon"]),
        (r#"{"~age": {"$gte": "30"}}"#, vec!["alpha", "gamma", "epsilon"]),
        (r#"{"~age": {"$lt": "30"}}"#, vec!["beta"]),
        (r#"{"~age": {"$lte": "30"}}"#, vec!["alpha", "beta"]),
        (r#"{"~name": {"$like": "A%"}}"#, vec!["alpha"]),
        (r#"{"~name": {"$like": "%li%"}}"#, vec!["alpha", "beta"]),
        (r#"{"~name": {"$like": "Bo_"}}"#, vec!["gamma"]),
        (r#"{"~name": {"$like": "Bo\\_%"}}"#, vec!["delta"]),
        (r#"{"enc": "c1"}"#, vec!["alpha", "delta"]),
        (r#"{"enc": {"$in": ["c1", "c2"]}}"#, vec!["alpha", "beta", "delta"]),
        (
            r#"{"$or": [{"~name": "Bob"}, {"~age": "35"}]}"#,
            vec!["gamma", "epsilon"],
        ),
        (
            r#"{"$and": [{"enc": "c1"}, {"~name": {"$like": "A%"}}]}"#,
            vec!["alpha"],
        ),
        (r#"{"enc": "c1", "~age": "30"}"#, vec!["alpha"]),
        (
            r#"{"$not": {"$or": [{"enc": "c1"}, {"enc": "c2"}]}}"#,
            vec!["gamma", "epsilon", "zeta"],
        ),
        (r#"{"~missing": "x"}"#, vec![]),
        (r#"{"$not": {}}"#, vec![]),
    ]
}
