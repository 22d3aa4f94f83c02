//! Relational storage using `SeaORM`.
//!
//! Registered as `postgres_storage`. Every wallet of one database shares the
//! `wallets` / `items` / `tags` schema, rows scoped by wallet id. Schema and
//! (with admin credentials) the database itself are provisioned at create
//! time; open only ever uses the regular account.
//!
//! The same code runs against `sqlite:` URLs, which is how the conformance
//! suite exercises it without a server.

mod backend;
pub mod config;
pub(crate) mod entity;
mod error;
mod migration;
mod query;
mod search;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::sea_query::Query as SqlQuery;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    DbBackend, EntityTrait, FromQueryResult, QueryFilter, Statement, TransactionTrait,
};
use sea_orm_migration::{MigratorTrait, SchemaManager};
use serde_json::Value;

use wallet_storage_core::types::{BackendMetadata, StorageCredentials};
use wallet_storage_core::utils::log_sanitizer::redact_url;
use wallet_storage_core::{StorageBackend, StorageError, StorageResult, StorageType};

use crate::handle::HandleGuard;

pub use backend::RelationalBackend;
pub use config::{ConnectionSettings, Dialect, PostgresConfig, PostgresCredentials};
pub use query::{SqlTranslator, LIKE_ESCAPE};

use entity::{item, tag, wallet};
use error::map_db_err;
use migration::Migrator;

/// Name the relational backend registers under.
pub const POSTGRES_STORAGE_TYPE: &str = "postgres_storage";

/// Relational storage type (factory)
#[derive(Debug, Default)]
pub struct PostgresStorageType {
    open_handles: Arc<AtomicUsize>,
}

impl PostgresStorageType {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connection pools held by handles that are still open.
    #[must_use]
    pub fn open_handle_count(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn backend_metadata() -> BackendMetadata {
        BackendMetadata {
            storage_type: POSTGRES_STORAGE_TYPE.to_string(),
            description: "Postgres-class relational store (also accepts sqlite: URLs)".to_string(),
            config_fields: config::config_fields(),
            credential_fields: config::credential_fields(),
        }
    }
}

#[derive(Debug, FromQueryResult)]
struct DatabaseRow {
    #[allow(dead_code)]
    datname: String,
}

fn validate_wallet_id(id: &str) -> StorageResult<()> {
    if id.trim().is_empty() {
        return Err(StorageError::InvalidConfig(
            "wallet id must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Open a pool; the first connection is established eagerly so bad
/// credentials and unreachable servers fail here.
async fn connect(url: &str, settings: &ConnectionSettings) -> StorageResult<DatabaseConnection> {
    let mut options = ConnectOptions::new(url.to_string());
    // SQLite 单写者：一个连接避免 database is locked
    let max_connections = match settings.dialect {
        Dialect::Postgres => settings.max_connections,
        Dialect::Sqlite => 1,
    };
    options
        .max_connections(max_connections)
        .connect_timeout(settings.connect_timeout)
        .acquire_timeout(settings.connect_timeout)
        .sqlx_logging(false);

    log::debug!("Connecting to {}", redact_url(url));
    Database::connect(options)
        .await
        .map_err(|e| map_db_err("connect to database", &e))
}

async fn close_quietly(db: DatabaseConnection) {
    if let Err(e) = db.close().await {
        log::warn!("Failed to close connection pool: {e}");
    }
}

/// `CREATE DATABASE` through the maintenance database when it is missing.
async fn ensure_database(settings: &ConnectionSettings) -> StorageResult<()> {
    let (Some(maintenance_url), Some(name)) = (&settings.maintenance_url, &settings.database_name)
    else {
        return Ok(());
    };

    let db = connect(maintenance_url, settings).await?;
    let result = async {
        let existing = DatabaseRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT datname FROM pg_database WHERE datname = $1",
            [name.clone().into()],
        ))
        .one(&db)
        .await
        .map_err(|e| map_db_err("look up database", &e))?;

        if existing.is_none() {
            let quoted = name.replace('"', "\"\"");
            db.execute_unprepared(&format!("CREATE DATABASE \"{quoted}\""))
                .await
                .map_err(|e| map_db_err("create database", &e))?;
            log::info!("Created database '{name}'");
        }
        Ok::<(), StorageError>(())
    }
    .await;
    close_quietly(db).await;
    result
}

/// Whether the schema exists and holds a row for `id`.
async fn wallet_exists(db: &DatabaseConnection, id: &str) -> StorageResult<bool> {
    let has_schema = SchemaManager::new(db)
        .has_table("wallets")
        .await
        .map_err(|e| map_db_err("inspect schema", &e))?;
    if !has_schema {
        return Ok(false);
    }
    let row = wallet::Entity::find_by_id(id.to_string())
        .one(db)
        .await
        .map_err(|e| map_db_err("query wallet", &e))?;
    Ok(row.is_some())
}

async fn provision_wallet(db: &DatabaseConnection, id: &str, metadata: &[u8]) -> StorageResult<()> {
    Migrator::up(db, None)
        .await
        .map_err(|e| map_db_err("run migrations", &e))?;

    if wallet_exists(db, id).await? {
        return Err(StorageError::DuplicateId(format!("wallet '{id}'")));
    }

    wallet::Entity::insert(wallet::ActiveModel {
        id: Set(id.to_string()),
        metadata: Set(metadata.to_vec()),
        created_at: Set(chrono::Utc::now().to_rfc3339()),
    })
    .exec(db)
    .await
    .map_err(|e| map_db_err("insert wallet", &e))?;
    Ok(())
}

async fn drop_wallet(db: &DatabaseConnection, id: &str) -> StorageResult<()> {
    if !wallet_exists(db, id).await? {
        return Err(StorageError::NotFound(format!("wallet '{id}'")));
    }

    let txn = db
        .begin()
        .await
        .map_err(|e| map_db_err("begin transaction", &e))?;

    let wallet_items = SqlQuery::select()
        .column(item::Column::Id)
        .from(item::Entity)
        .and_where(item::Column::WalletId.eq(id))
        .to_owned();
    tag::Entity::delete_many()
        .filter(tag::Column::ItemId.in_subquery(wallet_items))
        .exec(&txn)
        .await
        .map_err(|e| map_db_err("delete tags", &e))?;
    item::Entity::delete_many()
        .filter(item::Column::WalletId.eq(id))
        .exec(&txn)
        .await
        .map_err(|e| map_db_err("delete items", &e))?;
    wallet::Entity::delete_by_id(id.to_string())
        .exec(&txn)
        .await
        .map_err(|e| map_db_err("delete wallet", &e))?;

    txn.commit()
        .await
        .map_err(|e| map_db_err("commit transaction", &e))
}

#[async_trait]
impl StorageType for PostgresStorageType {
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
        validate_wallet_id(id)?;
        let settings = ConnectionSettings::resolve(config, credentials)?;
        ensure_database(&settings).await?;

        let db = connect(&settings.admin_url, &settings).await?;
        let result = provision_wallet(&db, id, metadata).await;
        close_quietly(db).await;
        result?;

        log::info!(
            "[{id}] Relational wallet created at {}",
            redact_url(&settings.account_url)
        );
        Ok(())
    }

    async fn open_storage(
        &self,
        id: &str,
        config: Option<&Value>,
        credentials: Option<&StorageCredentials>,
    ) -> StorageResult<Box<dyn StorageBackend>> {
        validate_wallet_id(id)?;
        let settings = ConnectionSettings::resolve(config, credentials)?;

        let db = connect(&settings.account_url, &settings).await?;
        match wallet_exists(&db, id).await {
            Ok(true) => {}
            Ok(false) => {
                close_quietly(db).await;
                return Err(StorageError::NotFound(format!("wallet '{id}'")));
            }
            Err(e) => {
                close_quietly(db).await;
                return Err(e);
            }
        }

        log::debug!("[{id}] Relational wallet opened");
        Ok(Box::new(RelationalBackend::new(
            id,
            db,
            settings.dialect,
            settings.search_batch_size,
            HandleGuard::acquire(&self.open_handles),
        )))
    }

    async fn delete_storage(
        &self,
        id: &str,
        config: Option<&Value>,
        credentials: Option<&StorageCredentials>,
    ) -> StorageResult<()> {
        validate_wallet_id(id)?;
        let settings = ConnectionSettings::resolve(config, credentials)?;

        let db = connect(&settings.admin_url, &settings).await?;
        let result = drop_wallet(&db, id).await;
        close_quietly(db).await;
        result?;

        log::info!("[{id}] Relational wallet deleted");
        Ok(())
    }
}
