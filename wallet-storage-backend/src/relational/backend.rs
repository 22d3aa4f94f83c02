//! Open handle on a relational wallet

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ActiveValue::Set, ColumnTrait, ConnectionTrait,
    DatabaseConnection, DatabaseTransaction, EntityTrait, QueryFilter, TransactionTrait,
};

use wallet_storage_core::traits::closed_handle_error;
use wallet_storage_core::types::{SearchOptions, StorageRecord, Tags};
use wallet_storage_core::{
    Query, QueryTranslator, SearchCursor, StorageBackend, StorageError, StorageOp, StorageResult,
};

use crate::handle::HandleGuard;

use super::config::Dialect;
use super::entity::{item, tag, wallet};
use super::error::{in_transaction, map_db_err, transaction_err};
use super::query::SqlTranslator;
use super::search::{begin_read, end_read, load_records, RelationalCursor};

/// Relational storage handle (one connection pool per handle)
pub struct RelationalBackend {
    wallet_id: String,
    db: Mutex<Option<DatabaseConnection>>,
    dialect: Dialect,
    search_batch_size: u64,
    guard: HandleGuard,
}

impl std::fmt::Debug for RelationalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationalBackend")
            .field("wallet_id", &self.wallet_id)
            .field("dialect", &self.dialect)
            .field("search_batch_size", &self.search_batch_size)
            .finish_non_exhaustive()
    }
}

impl RelationalBackend {
    pub(crate) fn new(
        wallet_id: &str,
        db: DatabaseConnection,
        dialect: Dialect,
        search_batch_size: u64,
        guard: HandleGuard,
    ) -> Self {
        Self {
            wallet_id: wallet_id.to_string(),
            db: Mutex::new(Some(db)),
            dialect,
            search_batch_size,
            guard,
        }
    }

    fn translator(&self) -> SqlTranslator {
        SqlTranslator::new(self.dialect)
    }

    fn db(&self) -> StorageResult<DatabaseConnection> {
        self.db
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(closed_handle_error)
    }

    async fn find_item<C>(&self, db: &C, record_type: &str, id: &str) -> StorageResult<Option<item::Model>>
    where
        C: ConnectionTrait,
    {
        item::Entity::find()
            .filter(item::Column::WalletId.eq(&self.wallet_id))
            .filter(item::Column::RecordType.eq(record_type))
            .filter(item::Column::Name.eq(id))
            .one(db)
            .await
            .map_err(|e| map_db_err("query item", &e))
    }

    async fn require_item(
        &self,
        txn: &DatabaseTransaction,
        record_type: &str,
        id: &str,
    ) -> StorageResult<item::Model> {
        self.find_item(txn, record_type, id)
            .await?
            .ok_or_else(|| StorageError::record_not_found(record_type, id))
    }

    async fn apply_op(&self, txn: &DatabaseTransaction, op: &StorageOp) -> StorageResult<()> {
        match op {
            StorageOp::Add(record) => {
                if self.find_item(txn, &record.record_type, &record.id).await?.is_some() {
                    return Err(StorageError::duplicate_record(&record.record_type, &record.id));
                }
                let inserted = item::Entity::insert(item::ActiveModel {
                    id: NotSet,
                    wallet_id: Set(self.wallet_id.clone()),
                    record_type: Set(record.record_type.clone()),
                    name: Set(record.id.clone()),
                    value: Set(record.value.clone()),
                })
                .exec(txn)
                .await
                .map_err(|e| map_db_err("insert item", &e))?;
                insert_tags(txn, inserted.last_insert_id, &record.tags).await
            }
            StorageOp::UpdateValue {
                record_type,
                id,
                value,
            } => {
                let found = self.require_item(txn, record_type, id).await?;
                let mut active: item::ActiveModel = found.into();
                active.value = Set(value.clone());
                active
                    .update(txn)
                    .await
                    .map_err(|e| map_db_err("update item value", &e))?;
                Ok(())
            }
            StorageOp::UpdateTags {
                record_type,
                id,
                tags,
            } => {
                let found = self.require_item(txn, record_type, id).await?;
                delete_all_tags(txn, found.id).await?;
                insert_tags(txn, found.id, tags).await
            }
            StorageOp::AddTags {
                record_type,
                id,
                tags,
            } => {
                let found = self.require_item(txn, record_type, id).await?;
                upsert_tags(txn, found.id, tags).await
            }
            StorageOp::DeleteTags {
                record_type,
                id,
                names,
            } => {
                let found = self.require_item(txn, record_type, id).await?;
                if !names.is_empty() {
                    tag::Entity::delete_many()
                        .filter(tag::Column::ItemId.eq(found.id))
                        .filter(tag::Column::Name.is_in(names.iter().map(String::as_str)))
                        .exec(txn)
                        .await
                        .map_err(|e| map_db_err("delete tags", &e))?;
                }
                Ok(())
            }
            StorageOp::Delete { record_type, id } => {
                let found = self.require_item(txn, record_type, id).await?;
                delete_all_tags(txn, found.id).await?;
                item::Entity::delete_by_id(found.id)
                    .exec(txn)
                    .await
                    .map_err(|e| map_db_err("delete item", &e))?;
                Ok(())
            }
        }
    }
}

fn tag_models(item_id: i32, tags: &Tags) -> Vec<tag::ActiveModel> {
    tags.iter()
        .map(|(name, value)| tag::ActiveModel {
            item_id: Set(item_id),
            name: Set(name.clone()),
            value: Set(value.clone()),
        })
        .collect()
}

async fn insert_tags(txn: &DatabaseTransaction, item_id: i32, tags: &Tags) -> StorageResult<()> {
    if tags.is_empty() {
        return Ok(());
    }
    tag::Entity::insert_many(tag_models(item_id, tags))
        .exec(txn)
        .await
        .map_err(|e| map_db_err("insert tags", &e))?;
    Ok(())
}

async fn upsert_tags(txn: &DatabaseTransaction, item_id: i32, tags: &Tags) -> StorageResult<()> {
    if tags.is_empty() {
        return Ok(());
    }
    tag::Entity::insert_many(tag_models(item_id, tags))
        .on_conflict(
            OnConflict::columns([tag::Column::ItemId, tag::Column::Name])
                .update_column(tag::Column::Value)
                .to_owned(),
        )
        .exec(txn)
        .await
        .map_err(|e| map_db_err("upsert tags", &e))?;
    Ok(())
}

async fn delete_all_tags(txn: &DatabaseTransaction, item_id: i32) -> StorageResult<()> {
    tag::Entity::delete_many()
        .filter(tag::Column::ItemId.eq(item_id))
        .exec(txn)
        .await
        .map_err(|e| map_db_err("delete tags", &e))?;
    Ok(())
}

#[async_trait]
impl StorageBackend for RelationalBackend {
    async fn get(&self, record_type: &str, id: &str) -> StorageResult<StorageRecord> {
        let db = self.db()?;
        let txn = begin_read(&db).await?;
        let found = self
            .find_item(&txn, record_type, id)
            .await?
            .ok_or_else(|| StorageError::record_not_found(record_type, id))?;
        let record = load_records(&txn, vec![found]).await?.pop();
        end_read(txn).await?;
        record.ok_or_else(|| StorageError::record_not_found(record_type, id))
    }

    async fn apply(&self, ops: &[StorageOp]) -> StorageResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let db = self.db()?;
        let txn = db
            .begin()
            .await
            .map_err(|e| transaction_err("begin transaction", &e))?;

        for op in ops {
            if let Err(e) = self.apply_op(&txn, op).await {
                if let Err(rollback_err) = txn.rollback().await {
                    log::error!(
                        "[{}] Failed to roll back transaction: {rollback_err}",
                        self.wallet_id
                    );
                }
                return Err(in_transaction(e));
            }
        }

        txn.commit()
            .await
            .map_err(|e| transaction_err("commit transaction", &e))?;
        log::debug!("[{}] Committed {} operation(s)", self.wallet_id, ops.len());
        Ok(())
    }

    async fn search(
        &self,
        record_type: &str,
        query: &Query,
        options: SearchOptions,
    ) -> StorageResult<Box<dyn SearchCursor>> {
        let cursor = RelationalCursor::new(
            self.db()?,
            &self.wallet_id,
            Some(record_type),
            self.translator().translate(query),
            self.search_batch_size,
            options.retrieve_records,
            options.retrieve_total_count,
        )
        .await?;
        Ok(Box::new(cursor))
    }

    async fn scan_all(&self) -> StorageResult<Box<dyn SearchCursor>> {
        let cursor = RelationalCursor::new(
            self.db()?,
            &self.wallet_id,
            None,
            self.translator().translate(&Query::all()),
            self.search_batch_size,
            true,
            false,
        )
        .await?;
        Ok(Box::new(cursor))
    }

    async fn get_metadata(&self) -> StorageResult<Vec<u8>> {
        let db = self.db()?;
        wallet::Entity::find_by_id(self.wallet_id.clone())
            .one(&db)
            .await
            .map_err(|e| map_db_err("query wallet", &e))?
            .map(|row| row.metadata)
            .ok_or_else(|| StorageError::NotFound(format!("wallet '{}'", self.wallet_id)))
    }

    async fn set_metadata(&self, metadata: &[u8]) -> StorageResult<()> {
        let db = self.db()?;
        let result = wallet::Entity::update_many()
            .col_expr(wallet::Column::Metadata, Expr::value(metadata.to_vec()))
            .filter(wallet::Column::Id.eq(&self.wallet_id))
            .exec(&db)
            .await
            .map_err(|e| map_db_err("update wallet metadata", &e))?;
        if result.rows_affected == 0 {
            return Err(StorageError::NotFound(format!("wallet '{}'", self.wallet_id)));
        }
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        let db = self
            .db
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.guard.release();
        if let Some(db) = db {
            db.close()
                .await
                .map_err(|e| map_db_err("close connection pool", &e))?;
            log::debug!("[{}] Relational handle closed", self.wallet_id);
        }
        Ok(())
    }
}
