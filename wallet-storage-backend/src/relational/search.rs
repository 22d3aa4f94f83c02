//! Keyset-paged search cursor over the `items` table

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use sea_orm::sea_query::Condition;
use sea_orm::{
    AccessMode, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend,
    EntityTrait, IsolationLevel, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select,
    TransactionTrait,
};

use wallet_storage_core::types::{StorageRecord, Tags};
use wallet_storage_core::{SearchCursor, StorageResult};

use super::entity::{item, tag};
use super::error::{map_db_err, transaction_err};

/// Items of one wallet matching `condition`, optionally limited to a type.
pub(crate) fn matching_items(
    wallet_id: &str,
    record_type: Option<&str>,
    condition: Condition,
) -> Select<item::Entity> {
    let mut select = item::Entity::find()
        .filter(item::Column::WalletId.eq(wallet_id))
        .filter(condition);
    if let Some(record_type) = record_type {
        select = select.filter(item::Column::RecordType.eq(record_type));
    }
    select
}

/// Open a read transaction so an item row and its tags come from one snapshot.
///
/// Postgres needs `REPEATABLE READ` for that; a deferred SQLite transaction
/// pins its snapshot at the first read.
pub(crate) async fn begin_read(db: &DatabaseConnection) -> StorageResult<DatabaseTransaction> {
    let txn = match db.get_database_backend() {
        DbBackend::Postgres => {
            db.begin_with_config(Some(IsolationLevel::RepeatableRead), Some(AccessMode::ReadOnly))
                .await
        }
        _ => db.begin().await,
    };
    txn.map_err(|e| transaction_err("begin read transaction", &e))
}

/// Release a read transaction opened by [`begin_read`].
pub(crate) async fn end_read(txn: DatabaseTransaction) -> StorageResult<()> {
    txn.commit()
        .await
        .map_err(|e| transaction_err("end read transaction", &e))
}

/// Attach tags to a page of item rows, keeping row order.
pub(crate) async fn load_records<C>(db: &C, items: Vec<item::Model>) -> StorageResult<Vec<StorageRecord>>
where
    C: ConnectionTrait,
{
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let rows = tag::Entity::find()
        .filter(tag::Column::ItemId.is_in(items.iter().map(|item| item.id)))
        .all(db)
        .await
        .map_err(|e| map_db_err("load tags", &e))?;

    let mut tags_by_item: BTreeMap<i32, Tags> = BTreeMap::new();
    for row in rows {
        tags_by_item
            .entry(row.item_id)
            .or_default()
            .insert(row.name, row.value);
    }

    Ok(items
        .into_iter()
        .map(|item| StorageRecord {
            tags: tags_by_item.remove(&item.id).unwrap_or_default(),
            record_type: item.record_type,
            id: item.name,
            value: item.value,
        })
        .collect())
}

/// Fetches matching items in pages of `batch_size`, resuming after the last
/// item id seen, so rows committed mid-iteration never shift the cursor.
pub struct RelationalCursor {
    db: DatabaseConnection,
    wallet_id: String,
    record_type: Option<String>,
    condition: Condition,
    batch_size: u64,
    retrieve_records: bool,
    last_id: Option<i32>,
    buffer: VecDeque<StorageRecord>,
    exhausted: bool,
    total_count: Option<usize>,
}

impl RelationalCursor {
    pub async fn new(
        db: DatabaseConnection,
        wallet_id: &str,
        record_type: Option<&str>,
        condition: Condition,
        batch_size: u64,
        retrieve_records: bool,
        count: bool,
    ) -> StorageResult<Self> {
        let total_count = if count {
            let total = matching_items(wallet_id, record_type, condition.clone())
                .count(&db)
                .await
                .map_err(|e| map_db_err("count items", &e))?;
            Some(usize::try_from(total).unwrap_or(usize::MAX))
        } else {
            None
        };

        Ok(Self {
            db,
            wallet_id: wallet_id.to_string(),
            record_type: record_type.map(str::to_string),
            condition,
            batch_size,
            retrieve_records,
            last_id: None,
            buffer: VecDeque::new(),
            exhausted: !retrieve_records,
            total_count,
        })
    }

    async fn load_page(&mut self) -> StorageResult<()> {
        let mut select = matching_items(
            &self.wallet_id,
            self.record_type.as_deref(),
            self.condition.clone(),
        );
        if let Some(last_id) = self.last_id {
            select = select.filter(item::Column::Id.gt(last_id));
        }

        let txn = begin_read(&self.db).await?;
        let items = select
            .order_by_asc(item::Column::Id)
            .limit(self.batch_size)
            .all(&txn)
            .await
            .map_err(|e| map_db_err("search items", &e))?;
        let page_len = items.len() as u64;
        let last_id = items.last().map(|last| last.id);

        let records = load_records(&txn, items).await?;
        end_read(txn).await?;

        if page_len < self.batch_size {
            self.exhausted = true;
        }
        if last_id.is_some() {
            self.last_id = last_id;
        }
        log::debug!(
            "[{}] Loaded search page of {} record(s)",
            self.wallet_id,
            records.len()
        );
        self.buffer.extend(records);
        Ok(())
    }
}

#[async_trait]
impl SearchCursor for RelationalCursor {
    async fn fetch_next(&mut self) -> StorageResult<Option<StorageRecord>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.load_page().await?;
        }
        Ok(self.buffer.pop_front())
    }

    async fn rewind(&mut self) -> StorageResult<()> {
        self.last_id = None;
        self.buffer.clear();
        self.exhausted = !self.retrieve_records;
        Ok(())
    }

    fn total_count(&self) -> Option<usize> {
        self.total_count
    }
}
