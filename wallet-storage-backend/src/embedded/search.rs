//! Lazy cursor over an embedded wallet

use std::collections::VecDeque;
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;

use wallet_storage_core::types::StorageRecord;
use wallet_storage_core::{SearchCursor, StorageResult};

use super::query::Predicate;
use super::state::{RecordKey, StoredValue, WalletState};
use super::wallet::EmbeddedWallet;

/// Matching records buffered per read lock.
const PAGE_SIZE: usize = 64;

/// Walks the wallet's ordered key space a page at a time, one read lock per
/// page, resuming after the last buffered key.
pub struct EmbeddedCursor {
    wallet: Arc<EmbeddedWallet>,
    /// `None` scans every type
    record_type: Option<String>,
    predicate: Predicate,
    position: Option<RecordKey>,
    buffer: VecDeque<StorageRecord>,
    exhausted: bool,
    retrieve_records: bool,
    total_count: Option<usize>,
}

impl EmbeddedCursor {
    pub async fn new(
        wallet: Arc<EmbeddedWallet>,
        record_type: Option<String>,
        predicate: Predicate,
        retrieve_records: bool,
        count: bool,
    ) -> StorageResult<Self> {
        let mut cursor = Self {
            wallet,
            record_type,
            predicate,
            position: None,
            buffer: VecDeque::new(),
            exhausted: !retrieve_records,
            retrieve_records,
            total_count: None,
        };
        if count {
            let state = cursor.wallet.read().await?;
            let total = cursor.matching(&state, None).count();
            drop(state);
            cursor.total_count = Some(total);
        }
        Ok(cursor)
    }

    fn matching<'a>(
        &'a self,
        state: &'a WalletState,
        after: Option<&RecordKey>,
    ) -> impl Iterator<Item = (&'a RecordKey, &'a StoredValue)> + 'a {
        let lower = match (after, &self.record_type) {
            (Some(pos), _) => Bound::Excluded(pos.clone()),
            (None, Some(record_type)) => Bound::Included((record_type.clone(), String::new())),
            (None, None) => Bound::Unbounded,
        };
        state
            .records
            .range((lower, Bound::Unbounded))
            .take_while(|((record_type, _), _)| {
                self.record_type
                    .as_ref()
                    .is_none_or(|wanted| wanted == record_type)
            })
            .filter(|(_, stored)| (self.predicate)(&stored.tags))
    }

    async fn load_page(&mut self) -> StorageResult<()> {
        let state = self.wallet.read().await?;
        let page: Vec<(RecordKey, StorageRecord)> = self
            .matching(&state, self.position.as_ref())
            .take(PAGE_SIZE)
            .map(|(key, stored)| (key.clone(), stored.to_record(key)))
            .collect();
        drop(state);

        if page.len() < PAGE_SIZE {
            self.exhausted = true;
        }
        for (key, record) in page {
            self.position = Some(key);
            self.buffer.push_back(record);
        }
        Ok(())
    }
}

#[async_trait]
impl SearchCursor for EmbeddedCursor {
    async fn fetch_next(&mut self) -> StorageResult<Option<StorageRecord>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.load_page().await?;
        }
        Ok(self.buffer.pop_front())
    }

    async fn rewind(&mut self) -> StorageResult<()> {
        self.position = None;
        self.buffer.clear();
        self.exhausted = !self.retrieve_records;
        Ok(())
    }

    fn total_count(&self) -> Option<usize> {
        self.total_count
    }
}

#[cfg(test)]
mod tests {
    use wallet_storage_core::{Query, QueryTranslator, StorageOp};

    use super::super::query::PredicateCompiler;
    use super::*;

    async fn wallet_with(count: usize) -> Arc<EmbeddedWallet> {
        let wallet = Arc::new(EmbeddedWallet::new("w", None, WalletState::default()));
        let ops: Vec<StorageOp> = (0..count)
            .map(|n| {
                let parity = if n % 2 == 0 { "even" } else { "odd" };
                StorageOp::Add(
                    StorageRecord::new("did", &format!("{n:05}"), vec![])
                        .with_tag("~parity", parity)
                        .with_tag("~hundred", if n % 100 == 0 { "yes" } else { "no" }),
                )
            })
            .collect();
        wallet.apply(&ops).await.unwrap();
        wallet
    }

    async fn drain(cursor: &mut EmbeddedCursor) -> Vec<String> {
        let mut ids = Vec::new();
        while let Some(record) = cursor.fetch_next().await.unwrap() {
            ids.push(record.id);
        }
        ids
    }

    #[tokio::test]
    async fn pages_cover_every_match_once_in_order() {
        let wallet = wallet_with(1000).await;
        let predicate = PredicateCompiler.translate(&Query::equals("~parity", "odd"));
        let mut cursor = EmbeddedCursor::new(wallet, Some("did".into()), predicate, true, true)
            .await
            .unwrap();

        let ids = drain(&mut cursor).await;
        assert_eq!(cursor.total_count(), Some(500));
        assert_eq!(ids.len(), 500);
        assert_eq!(ids.first().map(String::as_str), Some("00001"));
        assert_eq!(ids.last().map(String::as_str), Some("00999"));
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));

        cursor.rewind().await.unwrap();
        assert_eq!(drain(&mut cursor).await, ids);
    }

    #[tokio::test]
    async fn sparse_matches_across_pages() {
        let wallet = wallet_with(1000).await;
        let predicate = PredicateCompiler.translate(&Query::equals("~hundred", "yes"));
        let mut cursor = EmbeddedCursor::new(Arc::clone(&wallet), Some("did".into()), predicate, true, false)
            .await
            .unwrap();

        let first = cursor.fetch_next().await.unwrap().unwrap();
        assert_eq!(first.id, "00000");
        // One page holds every sparse match; later writes do not reshuffle it.
        wallet
            .apply(&[StorageOp::delete("did", "00500")])
            .await
            .unwrap();
        let rest = drain(&mut cursor).await;
        assert_eq!(rest.len(), 9);
        assert_eq!(rest.last().map(String::as_str), Some("00900"));
    }
}
