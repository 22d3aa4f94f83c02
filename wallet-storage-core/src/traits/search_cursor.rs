//! Search cursor Trait

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::types::StorageRecord;

/// Lazy, finite, restartable sequence of search results.
#[async_trait]
pub trait SearchCursor: Send {
    /// Next matching record, `None` once exhausted.
    async fn fetch_next(&mut self) -> StorageResult<Option<StorageRecord>>;

    /// Restart the sequence from the first match.
    async fn rewind(&mut self) -> StorageResult<()>;

    /// Number of matches, when it was requested through `SearchOptions`.
    fn total_count(&self) -> Option<usize>;
}

/// Cursor over an already materialized result set.
#[derive(Debug, Clone, Default)]
pub struct VecSearchCursor {
    records: Vec<StorageRecord>,
    pending: VecDeque<StorageRecord>,
    total_count: Option<usize>,
}

impl VecSearchCursor {
    #[must_use]
    pub fn new(records: Vec<StorageRecord>, total_count: Option<usize>) -> Self {
        Self {
            pending: records.iter().cloned().collect(),
            records,
            total_count,
        }
    }
}

#[async_trait]
impl SearchCursor for VecSearchCursor {
    async fn fetch_next(&mut self) -> StorageResult<Option<StorageRecord>> {
        Ok(self.pending.pop_front())
    }

    async fn rewind(&mut self) -> StorageResult<()> {
        self.pending = self.records.iter().cloned().collect();
        Ok(())
    }

    fn total_count(&self) -> Option<usize> {
        self.total_count
    }
}
