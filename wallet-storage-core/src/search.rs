//! Search result wrapper

use std::fmt;

use futures::stream::{self, Stream};

use crate::error::StorageResult;
use crate::traits::SearchCursor;
use crate::types::StorageRecord;

/// Lazy search over a backend cursor.
pub struct RecordSearch {
    cursor: Box<dyn SearchCursor>,
}

impl RecordSearch {
    #[must_use]
    pub fn new(cursor: Box<dyn SearchCursor>) -> Self {
        Self { cursor }
    }

    /// Next record, `None` once exhausted.
    pub async fn next(&mut self) -> StorageResult<Option<StorageRecord>> {
        self.cursor.fetch_next().await
    }

    /// Up to `count` records; an empty batch means the search is exhausted.
    pub async fn next_batch(&mut self, count: usize) -> StorageResult<Vec<StorageRecord>> {
        let mut batch = Vec::with_capacity(count.min(256));
        while batch.len() < count {
            match self.cursor.fetch_next().await? {
                Some(record) => batch.push(record),
                None => break,
            }
        }
        Ok(batch)
    }

    /// Restart from the first match.
    pub async fn rewind(&mut self) -> StorageResult<()> {
        self.cursor.rewind().await
    }

    /// Match count, when requested through `SearchOptions::retrieve_total_count`.
    #[must_use]
    pub fn total_count(&self) -> Option<usize> {
        self.cursor.total_count()
    }

    /// Drain the remaining records.
    pub async fn collect_all(&mut self) -> StorageResult<Vec<StorageRecord>> {
        let mut records = Vec::new();
        while let Some(record) = self.cursor.fetch_next().await? {
            records.push(record);
        }
        Ok(records)
    }

    /// Remaining records as a stream; stops after the first error.
    pub fn into_stream(self) -> impl Stream<Item = StorageResult<StorageRecord>> + Send {
        stream::try_unfold(self, |mut search| async move {
            Ok(search.next().await?.map(|record| (record, search)))
        })
    }
}

impl fmt::Debug for RecordSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordSearch")
            .field("total_count", &self.total_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;
    use crate::traits::VecSearchCursor;

    fn search(n: usize) -> RecordSearch {
        let records = (0..n)
            .map(|i| StorageRecord::new("did", format!("id{i}"), vec![]))
            .collect();
        RecordSearch::new(Box::new(VecSearchCursor::new(records, Some(n))))
    }

    #[tokio::test]
    async fn batches_until_exhausted() {
        let mut s = search(5);
        assert_eq!(s.next_batch(2).await.unwrap().len(), 2);
        assert_eq!(s.next_batch(2).await.unwrap().len(), 2);
        assert_eq!(s.next_batch(2).await.unwrap().len(), 1);
        assert!(s.next_batch(2).await.unwrap().is_empty());
        assert_eq!(s.total_count(), Some(5));
    }

    #[tokio::test]
    async fn rewind_restarts() {
        let mut s = search(3);
        let first = s.collect_all().await.unwrap();
        assert!(s.next().await.unwrap().is_none());

        s.rewind().await.unwrap();
        assert_eq!(s.collect_all().await.unwrap(), first);
    }

    #[tokio::test]
    async fn stream_yields_everything() {
        let ids: Vec<String> = search(4)
            .into_stream()
            .map_ok(|r| r.id)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(ids, vec!["id0", "id1", "id2", "id3"]);
    }
}
