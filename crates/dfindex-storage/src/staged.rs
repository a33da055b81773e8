//! Per-block write overlay.
//!
//! Indexers of one block write into a [`StagedKv`]; reads see those writes
//! layered over the base store. `commit` flushes everything as one atomic
//! batch, and dropping the overlay discards it, so a failed block leaves the
//! base store untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use dfindex_core::error::IndexerError;

use crate::kv::{KeyRange, KvPair, KvStore, SortOrder, WriteBatch, WriteOp};

pub struct StagedKv {
    base: Arc<dyn KvStore>,
    /// `None` marks a staged delete.
    staged: Mutex<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl StagedKv {
    pub fn new(base: Arc<dyn KvStore>) -> Self {
        Self {
            base,
            staged: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of staged writes.
    pub async fn pending(&self) -> usize {
        self.staged.lock().await.len()
    }

    /// Flush all staged writes to the base store atomically.
    pub async fn commit(&self) -> Result<usize, IndexerError> {
        let mut staged = self.staged.lock().await;
        let mut batch = WriteBatch::new();
        for (key, value) in staged.iter() {
            match value {
                Some(v) => batch.put(key.clone(), v.clone()),
                None => batch.delete(key.clone()),
            }
        }
        let written = batch.len();
        self.base.write(batch).await?;
        staged.clear();
        Ok(written)
    }
}

#[async_trait]
impl KvStore for StagedKv {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, IndexerError> {
        if let Some(value) = self.staged.lock().await.get(key) {
            return Ok(value.clone());
        }
        self.base.get(key).await
    }

    async fn scan(
        &self,
        range: &KeyRange,
        order: SortOrder,
        limit: usize,
    ) -> Result<Vec<KvPair>, IndexerError> {
        if limit == 0 || range.is_empty() {
            return Ok(vec![]);
        }
        let staged = self.staged.lock().await;
        let overlay: Vec<_> = staged
            .range::<Vec<u8>, _>((range.start.clone(), range.end.clone()))
            .collect();

        // Each staged delete can hide at most one base row, so over-fetching by
        // the overlay size guarantees `limit` surviving rows when they exist.
        let fetched = self
            .base
            .scan(range, order, limit.saturating_add(overlay.len()))
            .await?;
        let base_exhausted = fetched.len() < limit.saturating_add(overlay.len());
        let boundary = fetched.last().map(|(k, _)| k.clone());

        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = fetched.into_iter().collect();
        for (key, value) in overlay {
            // Staged keys beyond the last fetched base key are only safe to
            // merge when the base scan was exhaustive.
            let within = base_exhausted
                || boundary.as_ref().map_or(true, |b| match order {
                    SortOrder::Asc => key <= b,
                    SortOrder::Desc => key >= b,
                });
            if !within {
                continue;
            }
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        let pairs = match order {
            SortOrder::Asc => merged.into_iter().take(limit).collect(),
            SortOrder::Desc => merged.into_iter().rev().take(limit).collect(),
        };
        Ok(pairs)
    }

    async fn write(&self, batch: WriteBatch) -> Result<(), IndexerError> {
        let mut staged = self.staged.lock().await;
        for op in batch.into_ops() {
            match op {
                WriteOp::Put(k, v) => {
                    staged.insert(k, Some(v));
                }
                WriteOp::Delete(k) => {
                    staged.insert(k, None);
                }
            }
        }
        Ok(())
    }
}
