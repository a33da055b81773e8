//! In-memory storage backend.
//!
//! A `BTreeMap` behind an async `RwLock`. Useful for tests and short-lived
//! indexers that don't need persistence. All data is lost on exit.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use dfindex_core::error::IndexerError;

use crate::kv::{KeyRange, KvPair, KvStore, SortOrder, WriteBatch, WriteOp};

#[derive(Default)]
pub struct MemoryKv {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys stored.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    /// Copy of the whole keyspace, for state comparisons in tests and tooling.
    pub async fn snapshot(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        self.data.read().await.clone()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, IndexerError> {
        Ok(self.data.read().await.get(key).cloned())
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
        let data = self.data.read().await;
        let iter = data.range::<Vec<u8>, _>((range.start.clone(), range.end.clone()));
        let pairs = match order {
            SortOrder::Asc => iter
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            SortOrder::Desc => iter
                .rev()
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        Ok(pairs)
    }

    async fn write(&self, batch: WriteBatch) -> Result<(), IndexerError> {
        let mut data = self.data.write().await;
        for op in batch.into_ops() {
            match op {
                WriteOp::Put(k, v) => {
                    data.insert(k, v);
                }
                WriteOp::Delete(k) => {
                    data.remove(&k);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::Bound;

    async fn seeded() -> MemoryKv {
        let kv = MemoryKv::new();
        for k in ["a1", "a2", "a3", "b1"] {
            kv.put(k.as_bytes(), k.as_bytes()).await.unwrap();
        }
        kv
    }

    #[tokio::test]
    async fn scan_prefix_both_directions() {
        let kv = seeded().await;
        let asc = kv.scan(&KeyRange::prefix(b"a"), SortOrder::Asc, 10).await.unwrap();
        let keys: Vec<_> = asc.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"a1".to_vec(), b"a2".to_vec(), b"a3".to_vec()]);

        let desc = kv.scan(&KeyRange::prefix(b"a"), SortOrder::Desc, 2).await.unwrap();
        assert_eq!(desc[0].0, b"a3".to_vec());
        assert_eq!(desc[1].0, b"a2".to_vec());
    }

    #[tokio::test]
    async fn inverted_range_is_empty_not_error() {
        let kv = seeded().await;
        let range = KeyRange {
            start: Bound::Included(b"b".to_vec()),
            end: Bound::Excluded(b"a".to_vec()),
        };
        assert!(kv.scan(&range, SortOrder::Asc, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_applies_in_order() {
        let kv = MemoryKv::new();
        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"1".to_vec());
        batch.delete(b"k".to_vec());
        batch.put(b"j".to_vec(), b"2".to_vec());
        kv.write(batch).await.unwrap();
        assert!(kv.get(b"k").await.unwrap().is_none());
        assert_eq!(kv.get(b"j").await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(kv.len().await, 1);
    }
}
