//! Model mapper over a [`KvStore`].
//!
//! Every model is stored once under its primary key and once more per
//! declared index, each index entry holding the full record so range queries
//! are a single scan. `put` retracts index entries whose key moved since the
//! previous version of the record, so no stale entry outlives its record.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::ops::Bound;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use dfindex_core::error::IndexerError;

use crate::key::raw;
use crate::kv::{prefix_end, KeyRange, KvPair, KvStore, SortOrder, WriteBatch};
use crate::memory::MemoryKv;
use crate::model::{IndexDef, Model, Page, Query};
use crate::staged::StagedKv;

const LOCK_STRIPES: usize = 64;

/// Striped async locks over raw keys. A write holds the stripes of its
/// primary key and of every index entry it touches, taken in ascending
/// stripe order.
struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

impl KeyLocks {
    fn new() -> Self {
        Self {
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.stripes.len()
    }

    fn stripes_of<'k>(&self, keys: impl IntoIterator<Item = &'k Vec<u8>>) -> BTreeSet<usize> {
        keys.into_iter().map(|k| self.stripe(k)).collect()
    }

    async fn lock(&self, stripes: &BTreeSet<usize>) -> Vec<MutexGuard<'_, ()>> {
        let mut guards = Vec::with_capacity(stripes.len());
        for &i in stripes {
            guards.push(self.stripes[i].lock().await);
        }
        guards
    }
}

fn entry_key<M: Model>(def: &IndexDef<M>, record: &M) -> Vec<u8> {
    let (partition, sort) = def.keys(record);
    raw::index_entry(M::KIND, def.name, &partition, sort.as_deref())
}

#[derive(Clone)]
pub struct Database {
    kv: Arc<dyn KvStore>,
    locks: Arc<KeyLocks>,
}

/// A database view whose writes are held back until [`Staged::commit`].
pub struct Staged {
    pub db: Database,
    overlay: Arc<StagedKv>,
}

impl Staged {
    /// Atomically apply every write made through `self.db`.
    pub async fn commit(self) -> Result<usize, IndexerError> {
        self.overlay.commit().await
    }
}

impl Database {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            locks: Arc::new(KeyLocks::new()),
        }
    }

    /// Fresh in-memory database.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryKv::new()))
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    /// Start a staged view over this database.
    pub fn stage(&self) -> Staged {
        let overlay = Arc::new(StagedKv::new(self.kv.clone()));
        Staged {
            db: Database::new(overlay.clone()),
            overlay,
        }
    }

    // ─── Reads ──────────────────────────────────────────────────────────────

    /// Fetch by primary id. A miss is `Ok(None)`.
    pub async fn get<M: Model>(&self, id: &str) -> Result<Option<M>, IndexerError> {
        match self.kv.get(&raw::primary(M::KIND, id)).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Fetch by primary id, failing with `NotFound` on a miss.
    pub async fn require<M: Model>(&self, id: &str) -> Result<M, IndexerError> {
        self.get(id)
            .await?
            .ok_or_else(|| IndexerError::not_found(M::KIND, id))
    }

    /// Point lookup through an index.
    pub async fn get_by<M: Model>(
        &self,
        index: &str,
        partition: &str,
        sort: Option<&str>,
    ) -> Result<Option<M>, IndexerError> {
        let key = raw::index_entry(M::KIND, index, partition, sort);
        match self.kv.get(&key).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Ordered range query over one index.
    pub async fn query<M: Model>(&self, index: &str, query: &Query) -> Result<Page<M>, IndexerError> {
        let def = index_def::<M>(index)?;
        let prefix = match def.sort {
            Some(_) => raw::partition_prefix(
                M::KIND,
                index,
                query.partition.as_deref().unwrap_or_default(),
            ),
            None => raw::index_prefix(M::KIND, index),
        };
        let mut range = KeyRange::prefix(&prefix);
        if def.sort.is_none() {
            if let Some(partition) = &query.partition {
                let exact = with_suffix(&prefix, partition);
                range = KeyRange {
                    start: Bound::Included(exact.clone()),
                    end: Bound::Included(exact),
                };
            }
        }
        apply_bounds(&mut range, &prefix, query);

        let pairs = self.kv.scan(&range, query.order, query.limit).await?;
        page_from(pairs, prefix.len(), query.limit)
    }

    /// Drain every page of `query`, following cursors.
    pub async fn query_all<M: Model>(&self, index: &str, query: Query) -> Result<Vec<M>, IndexerError> {
        let mut query = query;
        if query.limit == 0 {
            query.limit = 200;
        }
        let mut out = Vec::new();
        loop {
            let page = self.query::<M>(index, &query).await?;
            out.extend(page.items);
            match page.next {
                Some(cursor) => {
                    query.gt = None;
                    query.gte = None;
                    query.lt = None;
                    query.lte = None;
                    query = query.after(cursor);
                }
                None => return Ok(out),
            }
        }
    }

    // ─── Writes ─────────────────────────────────────────────────────────────

    /// Write `record` and every index entry derived from it.
    pub async fn put<M: Model>(&self, record: &M) -> Result<(), IndexerError> {
        let id = record.id();
        let primary = raw::primary(M::KIND, &id);
        let value = serde_json::to_vec(record)?;
        let entries: Vec<Vec<u8>> = M::indexes().iter().map(|def| entry_key(def, record)).collect();

        let mut stripes = self.locks.stripes_of(entries.iter().chain([&primary]));
        let (_guards, moved) = loop {
            let guards = self.locks.lock(&stripes).await;
            let previous = self.read_raw::<M>(&primary).await?;
            let moved: Vec<Vec<u8>> = match &previous {
                Some(prev) => M::indexes()
                    .iter()
                    .map(|def| entry_key(def, prev))
                    .filter(|old| !entries.contains(old))
                    .collect(),
                None => Vec::new(),
            };
            let missing = self.locks.stripes_of(&moved);
            if missing.is_subset(&stripes) {
                break (guards, moved);
            }
            drop(guards);
            stripes.extend(missing);
        };

        let mut batch = WriteBatch::new();
        for old in moved {
            if self.entry_owned_by::<M>(&old, &id).await? {
                batch.delete(old);
            }
        }
        for key in entries {
            batch.put(key, value.clone());
        }
        batch.put(primary, value);
        self.kv.write(batch).await?;
        debug!(kind = M::KIND, id = %id, "record stored");
        Ok(())
    }

    /// Remove the record and all of its index entries. Missing ids are a no-op.
    pub async fn delete<M: Model>(&self, id: &str) -> Result<bool, IndexerError> {
        let primary = raw::primary(M::KIND, id);

        let mut stripes = self.locks.stripes_of([&primary]);
        let (_guards, entries) = loop {
            let guards = self.locks.lock(&stripes).await;
            let Some(previous) = self.read_raw::<M>(&primary).await? else {
                return Ok(false);
            };
            let entries: Vec<Vec<u8>> = M::indexes().iter().map(|def| entry_key(def, &previous)).collect();
            let missing = self.locks.stripes_of(&entries);
            if missing.is_subset(&stripes) {
                break (guards, entries);
            }
            drop(guards);
            stripes.extend(missing);
        };

        let mut batch = WriteBatch::new();
        for key in entries {
            if self.entry_owned_by::<M>(&key, id).await? {
                batch.delete(key);
            }
        }
        batch.delete(primary);
        self.kv.write(batch).await?;
        debug!(kind = M::KIND, id, "record deleted");
        Ok(true)
    }

    async fn read_raw<M: Model>(&self, key: &[u8]) -> Result<Option<M>, IndexerError> {
        match self.kv.get(key).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether the index entry at `key` still holds record `id`. A unique
    /// entry another record has since claimed is left alone.
    async fn entry_owned_by<M: Model>(&self, key: &[u8], id: &str) -> Result<bool, IndexerError> {
        Ok(self.read_raw::<M>(key).await?.is_some_and(|r| r.id() == id))
    }

    /// Every raw pair in key order. Used to compare whole-store states.
    pub async fn snapshot(&self) -> Result<Vec<KvPair>, IndexerError> {
        self.kv.scan(&KeyRange::all(), SortOrder::Asc, usize::MAX).await
    }
}

fn decode<M: Model>(bytes: &[u8]) -> Result<M, IndexerError> {
    serde_json::from_slice(bytes).map_err(|e| IndexerError::Codec(format!("{}: {e}", M::KIND)))
}

fn index_def<M: Model>(name: &str) -> Result<IndexDef<M>, IndexerError> {
    M::indexes()
        .into_iter()
        .find(|d| d.name == name)
        .ok_or_else(|| IndexerError::Storage(format!("{} has no index '{name}'", M::KIND)))
}

fn with_suffix(prefix: &[u8], suffix: &str) -> Vec<u8> {
    let mut key = prefix.to_vec();
    key.extend_from_slice(suffix.as_bytes());
    key
}

/// Narrow `range` by the query's bounds, keeping the tighter of each pair.
fn apply_bounds(range: &mut KeyRange, prefix: &[u8], query: &Query) {
    let lower = [
        query.gt.as_ref().map(|k| Bound::Excluded(with_suffix(prefix, k))),
        query.gte.as_ref().map(|k| Bound::Included(with_suffix(prefix, k))),
    ];
    for bound in lower.into_iter().flatten() {
        if tighter_lower(&bound, &range.start) {
            range.start = bound;
        }
    }
    let upper = [
        query.lt.as_ref().map(|k| Bound::Excluded(with_suffix(prefix, k))),
        query.lte.as_ref().map(|k| Bound::Included(with_suffix(prefix, k))),
    ];
    for bound in upper.into_iter().flatten() {
        if tighter_upper(&bound, &range.end) {
            range.end = bound;
        }
    }
    if range.end == Bound::Unbounded {
        if let Some(end) = prefix_end(prefix) {
            range.end = Bound::Excluded(end);
        }
    }
}

fn tighter_lower(candidate: &Bound<Vec<u8>>, current: &Bound<Vec<u8>>) -> bool {
    match (candidate, current) {
        (_, Bound::Unbounded) => true,
        (Bound::Excluded(c), Bound::Included(k)) => c >= k,
        (Bound::Included(c), Bound::Excluded(k)) => c > k,
        (Bound::Included(c), Bound::Included(k)) | (Bound::Excluded(c), Bound::Excluded(k)) => c > k,
        (Bound::Unbounded, _) => false,
    }
}

fn tighter_upper(candidate: &Bound<Vec<u8>>, current: &Bound<Vec<u8>>) -> bool {
    match (candidate, current) {
        (_, Bound::Unbounded) => true,
        (Bound::Excluded(c), Bound::Included(k)) => c <= k,
        (Bound::Included(c), Bound::Excluded(k)) => c < k,
        (Bound::Included(c), Bound::Included(k)) | (Bound::Excluded(c), Bound::Excluded(k)) => c < k,
        (Bound::Unbounded, _) => false,
    }
}

fn page_from<M: Model>(pairs: Vec<KvPair>, prefix_len: usize, limit: usize) -> Result<Page<M>, IndexerError> {
    let full = limit > 0 && pairs.len() == limit;
    let next = if full {
        pairs
            .last()
            .map(|(k, _)| String::from_utf8_lossy(&k[prefix_len..]).into_owned())
    } else {
        None
    };
    let items = pairs
        .iter()
        .map(|(_, v)| decode(v))
        .collect::<Result<Vec<M>, _>>()?;
    Ok(Page { items, next })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::encode_height;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Swap {
        id: String,
        pool: String,
        height: u32,
    }

    impl Model for Swap {
        const KIND: &'static str = "Swap";

        fn id(&self) -> String {
            self.id.clone()
        }

        fn indexes() -> Vec<IndexDef<Self>> {
            vec![
                IndexDef::sorted("pool", |s| s.pool.clone(), |s| format!("{}-{}", encode_height(s.height), s.id)),
                IndexDef::unique("by_id", |s| s.id.clone()),
            ]
        }
    }

    fn swap(id: &str, pool: &str, height: u32) -> Swap {
        Swap { id: id.into(), pool: pool.into(), height }
    }

    async fn seeded() -> Database {
        let db = Database::memory();
        for (i, h) in [10u32, 11, 12, 13].iter().enumerate() {
            db.put(&swap(&format!("s{i}"), "p1", *h)).await.unwrap();
        }
        db.put(&swap("other", "p2", 11)).await.unwrap();
        db
    }

    #[tokio::test]
    async fn get_and_get_by() {
        let db = seeded().await;
        assert_eq!(db.get::<Swap>("s1").await.unwrap().unwrap().height, 11);
        assert!(db.get::<Swap>("missing").await.unwrap().is_none());
        let by = db.get_by::<Swap>("by_id", "s2", None).await.unwrap().unwrap();
        assert_eq!(by.height, 12);
        let sorted = db
            .get_by::<Swap>("pool", "p1", Some(&format!("{}-s3", encode_height(13))))
            .await
            .unwrap();
        assert!(sorted.is_some());
    }

    #[tokio::test]
    async fn require_fails_with_not_found() {
        let db = Database::memory();
        let err = db.require::<Swap>("nope").await.unwrap_err();
        assert!(matches!(err, IndexerError::NotFound { model: "Swap", .. }));
    }

    #[tokio::test]
    async fn query_partition_and_order() {
        let db = seeded().await;
        let page = db.query::<Swap>("pool", &Query::desc(10).partition("p1")).await.unwrap();
        let ids: Vec<_> = page.items.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s3", "s2", "s1", "s0"]);
        assert!(page.next.is_none());
    }

    #[tokio::test]
    async fn pagination_has_no_gap_or_overlap() {
        let db = seeded().await;
        let first = db.query::<Swap>("pool", &Query::asc(2).partition("p1")).await.unwrap();
        assert_eq!(first.items.len(), 2);
        let cursor = first.next.clone().unwrap();

        let second = db
            .query::<Swap>("pool", &Query::asc(2).partition("p1").after(cursor))
            .await
            .unwrap();
        let ids: Vec<_> = second.items.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s2", "s3"]);

        let third = db
            .query::<Swap>("pool", &Query::asc(2).partition("p1").after(second.next.unwrap()))
            .await
            .unwrap();
        assert!(third.is_empty());
        assert!(third.next.is_none());
    }

    #[tokio::test]
    async fn bounds_select_heights() {
        let db = seeded().await;
        let q = Query::asc(10)
            .partition("p1")
            .gte(encode_height(11))
            .lt(encode_height(13));
        let page = db.query::<Swap>("pool", &q).await.unwrap();
        let heights: Vec<_> = page.items.iter().map(|s| s.height).collect();
        assert_eq!(heights, vec![11, 12]);

        let out_of_range = Query::asc(10).partition("p1").gt(encode_height(99));
        assert!(db.query::<Swap>("pool", &out_of_range).await.unwrap().is_empty());

        let inverted = Query::asc(10).partition("p1").gt(encode_height(12)).lt(encode_height(11));
        assert!(db.query::<Swap>("pool", &inverted).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn moved_keys_are_retracted() {
        let db = seeded().await;
        db.put(&swap("s0", "p2", 20)).await.unwrap();

        let p1 = db.query::<Swap>("pool", &Query::asc(10).partition("p1")).await.unwrap();
        assert!(p1.items.iter().all(|s| s.id != "s0"));
        let p2 = db.query::<Swap>("pool", &Query::asc(10).partition("p2")).await.unwrap();
        assert_eq!(p2.items.len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_every_entry() {
        let db = Database::memory();
        let before = db.snapshot().await.unwrap();
        db.put(&swap("x", "p", 1)).await.unwrap();
        db.put(&swap("x", "q", 2)).await.unwrap();
        assert!(db.delete::<Swap>("x").await.unwrap());
        assert!(!db.delete::<Swap>("x").await.unwrap());
        assert_eq!(db.snapshot().await.unwrap(), before);
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Claim {
        id: String,
        slot: String,
    }

    impl Model for Claim {
        const KIND: &'static str = "Claim";

        fn id(&self) -> String {
            self.id.clone()
        }

        fn indexes() -> Vec<IndexDef<Self>> {
            vec![IndexDef::unique("slot", |c| c.slot.clone())]
        }
    }

    fn claim(id: &str, slot: &str) -> Claim {
        Claim { id: id.into(), slot: slot.into() }
    }

    #[tokio::test]
    async fn moving_away_spares_the_new_owner_of_a_unique_entry() {
        let db = Database::memory();
        db.put(&claim("a", "x")).await.unwrap();
        db.put(&claim("b", "x")).await.unwrap();

        db.put(&claim("a", "y")).await.unwrap();
        assert_eq!(db.get_by::<Claim>("slot", "x", None).await.unwrap(), Some(claim("b", "x")));

        assert!(db.delete::<Claim>("a").await.unwrap());
        assert_eq!(db.get_by::<Claim>("slot", "x", None).await.unwrap(), Some(claim("b", "x")));
        assert!(db.get_by::<Claim>("slot", "y", None).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_on_one_entry_leave_no_stale_owner() {
        let db = Database::memory();
        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let db = db.clone();
                tokio::spawn(async move {
                    let id = format!("w{i}");
                    db.put(&claim(&id, "shared")).await?;
                    db.put(&claim(&id, &format!("own{i}"))).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert!(db.get_by::<Claim>("slot", "shared", None).await.unwrap().is_none());
        for i in 0..16 {
            let owned = db.get_by::<Claim>("slot", &format!("own{i}"), None).await.unwrap();
            assert_eq!(owned.map(|c| c.id), Some(format!("w{i}")));
        }
    }

    #[tokio::test]
    async fn unknown_index_is_a_storage_error() {
        let db = Database::memory();
        let err = db.query::<Swap>("nope", &Query::asc(1)).await.unwrap_err();
        assert!(matches!(err, IndexerError::Storage(_)));
    }

    #[tokio::test]
    async fn unique_index_lists_partitions_in_order() {
        let db = seeded().await;
        let all = db.query_all::<Swap>("by_id", Query::asc(2)).await.unwrap();
        let ids: Vec<_> = all.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["other", "s0", "s1", "s2", "s3"]);
    }

    #[tokio::test]
    async fn staged_writes_commit_atomically() {
        let db = Database::memory();
        let staged = db.stage();
        staged.db.put(&swap("a", "p", 1)).await.unwrap();
        assert!(db.get::<Swap>("a").await.unwrap().is_none());
        assert!(staged.db.get::<Swap>("a").await.unwrap().is_some());
        staged.commit().await.unwrap();
        assert!(db.get::<Swap>("a").await.unwrap().is_some());
    }
}
