//! Height-deferred state transitions.
//!
//! A change to a logical entity is written as a [`DeferredEntry`] the moment
//! its transaction is indexed, but only becomes the live record once the
//! chain reaches the entry's activation height. Entries are never deleted by
//! activation; they form the audit trail and the source of truth for
//! "value in effect at height X".
//!
//! Resolution walks the history of a key from the newest activation below
//! the target height. A destroy shadows every update that activates at or
//! after it, up to the next create.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use dfindex_core::error::IndexerError;

use crate::database::Database;
use crate::history::Provenance;
use crate::key::encode_height;
use crate::model::{IndexDef, Model, Query};

/// A live model whose changes can be deferred.
///
/// The live record's `id()` is the entry's `unique_key`.
pub trait Deferrable: Model + Clone {
    const DEFERRED_KIND: &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeferredOp {
    Create,
    Update,
    Destroy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredEntry<T> {
    pub id: String,
    pub unique_key: String,
    pub op: DeferredOp,
    /// `false` for changes that took effect in their own block.
    pub scheduled: bool,
    pub activated: bool,
    /// Whether activating this entry changed the live record.
    pub applied: bool,
    pub activation_height: u32,
    /// Provenance of the transaction that made the change.
    pub set: Provenance,
    pub value: Option<T>,
    /// Live record just before this entry was applied.
    pub displaced: Option<T>,
}

impl<T> DeferredEntry<T> {
    fn pending_partition(activated: bool, height: u32) -> String {
        format!("{}{}", u8::from(activated), encode_height(height))
    }

    /// History sort key: activation height, then setting height, in-block
    /// order and txid.
    pub fn history_sort(&self) -> String {
        format!("{}-{}", encode_height(self.activation_height), self.set.sort_key())
    }
}

impl<T: Deferrable> Model for DeferredEntry<T> {
    const KIND: &'static str = T::DEFERRED_KIND;

    fn id(&self) -> String {
        self.id.clone()
    }

    fn indexes() -> Vec<IndexDef<Self>> {
        vec![
            IndexDef::sorted(
                "pending",
                |e| Self::pending_partition(e.activated, e.activation_height),
                |e| format!("{}-{}", e.set.sort_key(), e.unique_key),
            ),
            IndexDef::sorted("history", |e| e.unique_key.clone(), |e| e.history_sort()),
        ]
    }
}

/// Outcome of resolving a key at a height.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    Active(DeferredEntry<T>),
    Destroyed(DeferredEntry<T>),
    Absent,
}

impl<T> Resolution<T> {
    pub fn value(self) -> Option<T> {
        match self {
            Resolution::Active(entry) => entry.value,
            _ => None,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(self, Resolution::Destroyed(_))
    }
}

/// The deferred activation engine for one live model type.
pub struct Deferred<T> {
    db: Database,
    _live: PhantomData<fn() -> T>,
}

fn entry_id(unique_key: &str, set: &Provenance) -> String {
    format!("{unique_key}-{}", set.sort_key())
}

impl<T: Deferrable> Deferred<T> {
    pub fn new(db: &Database) -> Self {
        Self {
            db: db.clone(),
            _live: PhantomData,
        }
    }

    /// Apply a change in its own block.
    pub async fn apply_now(
        &self,
        unique_key: &str,
        op: DeferredOp,
        value: Option<T>,
        set: &Provenance,
    ) -> Result<DeferredEntry<T>, IndexerError> {
        let displaced = self.db.get::<T>(unique_key).await?;
        let entry = DeferredEntry {
            id: entry_id(unique_key, set),
            unique_key: unique_key.to_string(),
            op,
            scheduled: false,
            activated: true,
            applied: true,
            activation_height: set.height(),
            set: set.clone(),
            value,
            displaced,
        };
        self.write_live(unique_key, op, entry.value.as_ref()).await?;
        self.db.put(&entry).await?;
        debug!(kind = T::KIND, key = unique_key, ?op, "change applied");
        Ok(entry)
    }

    /// Inverse of [`Deferred::apply_now`].
    pub async fn revert_now(&self, unique_key: &str, set: &Provenance) -> Result<(), IndexerError> {
        let id = entry_id(unique_key, set);
        let entry = self.db.require::<DeferredEntry<T>>(&id).await?;
        self.restore(unique_key, entry.displaced).await?;
        self.db.delete::<DeferredEntry<T>>(&id).await?;
        Ok(())
    }

    /// Record a change that takes effect at `activation_height`.
    pub async fn schedule(
        &self,
        unique_key: &str,
        op: DeferredOp,
        value: Option<T>,
        activation_height: u32,
        set: &Provenance,
    ) -> Result<DeferredEntry<T>, IndexerError> {
        let entry = DeferredEntry {
            id: entry_id(unique_key, set),
            unique_key: unique_key.to_string(),
            op,
            scheduled: true,
            activated: false,
            applied: false,
            activation_height,
            set: set.clone(),
            value,
            displaced: None,
        };
        self.db.put(&entry).await?;
        debug!(kind = T::KIND, key = unique_key, ?op, activation_height, "change scheduled");
        Ok(entry)
    }

    /// Inverse of [`Deferred::schedule`].
    pub async fn unschedule(&self, unique_key: &str, set: &Provenance) -> Result<(), IndexerError> {
        let id = entry_id(unique_key, set);
        if !self.db.delete::<DeferredEntry<T>>(&id).await? {
            return Err(IndexerError::not_found(T::DEFERRED_KIND, id));
        }
        Ok(())
    }

    /// Activate every entry due at `height` and update the live records.
    ///
    /// Returns the keys that were touched.
    pub async fn activate(&self, height: u32) -> Result<Vec<String>, IndexerError> {
        let due = self.entries_at(false, height).await?;
        let mut touched = Vec::with_capacity(due.len());
        for (key, entries) in due {
            let displaced = self.db.get::<T>(&key).await?;
            let resolution = self.resolve(&key, height.saturating_add(1)).await?;
            let applied = match &resolution {
                Resolution::Active(e) | Resolution::Destroyed(e) => {
                    e.scheduled && e.activation_height == height
                }
                Resolution::Absent => false,
            };
            match resolution {
                Resolution::Active(e) => match e.value {
                    Some(value) => self.db.put(&value).await?,
                    None => return Err(IndexerError::not_found(T::KIND, key)),
                },
                _ => {
                    self.db.delete::<T>(&key).await?;
                }
            }
            for mut entry in entries {
                entry.activated = true;
                entry.applied = applied;
                entry.displaced = displaced.clone();
                self.db.put(&entry).await?;
            }
            info!(kind = T::KIND, key = %key, height, applied, "deferred change activated");
            touched.push(key);
        }
        Ok(touched)
    }

    /// Inverse of [`Deferred::activate`].
    pub async fn deactivate(&self, height: u32) -> Result<Vec<String>, IndexerError> {
        let done = self.entries_at(true, height).await?;
        let mut touched = Vec::with_capacity(done.len());
        for (key, entries) in done {
            let displaced = entries.first().and_then(|e| e.displaced.clone());
            self.restore(&key, displaced).await?;
            for mut entry in entries {
                entry.activated = false;
                entry.applied = false;
                entry.displaced = None;
                self.db.put(&entry).await?;
            }
            debug!(kind = T::KIND, key = %key, height, "deferred change deactivated");
            touched.push(key);
        }
        Ok(touched)
    }

    /// Value in effect for `unique_key` just before `before_height`,
    /// honouring destroy precedence.
    pub async fn resolve(&self, unique_key: &str, before_height: u32) -> Result<Resolution<T>, IndexerError> {
        let mut query = Query::desc(50)
            .partition(unique_key)
            .lt(encode_height(before_height));
        let mut candidate: Option<DeferredEntry<T>> = None;
        loop {
            let page = self.db.query::<DeferredEntry<T>>("history", &query).await?;
            for entry in page.items {
                match entry.op {
                    DeferredOp::Destroy => return Ok(Resolution::Destroyed(entry)),
                    DeferredOp::Create => return Ok(Resolution::Active(candidate.unwrap_or(entry))),
                    DeferredOp::Update => {
                        if candidate.is_none() {
                            candidate = Some(entry);
                        }
                    }
                }
            }
            match page.next {
                Some(cursor) => query.lt = Some(cursor),
                None => break,
            }
        }
        Ok(candidate.map_or(Resolution::Absent, Resolution::Active))
    }

    /// The history entry with the greatest activation height strictly below
    /// `before_height`; ties go to the later setting transaction.
    pub async fn get_last_activated(
        &self,
        unique_key: &str,
        before_height: u32,
    ) -> Result<Option<DeferredEntry<T>>, IndexerError> {
        let query = Query::desc(1)
            .partition(unique_key)
            .lt(encode_height(before_height));
        let page = self.db.query::<DeferredEntry<T>>("history", &query).await?;
        Ok(page.items.into_iter().next())
    }

    /// Scheduled changes for `unique_key` that have not activated yet.
    pub async fn pending(&self, unique_key: &str) -> Result<Vec<DeferredEntry<T>>, IndexerError> {
        let all = self.history(unique_key).await?;
        Ok(all.into_iter().filter(|e| !e.activated).collect())
    }

    /// Full history of `unique_key`, oldest activation first.
    pub async fn history(&self, unique_key: &str) -> Result<Vec<DeferredEntry<T>>, IndexerError> {
        self.db
            .query_all::<DeferredEntry<T>>("history", Query::asc(100).partition(unique_key))
            .await
    }

    /// Scheduled entries at `height` with the given flag, grouped by key.
    async fn entries_at(
        &self,
        activated: bool,
        height: u32,
    ) -> Result<BTreeMap<String, Vec<DeferredEntry<T>>>, IndexerError> {
        let partition = DeferredEntry::<T>::pending_partition(activated, height);
        let entries = self
            .db
            .query_all::<DeferredEntry<T>>("pending", Query::asc(100).partition(partition))
            .await?;
        let mut grouped: BTreeMap<String, Vec<DeferredEntry<T>>> = BTreeMap::new();
        for entry in entries.into_iter().filter(|e| e.scheduled) {
            grouped.entry(entry.unique_key.clone()).or_default().push(entry);
        }
        Ok(grouped)
    }

    async fn write_live(&self, unique_key: &str, op: DeferredOp, value: Option<&T>) -> Result<(), IndexerError> {
        match (op, value) {
            (DeferredOp::Destroy, _) => {
                self.db.delete::<T>(unique_key).await?;
                Ok(())
            }
            (_, Some(value)) => self.db.put(value).await,
            (_, None) => Err(IndexerError::Other(format!(
                "{} '{unique_key}': {op:?} without a value",
                T::KIND
            ))),
        }
    }

    async fn restore(&self, unique_key: &str, displaced: Option<T>) -> Result<(), IndexerError> {
        match displaced {
            Some(previous) => self.db.put(&previous).await,
            None => self.db.delete::<T>(unique_key).await.map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfindex_core::types::BlockStamp;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Scheme {
        id: String,
        rate: i64,
    }

    impl Model for Scheme {
        const KIND: &'static str = "Scheme";

        fn id(&self) -> String {
            self.id.clone()
        }

        fn indexes() -> Vec<IndexDef<Self>> {
            vec![IndexDef::unique("rate", |s| format!("{:016x}-{}", s.rate, s.id))]
        }
    }

    impl Deferrable for Scheme {
        const DEFERRED_KIND: &'static str = "SchemeChange";
    }

    fn at(height: u32, txno: u32) -> Provenance {
        let block = BlockStamp {
            hash: format!("{height:064x}"),
            height,
            time: 1_600_000_000 + height as i64 * 30,
            median_time: 1_600_000_000 + height as i64 * 30,
        };
        Provenance::new(block, txno, format!("{height:04}{txno:04}"))
    }

    fn scheme(rate: i64) -> Option<Scheme> {
        Some(Scheme { id: "s".into(), rate })
    }

    #[tokio::test]
    async fn scheduled_update_resolves_after_activation() {
        let db = Database::memory();
        let engine = Deferred::<Scheme>::new(&db);
        engine.apply_now("s", DeferredOp::Create, scheme(300), &at(100, 1)).await.unwrap();
        engine
            .schedule("s", DeferredOp::Update, scheme(250), 110, &at(102, 1))
            .await
            .unwrap();

        let at_105 = engine.get_last_activated("s", 105).await.unwrap().unwrap();
        assert_eq!(at_105.value.unwrap().rate, 300);

        let at_111 = engine.get_last_activated("s", 111).await.unwrap().unwrap();
        assert_eq!(at_111.value.unwrap().rate, 250);

        assert_eq!(engine.pending("s").await.unwrap().len(), 1);
        assert_eq!(engine.activate(110).await.unwrap(), vec!["s".to_string()]);
        assert_eq!(db.get::<Scheme>("s").await.unwrap().unwrap().rate, 250);
        assert!(engine.pending("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn destroy_shadows_later_update() {
        let db = Database::memory();
        let engine = Deferred::<Scheme>::new(&db);
        engine.apply_now("s", DeferredOp::Create, scheme(300), &at(100, 0)).await.unwrap();
        engine
            .schedule("s", DeferredOp::Update, scheme(200), 111, &at(101, 0))
            .await
            .unwrap();
        engine
            .schedule("s", DeferredOp::Destroy, None, 110, &at(102, 0))
            .await
            .unwrap();

        for h in 103..=112 {
            engine.activate(h).await.unwrap();
        }
        assert!(engine.resolve("s", 112).await.unwrap().is_destroyed());
        assert!(db.get::<Scheme>("s").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn destroy_wins_over_same_height_update_issued_later() {
        let db = Database::memory();
        let engine = Deferred::<Scheme>::new(&db);
        engine.apply_now("s", DeferredOp::Create, scheme(300), &at(100, 0)).await.unwrap();
        engine
            .schedule("s", DeferredOp::Destroy, None, 110, &at(101, 0))
            .await
            .unwrap();
        engine
            .schedule("s", DeferredOp::Update, scheme(150), 110, &at(105, 0))
            .await
            .unwrap();
        engine.activate(110).await.unwrap();
        assert!(db.get::<Scheme>("s").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recreate_after_destroy_is_live() {
        let db = Database::memory();
        let engine = Deferred::<Scheme>::new(&db);
        engine.apply_now("s", DeferredOp::Create, scheme(300), &at(100, 0)).await.unwrap();
        engine.apply_now("s", DeferredOp::Destroy, None, &at(101, 0)).await.unwrap();
        engine.apply_now("s", DeferredOp::Create, scheme(100), &at(102, 0)).await.unwrap();
        let live = engine.resolve("s", 103).await.unwrap().value().unwrap();
        assert_eq!(live.rate, 100);
    }

    #[tokio::test]
    async fn activate_then_deactivate_is_identity() {
        let db = Database::memory();
        let engine = Deferred::<Scheme>::new(&db);
        engine.apply_now("s", DeferredOp::Create, scheme(300), &at(100, 0)).await.unwrap();
        engine
            .schedule("s", DeferredOp::Update, scheme(275), 104, &at(101, 0))
            .await
            .unwrap();
        let before = db.snapshot().await.unwrap();

        engine.activate(104).await.unwrap();
        assert_ne!(db.snapshot().await.unwrap(), before);
        engine.deactivate(104).await.unwrap();
        assert_eq!(db.snapshot().await.unwrap(), before);
    }

    #[tokio::test]
    async fn immediate_and_scheduled_changes_unwind_lifo() {
        let db = Database::memory();
        let engine = Deferred::<Scheme>::new(&db);
        let empty = db.snapshot().await.unwrap();

        engine.apply_now("s", DeferredOp::Create, scheme(300), &at(100, 0)).await.unwrap();
        engine
            .schedule("s", DeferredOp::Destroy, None, 103, &at(101, 2))
            .await
            .unwrap();
        engine.apply_now("s", DeferredOp::Update, scheme(280), &at(102, 0)).await.unwrap();
        engine.activate(103).await.unwrap();
        assert!(db.get::<Scheme>("s").await.unwrap().is_none());

        engine.deactivate(103).await.unwrap();
        assert_eq!(db.get::<Scheme>("s").await.unwrap().unwrap().rate, 280);
        engine.revert_now("s", &at(102, 0)).await.unwrap();
        assert_eq!(db.get::<Scheme>("s").await.unwrap().unwrap().rate, 300);
        engine.unschedule("s", &at(101, 2)).await.unwrap();
        engine.revert_now("s", &at(100, 0)).await.unwrap();
        assert_eq!(db.snapshot().await.unwrap(), empty);
    }

    #[tokio::test]
    async fn nothing_due_is_a_no_op() {
        let db = Database::memory();
        let engine = Deferred::<Scheme>::new(&db);
        assert!(engine.activate(5).await.unwrap().is_empty());
        assert!(matches!(engine.resolve("s", 5).await.unwrap(), Resolution::Absent));
    }
}
