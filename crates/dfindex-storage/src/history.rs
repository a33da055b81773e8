//! Append-only versions of a live record.
//!
//! A versioned model keeps its current state as an ordinary record plus one
//! [`History`] row per transaction that touched it. Each version keeps the
//! live state it replaced, so reverting a transaction deletes its version and
//! puts that state back; the live record is never recomputed from chain data.

use serde::{Deserialize, Serialize};

use dfindex_core::error::IndexerError;
use dfindex_core::types::BlockStamp;

use crate::database::Database;
use crate::key::{encode_height, height_sort_key};
use crate::model::{IndexDef, Model, Query};

/// Where a change came from: block, in-block order and transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub block: BlockStamp,
    pub txno: u32,
    pub txid: String,
}

impl Provenance {
    pub fn new(block: BlockStamp, txno: u32, txid: impl Into<String>) -> Self {
        Self {
            block,
            txno,
            txid: txid.into(),
        }
    }

    pub fn height(&self) -> u32 {
        self.block.height
    }

    /// `{height}-{txno}-{txid}`.
    pub fn sort_key(&self) -> String {
        height_sort_key(self.block.height, self.txno, &self.txid)
    }
}

/// A model whose changes are kept as [`History`] versions.
pub trait Versioned: Model + Clone {
    const HISTORY_KIND: &'static str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History<T> {
    pub id: String,
    pub subject: String,
    pub sort: String,
    pub block: BlockStamp,
    pub txid: String,
    /// `None` when this version removed the live record.
    pub state: Option<T>,
    /// Live state this version replaced.
    pub previous: Option<T>,
}

impl<T: Versioned> Model for History<T> {
    const KIND: &'static str = T::HISTORY_KIND;

    fn id(&self) -> String {
        self.id.clone()
    }

    fn indexes() -> Vec<IndexDef<Self>> {
        vec![IndexDef::sorted("subject", |h| h.subject.clone(), |h| h.sort.clone())]
    }
}

fn version_id(subject: &str, sort: &str) -> String {
    format!("{subject}-{sort}")
}

impl<T: Versioned> History<T> {
    /// Store a new version of `subject` and make it the live state.
    ///
    /// `state.id()` must equal `subject`.
    pub async fn record(
        db: &Database,
        subject: &str,
        state: Option<T>,
        at: &Provenance,
    ) -> Result<(), IndexerError> {
        let sort = at.sort_key();
        let previous = db.get::<T>(subject).await?;
        let version = History {
            id: version_id(subject, &sort),
            subject: subject.to_string(),
            sort,
            block: at.block.clone(),
            txid: at.txid.clone(),
            state,
            previous,
        };
        db.put(&version).await?;
        match &version.state {
            Some(live) => db.put(live).await,
            None => db.delete::<T>(subject).await.map(|_| ()),
        }
    }

    /// Undo the version written by `record` at `at`.
    pub async fn revert(db: &Database, subject: &str, at: &Provenance) -> Result<(), IndexerError> {
        let id = version_id(subject, &at.sort_key());
        let version = db.require::<History<T>>(&id).await?;
        db.delete::<History<T>>(&id).await?;
        match version.previous {
            Some(live) => db.put(&live).await,
            None => db.delete::<T>(subject).await.map(|_| ()),
        }
    }

    /// Most recent version of `subject`.
    pub async fn latest(db: &Database, subject: &str) -> Result<Option<History<T>>, IndexerError> {
        let page = db
            .query::<History<T>>("subject", &Query::desc(1).partition(subject))
            .await?;
        Ok(page.items.into_iter().next())
    }

    /// State of `subject` as of the end of block `height`.
    pub async fn state_at(db: &Database, subject: &str, height: u32) -> Result<Option<T>, IndexerError> {
        let bound = match height.checked_add(1) {
            Some(next) => Query::desc(1).partition(subject).lt(encode_height(next)),
            None => Query::desc(1).partition(subject),
        };
        let page = db.query::<History<T>>("subject", &bound).await?;
        Ok(page.items.into_iter().next().and_then(|h| h.state))
    }

    /// Every version of `subject`, oldest first.
    pub async fn list(db: &Database, subject: &str) -> Result<Vec<History<T>>, IndexerError> {
        db.query_all::<History<T>>("subject", Query::asc(100).partition(subject))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Oracle {
        id: String,
        weight: u8,
    }

    impl Model for Oracle {
        const KIND: &'static str = "Oracle";

        fn id(&self) -> String {
            self.id.clone()
        }

        fn indexes() -> Vec<IndexDef<Self>> {
            vec![]
        }
    }

    impl Versioned for Oracle {
        const HISTORY_KIND: &'static str = "OracleHistory";
    }

    fn at(height: u32, txno: u32) -> Provenance {
        let block = BlockStamp {
            hash: format!("h{height}"),
            height,
            time: 0,
            median_time: 0,
        };
        Provenance::new(block, txno, format!("tx{height}{txno}"))
    }

    fn oracle(weight: u8) -> Oracle {
        Oracle { id: "o1".into(), weight }
    }

    #[tokio::test]
    async fn record_then_revert_restores_previous() {
        let db = Database::memory();
        History::record(&db, "o1", Some(oracle(1)), &at(10, 1)).await.unwrap();
        let before = db.snapshot().await.unwrap();

        History::record(&db, "o1", Some(oracle(5)), &at(12, 0)).await.unwrap();
        assert_eq!(db.get::<Oracle>("o1").await.unwrap().unwrap().weight, 5);

        History::<Oracle>::revert(&db, "o1", &at(12, 0)).await.unwrap();
        assert_eq!(db.snapshot().await.unwrap(), before);
    }

    #[tokio::test]
    async fn removal_and_its_revert() {
        let db = Database::memory();
        History::record(&db, "o1", Some(oracle(1)), &at(10, 0)).await.unwrap();
        History::<Oracle>::record(&db, "o1", None, &at(11, 0)).await.unwrap();
        assert!(db.get::<Oracle>("o1").await.unwrap().is_none());

        History::<Oracle>::revert(&db, "o1", &at(11, 0)).await.unwrap();
        assert_eq!(db.get::<Oracle>("o1").await.unwrap(), Some(oracle(1)));

        History::<Oracle>::revert(&db, "o1", &at(10, 0)).await.unwrap();
        assert!(db.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn state_at_height() {
        let db = Database::memory();
        History::record(&db, "o1", Some(oracle(1)), &at(10, 0)).await.unwrap();
        History::record(&db, "o1", Some(oracle(2)), &at(20, 3)).await.unwrap();

        assert!(History::<Oracle>::state_at(&db, "o1", 9).await.unwrap().is_none());
        assert_eq!(History::<Oracle>::state_at(&db, "o1", 19).await.unwrap(), Some(oracle(1)));
        assert_eq!(History::<Oracle>::state_at(&db, "o1", 20).await.unwrap(), Some(oracle(2)));
        assert_eq!(History::<Oracle>::list(&db, "o1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reverting_unknown_version_is_not_found() {
        let db = Database::memory();
        let err = History::<Oracle>::revert(&db, "o1", &at(3, 0)).await.unwrap_err();
        assert!(matches!(err, IndexerError::NotFound { .. }));
    }
}
