//! Time-bucketed aggregation.
//!
//! Rows are keyed by `(key, height)` where `key` names the subject and window
//! (for example `{pool}-{3600}`). Every block that opens or touches a bucket
//! writes a full copy of the bucket at its own height, so undoing a block is a
//! point delete and the newest row per key is always the active bucket.

use std::marker::PhantomData;

use tracing::debug;

use dfindex_core::error::IndexerError;
use dfindex_core::types::BlockStamp;

use crate::database::Database;
use crate::key::encode_height;
use crate::model::{Model, Query};

/// A model holding one bucket snapshot.
///
/// The model must declare a sorted index named [`Bucketed::KEY_INDEX`] with
/// partition = bucket key and sort = [`encode_height`] of the row's height.
pub trait Bucketed: Model + Clone {
    const KEY_INDEX: &'static str;

    /// Zero-valued bucket for `key`, opened at `block`.
    fn open(key: &str, window: u32, block: &BlockStamp) -> Self;

    /// Median time at which this bucket opened.
    fn bucket_start(&self) -> i64;

    /// Carry the bucket forward to a row at `block`.
    fn restamp(&mut self, block: &BlockStamp);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketOutcome {
    /// A fresh bucket row was written at this height.
    Opened,
    /// The active bucket was carried forward with new deltas.
    Accumulated,
    /// Nothing was written.
    Untouched,
}

pub struct BucketEngine<T> {
    db: Database,
    _row: PhantomData<fn() -> T>,
}

impl<T: Bucketed> BucketEngine<T> {
    pub fn new(db: &Database) -> Self {
        Self {
            db: db.clone(),
            _row: PhantomData,
        }
    }

    /// Most recent row for `key`.
    pub async fn latest(&self, key: &str) -> Result<Option<T>, IndexerError> {
        let page = self
            .db
            .query::<T>(T::KEY_INDEX, &Query::desc(1).partition(key))
            .await?;
        Ok(page.items.into_iter().next())
    }

    /// Index one block for `key`.
    ///
    /// `deltas` is `None` when the block carried nothing for this key. A new
    /// bucket opens when there is none yet or when more than `window` seconds
    /// of median time have passed since the active one opened, even without
    /// deltas.
    pub async fn index<F>(
        &self,
        key: &str,
        window: u32,
        block: &BlockStamp,
        deltas: Option<F>,
    ) -> Result<BucketOutcome, IndexerError>
    where
        F: FnOnce(&mut T),
    {
        let latest = self.latest(key).await?;
        let expired = latest
            .as_ref()
            .map_or(true, |prev| block.median_time - prev.bucket_start() > i64::from(window));

        let (row, outcome) = if expired {
            let mut row = T::open(key, window, block);
            if let Some(apply) = deltas {
                apply(&mut row);
            }
            (row, BucketOutcome::Opened)
        } else {
            match (latest, deltas) {
                (Some(mut row), Some(apply)) => {
                    row.restamp(block);
                    apply(&mut row);
                    (row, BucketOutcome::Accumulated)
                }
                _ => return Ok(BucketOutcome::Untouched),
            }
        };
        self.db.put(&row).await?;
        debug!(kind = T::KIND, key, height = block.height, ?outcome, "bucket written");
        Ok(outcome)
    }

    /// Undo [`BucketEngine::index`] at `height`.
    pub async fn invalidate(&self, key: &str, height: u32) -> Result<(), IndexerError> {
        let row = self
            .db
            .get_by::<T>(T::KEY_INDEX, key, Some(&encode_height(height)))
            .await?;
        if let Some(row) = row {
            self.db.delete::<T>(&row.id()).await?;
        }
        Ok(())
    }
}
