//! Running totals: `total(h) = total(prev) + delta(h)`.
//!
//! One row per `(subject, height)`. Undo is a point delete; no totals are
//! ever recomputed.

use std::marker::PhantomData;

use tracing::debug;

use dfindex_core::error::IndexerError;
use dfindex_core::types::BlockStamp;

use crate::database::Database;
use crate::key::encode_height;
use crate::model::{Model, Query};

/// A model holding a running total.
///
/// The model must declare a sorted index named
/// [`Cumulative::HEIGHT_INDEX`] with partition = subject and sort =
/// [`encode_height`] of the row's height.
pub trait Cumulative: Model + Clone {
    const HEIGHT_INDEX: &'static str;
    type Delta;

    /// The total before any delta was applied.
    fn zero(subject: &str, block: &BlockStamp) -> Self;

    /// `previous + delta`, stamped at `block`.
    fn accumulate(previous: &Self, delta: &Self::Delta, block: &BlockStamp) -> Self;
}

/// Which row a new total builds on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    /// Every height from `from_height` on has a row; the row at `h - 1` must
    /// exist unless `h == from_height`.
    Contiguous { from_height: u32 },
    /// Rows exist only where the subject changed; build on the latest one.
    Sparse,
}

pub struct CumulativeEngine<T> {
    db: Database,
    recurrence: Recurrence,
    _row: PhantomData<fn() -> T>,
}

impl<T: Cumulative> CumulativeEngine<T> {
    pub fn new(db: &Database, recurrence: Recurrence) -> Self {
        Self {
            db: db.clone(),
            recurrence,
            _row: PhantomData,
        }
    }

    pub async fn at(&self, subject: &str, height: u32) -> Result<Option<T>, IndexerError> {
        self.db
            .get_by::<T>(T::HEIGHT_INDEX, subject, Some(&encode_height(height)))
            .await
    }

    pub async fn latest(&self, subject: &str) -> Result<Option<T>, IndexerError> {
        let page = self
            .db
            .query::<T>(T::HEIGHT_INDEX, &Query::desc(1).partition(subject))
            .await?;
        Ok(page.items.into_iter().next())
    }

    async fn previous(&self, subject: &str, height: u32) -> Result<Option<T>, IndexerError> {
        match self.recurrence {
            Recurrence::Contiguous { from_height } => {
                if height <= from_height {
                    return Ok(None);
                }
                match self.at(subject, height - 1).await? {
                    Some(prev) => Ok(Some(prev)),
                    None => Err(IndexerError::not_found(
                        T::KIND,
                        format!("{subject}@{}", height - 1),
                    )),
                }
            }
            Recurrence::Sparse => {
                let query = Query::desc(1)
                    .partition(subject)
                    .lt(encode_height(height));
                let page = self.db.query::<T>(T::HEIGHT_INDEX, &query).await?;
                Ok(page.items.into_iter().next())
            }
        }
    }

    /// Write the total for `subject` at `block`.
    pub async fn apply(&self, subject: &str, delta: &T::Delta, block: &BlockStamp) -> Result<T, IndexerError> {
        let previous = match self.previous(subject, block.height).await? {
            Some(prev) => prev,
            None => T::zero(subject, block),
        };
        let row = T::accumulate(&previous, delta, block);
        self.db.put(&row).await?;
        debug!(kind = T::KIND, subject, height = block.height, "total written");
        Ok(row)
    }

    /// Undo [`CumulativeEngine::apply`] at `height`.
    pub async fn revert(&self, subject: &str, height: u32) -> Result<(), IndexerError> {
        if let Some(row) = self.at(subject, height).await? {
            self.db.delete::<T>(&row.id()).await?;
        }
        Ok(())
    }
}
