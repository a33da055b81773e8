//! Models, declared indexes and query options.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::kv::SortOrder;

/// A record type stored by [`crate::Database`].
///
/// `KIND` namespaces both the primary rows and the index names, so two models
/// may declare an index with the same name.
pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: &'static str;

    /// Primary id. Unique per kind.
    fn id(&self) -> String;

    /// Secondary indexes maintained on every `put`/`delete`.
    fn indexes() -> Vec<IndexDef<Self>>
    where
        Self: Sized;
}

/// A named view over a model: partition key plus optional sort key.
///
/// Without a sort key the partition key alone addresses one record.
pub struct IndexDef<M> {
    pub name: &'static str,
    pub partition: fn(&M) -> String,
    pub sort: Option<fn(&M) -> String>,
}

impl<M> IndexDef<M> {
    /// One record per partition key.
    pub fn unique(name: &'static str, partition: fn(&M) -> String) -> Self {
        Self {
            name,
            partition,
            sort: None,
        }
    }

    /// Many records per partition, ordered by `sort`.
    pub fn sorted(name: &'static str, partition: fn(&M) -> String, sort: fn(&M) -> String) -> Self {
        Self {
            name,
            partition,
            sort: Some(sort),
        }
    }

    pub(crate) fn keys(&self, record: &M) -> (String, Option<String>) {
        ((self.partition)(record), self.sort.map(|s| s(record)))
    }
}

/// Range query over one index.
///
/// Bounds apply to the sort key of sorted indexes, or to the partition key of
/// unique indexes. A sorted index queried without a partition uses `""`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub partition: Option<String>,
    pub limit: usize,
    pub order: SortOrder,
    pub gt: Option<String>,
    pub gte: Option<String>,
    pub lt: Option<String>,
    pub lte: Option<String>,
}

impl Query {
    pub fn asc(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn desc(limit: usize) -> Self {
        Self {
            limit,
            order: SortOrder::Desc,
            ..Self::default()
        }
    }

    pub fn partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    pub fn gt(mut self, key: impl Into<String>) -> Self {
        self.gt = Some(key.into());
        self
    }

    pub fn gte(mut self, key: impl Into<String>) -> Self {
        self.gte = Some(key.into());
        self
    }

    pub fn lt(mut self, key: impl Into<String>) -> Self {
        self.lt = Some(key.into());
        self
    }

    pub fn lte(mut self, key: impl Into<String>) -> Self {
        self.lte = Some(key.into());
        self
    }

    /// Continue after an opaque cursor from a previous [`Page`], in this
    /// query's direction.
    pub fn after(self, cursor: impl Into<String>) -> Self {
        match self.order {
            SortOrder::Asc => self.gt(cursor),
            SortOrder::Desc => self.lt(cursor),
        }
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<M> {
    pub items: Vec<M>,
    /// Sort key of the last item when the page is full; pass to
    /// [`Query::after`] to continue.
    pub next: Option<String>,
}

impl<M> Page<M> {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
