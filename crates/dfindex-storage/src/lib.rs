//! dfindex-storage: ordered key-value storage and the engines built on it.
//!
//! Backends:
//! - [`memory`]: in-memory `BTreeMap` (dev/testing, no persistence)
//! - `sqlite`: SQLite via `sqlx` (embedded, single-file persistence)
//! - [`staged`]: per-block overlay committed atomically
//!
//! On top of any backend, [`Database`] maps models with declared indexes,
//! and the [`history`], [`deferred`], [`bucket`] and [`cumulative`] engines
//! provide versioning, height-deferred activation and incremental aggregation.

pub mod bucket;
pub mod cumulative;
pub mod database;
pub mod deferred;
pub mod history;
pub mod key;
pub mod kv;
pub mod memory;
pub mod model;
pub mod staged;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use bucket::{BucketEngine, BucketOutcome, Bucketed};
pub use cumulative::{Cumulative, CumulativeEngine, Recurrence};
pub use database::{Database, Staged};
pub use deferred::{Deferrable, Deferred, DeferredEntry, DeferredOp, Resolution};
pub use history::{History, Provenance, Versioned};
pub use key::{decode_u32, encode_height, encode_u32, height_sort_key};
pub use kv::{KeyRange, KvStore, SortOrder, WriteBatch};
pub use memory::MemoryKv;
pub use model::{IndexDef, Model, Page, Query};
pub use staged::StagedKv;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteKv;
