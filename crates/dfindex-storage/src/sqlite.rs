//! SQLite storage backend.
//!
//! One `kv` table with a BLOB primary key; SQLite compares BLOBs with
//! `memcmp`, which gives the byte order the [`KvStore`] contract requires.
//! Uses `sqlx` with WAL mode for concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use dfindex_storage::sqlite::SqliteKv;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteKv::open("./dfindex.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteKv::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::ops::Bound;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use dfindex_core::error::IndexerError;

use crate::kv::{KeyRange, KvPair, KvStore, SortOrder, WriteBatch, WriteOp};

fn storage_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

pub struct SqliteKv {
    pool: SqlitePool,
}

impl SqliteKv {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./dfindex.db"`) or a full
    /// SQLite URL (`"sqlite:./dfindex.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Pinned to a single connection: every `:memory:` connection is its own
    /// database.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv (
                key   BLOB NOT NULL PRIMARY KEY,
                value BLOB NOT NULL
            ) WITHOUT ROWID;",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Total number of stored keys.
    pub async fn count(&self) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM kv")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }
}

#[async_trait]
impl KvStore for SqliteKv {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, IndexerError> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>("value")))
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

        let mut sql = String::from("SELECT key, value FROM kv WHERE 1 = 1");
        let mut params: Vec<&[u8]> = Vec::with_capacity(2);
        match &range.start {
            Bound::Included(k) => {
                sql.push_str(" AND key >= ?");
                params.push(k);
            }
            Bound::Excluded(k) => {
                sql.push_str(" AND key > ?");
                params.push(k);
            }
            Bound::Unbounded => {}
        }
        match &range.end {
            Bound::Included(k) => {
                sql.push_str(" AND key <= ?");
                params.push(k);
            }
            Bound::Excluded(k) => {
                sql.push_str(" AND key < ?");
                params.push(k);
            }
            Bound::Unbounded => {}
        }
        sql.push_str(match order {
            SortOrder::Asc => " ORDER BY key ASC LIMIT ?",
            SortOrder::Desc => " ORDER BY key DESC LIMIT ?",
        });

        let mut query = sqlx::query(&sql);
        for p in params {
            query = query.bind(p);
        }
        let rows = query
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get::<Vec<u8>, _>("key"), r.get::<Vec<u8>, _>("value")))
            .collect())
    }

    async fn write(&self, batch: WriteBatch) -> Result<(), IndexerError> {
        if batch.is_empty() {
            return Ok(());
        }
        let ops = batch.len();
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        for op in batch.into_ops() {
            match op {
                WriteOp::Put(k, v) => {
                    sqlx::query(
                        "INSERT INTO kv (key, value) VALUES (?, ?)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    )
                    .bind(k)
                    .bind(v)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage_err)?;
                }
                WriteOp::Delete(k) => {
                    sqlx::query("DELETE FROM kv WHERE key = ?")
                        .bind(k)
                        .execute(&mut *tx)
                        .await
                        .map_err(storage_err)?;
                }
            }
        }
        tx.commit().await.map_err(storage_err)?;
        debug!(ops, "sqlite batch committed");
        Ok(())
    }
}
