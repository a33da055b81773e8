//! Indexed blocks. The highest one is the follower's persisted tip.

use serde::{Deserialize, Serialize};
use tracing::debug;

use dfindex_core::error::IndexerError;
use dfindex_core::types::Block;
use dfindex_storage::{encode_height, Database, IndexDef, Model, Query};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub hash: String,
    pub height: u32,
    pub previous_hash: Option<String>,
    pub time: i64,
    pub median_time: i64,
    pub size: u32,
    pub transaction_count: u32,
}

impl Model for BlockRecord {
    const KIND: &'static str = "Block";

    fn id(&self) -> String {
        self.hash.clone()
    }

    fn indexes() -> Vec<IndexDef<Self>> {
        vec![IndexDef::unique("height", |b| encode_height(b.height))]
    }
}

impl BlockRecord {
    pub fn from_block(block: &Block) -> Self {
        Self {
            hash: block.hash.clone(),
            height: block.height,
            previous_hash: block.previous_hash.clone(),
            time: block.time,
            median_time: block.median_time,
            size: block.size,
            transaction_count: block.tx.len() as u32,
        }
    }
}

pub async fn index(db: &Database, block: &Block) -> Result<(), IndexerError> {
    db.put(&BlockRecord::from_block(block)).await?;
    debug!(height = block.height, hash = %block.hash, "block record stored");
    Ok(())
}

pub async fn invalidate(db: &Database, block: &Block) -> Result<(), IndexerError> {
    if !db.delete::<BlockRecord>(&block.hash).await? {
        return Err(IndexerError::not_found(BlockRecord::KIND, &block.hash));
    }
    Ok(())
}

/// Highest indexed block.
pub async fn highest(db: &Database) -> Result<Option<BlockRecord>, IndexerError> {
    let page = db.query::<BlockRecord>("height", &Query::desc(1)).await?;
    Ok(page.items.into_iter().next())
}

pub async fn at_height(db: &Database, height: u32) -> Result<Option<BlockRecord>, IndexerError> {
    db.get_by::<BlockRecord>("height", &encode_height(height), None).await
}
