//! Pool activity: liquidity changes, swaps and bucketed swap volume.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use dfindex_core::error::IndexerError;
use dfindex_core::types::{Block, BlockStamp};
use dfindex_dftx::pool::{AddLiquidity, CompositeSwap, PoolSwap, RemoveLiquidity};
use dfindex_storage::{
    encode_height, encode_u32, BucketEngine, Bucketed, Database, IndexDef, Model, Query,
};

use crate::context::{DfTxContext, IndexContext};
use crate::poolpair::{self, PoolPair};

fn activity_id(pool_pair_id: u32, sort: &str) -> String {
    format!("{}-{sort}", encode_u32(pool_pair_id))
}

// ─── PoolLiquidity ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiquidityKind {
    Add,
    Remove,
}

/// One add or remove against a pool. Amounts the transaction itself does not
/// carry stay `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolLiquidity {
    pub id: String,
    pub pool_pair_id: u32,
    pub kind: LiquidityKind,
    pub sort: String,
    pub txid: String,
    pub script: String,
    pub amount_a: Option<i64>,
    pub amount_b: Option<i64>,
    pub share: Option<i64>,
    pub block: BlockStamp,
}

impl Model for PoolLiquidity {
    const KIND: &'static str = "PoolLiquidity";

    fn id(&self) -> String {
        self.id.clone()
    }

    fn indexes() -> Vec<IndexDef<Self>> {
        vec![IndexDef::sorted("pool", |l| encode_u32(l.pool_pair_id), |l| l.sort.clone())]
    }
}

/// The pool an add-liquidity draws on: the pair formed by the first two
/// distinct tokens it supplies.
async fn liquidity_pool(db: &Database, payload: &AddLiquidity) -> Result<PoolPair, IndexerError> {
    let mut tokens: Vec<u32> = vec![];
    for balance in payload.from.iter().flat_map(|f| f.balances.iter()) {
        if !tokens.contains(&balance.token) {
            tokens.push(balance.token);
        }
    }
    match tokens.as_slice() {
        [a, b, ..] => poolpair::require_by_tokens(db, *a, *b).await,
        _ => Err(IndexerError::not_found(PoolPair::KIND, format!("{tokens:?}"))),
    }
}

pub async fn index_add_liquidity(db: &Database, tx: &DfTxContext<'_>, payload: &AddLiquidity) -> Result<(), IndexerError> {
    let pool = liquidity_pool(db, payload).await?;
    let sum = |token: u32| -> i64 {
        payload
            .from
            .iter()
            .flat_map(|f| f.balances.iter())
            .filter(|b| b.token == token)
            .map(|b| b.amount)
            .sum()
    };
    let sort = tx.at.sort_key();
    db.put(&PoolLiquidity {
        id: activity_id(pool.pool_pair_id, &sort),
        pool_pair_id: pool.pool_pair_id,
        kind: LiquidityKind::Add,
        sort,
        txid: tx.txid().to_string(),
        script: payload.share_address.to_hex(),
        amount_a: Some(sum(pool.token_a)),
        amount_b: Some(sum(pool.token_b)),
        share: None,
        block: tx.at.block.clone(),
    })
    .await
}

pub async fn invalidate_add_liquidity(db: &Database, tx: &DfTxContext<'_>, payload: &AddLiquidity) -> Result<(), IndexerError> {
    let pool = liquidity_pool(db, payload).await?;
    delete_liquidity(db, pool.pool_pair_id, tx).await
}

async fn delete_liquidity(db: &Database, pool_pair_id: u32, tx: &DfTxContext<'_>) -> Result<(), IndexerError> {
    let id = activity_id(pool_pair_id, &tx.at.sort_key());
    if !db.delete::<PoolLiquidity>(&id).await? {
        return Err(IndexerError::not_found(PoolLiquidity::KIND, id));
    }
    Ok(())
}

/// The pool whose LP token a remove-liquidity burns.
async fn removal_pool(db: &Database, payload: &RemoveLiquidity) -> Result<PoolPair, IndexerError> {
    poolpair::require(db, payload.amount.token).await
}

pub async fn index_remove_liquidity(db: &Database, tx: &DfTxContext<'_>, payload: &RemoveLiquidity) -> Result<(), IndexerError> {
    let pool = removal_pool(db, payload).await?;
    let sort = tx.at.sort_key();
    db.put(&PoolLiquidity {
        id: activity_id(pool.pool_pair_id, &sort),
        pool_pair_id: pool.pool_pair_id,
        kind: LiquidityKind::Remove,
        sort,
        txid: tx.txid().to_string(),
        script: payload.script.to_hex(),
        amount_a: None,
        amount_b: None,
        share: Some(payload.amount.amount),
        block: tx.at.block.clone(),
    })
    .await
}

pub async fn invalidate_remove_liquidity(db: &Database, tx: &DfTxContext<'_>, payload: &RemoveLiquidity) -> Result<(), IndexerError> {
    let pool = removal_pool(db, payload).await?;
    delete_liquidity(db, pool.pool_pair_id, tx).await
}

// ─── PoolSwap ───────────────────────────────────────────────────────────────

/// One swap leg through one pool. Only the first leg of a composite swap
/// knows its input amount; output amounts are never known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSwapRecord {
    pub id: String,
    pub pool_pair_id: u32,
    pub sort: String,
    pub txid: String,
    pub txno: u32,
    pub from_script: String,
    pub from_token_id: u32,
    pub from_amount: Option<i64>,
    pub to_script: String,
    pub to_token_id: u32,
    pub to_amount: Option<i64>,
    pub block: BlockStamp,
}

impl Model for PoolSwapRecord {
    const KIND: &'static str = "PoolSwap";

    fn id(&self) -> String {
        self.id.clone()
    }

    fn indexes() -> Vec<IndexDef<Self>> {
        vec![IndexDef::sorted("pool", |s| encode_u32(s.pool_pair_id), |s| s.sort.clone())]
    }
}

/// Pools a swap passes through, first hop first, without repeats.
async fn swap_path(db: &Database, swap: &PoolSwap, pools: &[u32]) -> Result<Vec<u32>, IndexerError> {
    if pools.is_empty() {
        let pool = poolpair::require_by_tokens(db, swap.from_token_id, swap.to_token_id).await?;
        return Ok(vec![pool.pool_pair_id]);
    }
    let mut path = Vec::with_capacity(pools.len());
    for pool in pools {
        if !path.contains(pool) {
            path.push(*pool);
        }
    }
    Ok(path)
}

async fn index_swap_path(db: &Database, tx: &DfTxContext<'_>, swap: &PoolSwap, pools: &[u32]) -> Result<(), IndexerError> {
    let sort = tx.at.sort_key();
    for (hop, pool_pair_id) in swap_path(db, swap, pools).await?.into_iter().enumerate() {
        poolpair::require(db, pool_pair_id).await?;
        db.put(&PoolSwapRecord {
            id: activity_id(pool_pair_id, &sort),
            pool_pair_id,
            sort: sort.clone(),
            txid: tx.txid().to_string(),
            txno: tx.txno,
            from_script: swap.from_script.to_hex(),
            from_token_id: swap.from_token_id,
            from_amount: (hop == 0).then_some(swap.from_amount),
            to_script: swap.to_script.to_hex(),
            to_token_id: swap.to_token_id,
            to_amount: None,
            block: tx.at.block.clone(),
        })
        .await?;
    }
    Ok(())
}

async fn invalidate_swap_path(db: &Database, tx: &DfTxContext<'_>, swap: &PoolSwap, pools: &[u32]) -> Result<(), IndexerError> {
    let sort = tx.at.sort_key();
    for pool_pair_id in swap_path(db, swap, pools).await?.into_iter().rev() {
        db.delete::<PoolSwapRecord>(&activity_id(pool_pair_id, &sort)).await?;
    }
    Ok(())
}

pub async fn index_swap(db: &Database, tx: &DfTxContext<'_>, payload: &PoolSwap) -> Result<(), IndexerError> {
    index_swap_path(db, tx, payload, &[]).await
}

pub async fn invalidate_swap(db: &Database, tx: &DfTxContext<'_>, payload: &PoolSwap) -> Result<(), IndexerError> {
    invalidate_swap_path(db, tx, payload, &[]).await
}

pub async fn index_composite_swap(db: &Database, tx: &DfTxContext<'_>, payload: &CompositeSwap) -> Result<(), IndexerError> {
    index_swap_path(db, tx, &payload.pool_swap, &payload.pools).await
}

pub async fn invalidate_composite_swap(db: &Database, tx: &DfTxContext<'_>, payload: &CompositeSwap) -> Result<(), IndexerError> {
    invalidate_swap_path(db, tx, &payload.pool_swap, &payload.pools).await
}

/// Swaps through `pool_pair_id`, newest first.
pub async fn swaps(db: &Database, pool_pair_id: u32, query: Query) -> Result<Vec<PoolSwapRecord>, IndexerError> {
    let page = db
        .query::<PoolSwapRecord>("pool", &query.partition(encode_u32(pool_pair_id)))
        .await?;
    Ok(page.items)
}

// ─── PoolSwapAggregated ─────────────────────────────────────────────────────

/// Swap volume of one pool over one time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSwapAggregated {
    /// `{pool}-{window}`.
    pub key: String,
    pub window: u32,
    /// Median time the bucket opened at.
    pub bucket_start: i64,
    pub count: u64,
    /// Input volume per token id.
    pub amounts: BTreeMap<u32, i64>,
    pub block: BlockStamp,
}

impl PoolSwapAggregated {
    pub fn key(pool_pair_id: u32, window: u32) -> String {
        format!("{}-{window}", encode_u32(pool_pair_id))
    }
}

impl Model for PoolSwapAggregated {
    const KIND: &'static str = "PoolSwapAggregated";

    fn id(&self) -> String {
        format!("{}-{}", self.key, encode_height(self.block.height))
    }

    fn indexes() -> Vec<IndexDef<Self>> {
        vec![IndexDef::sorted("key", |a| a.key.clone(), |a| encode_height(a.block.height))]
    }
}

impl Bucketed for PoolSwapAggregated {
    const KEY_INDEX: &'static str = "key";

    fn open(key: &str, window: u32, block: &BlockStamp) -> Self {
        Self {
            key: key.to_string(),
            window,
            bucket_start: block.median_time,
            count: 0,
            amounts: BTreeMap::new(),
            block: block.clone(),
        }
    }

    fn bucket_start(&self) -> i64 {
        self.bucket_start
    }

    fn restamp(&mut self, block: &BlockStamp) {
        self.block = block.clone();
    }
}

/// Roll this block's swaps into every pool's buckets.
pub async fn index_volume(ctx: &IndexContext, db: &Database, block: &Block) -> Result<(), IndexerError> {
    let stamp = block.stamp();
    let engine = BucketEngine::<PoolSwapAggregated>::new(db);
    for pool in poolpair::list(db).await? {
        let in_block = db
            .query_all::<PoolSwapRecord>(
                "pool",
                Query::asc(100)
                    .partition(encode_u32(pool.pool_pair_id))
                    .gte(encode_height(block.height)),
            )
            .await?;
        for &window in &ctx.config.volume_windows {
            let key = PoolSwapAggregated::key(pool.pool_pair_id, window);
            let deltas = (!in_block.is_empty()).then(|| {
                |bucket: &mut PoolSwapAggregated| {
                    for swap in &in_block {
                        bucket.count += 1;
                        if let Some(amount) = swap.from_amount {
                            *bucket.amounts.entry(swap.from_token_id).or_insert(0) += amount;
                        }
                    }
                }
            });
            engine.index(&key, window, &stamp, deltas).await?;
        }
        if !in_block.is_empty() {
            debug!(pool = pool.pool_pair_id, swaps = in_block.len(), "swap volume indexed");
        }
    }
    Ok(())
}

pub async fn invalidate_volume(ctx: &IndexContext, db: &Database, block: &Block) -> Result<(), IndexerError> {
    let engine = BucketEngine::<PoolSwapAggregated>::new(db);
    for pool in poolpair::list(db).await?.into_iter().rev() {
        for &window in ctx.config.volume_windows.iter().rev() {
            engine
                .invalidate(&PoolSwapAggregated::key(pool.pool_pair_id, window), block.height)
                .await?;
        }
    }
    Ok(())
}

/// Active bucket of `pool_pair_id` for `window`.
pub async fn latest_volume(db: &Database, pool_pair_id: u32, window: u32) -> Result<Option<PoolSwapAggregated>, IndexerError> {
    BucketEngine::<PoolSwapAggregated>::new(db)
        .latest(&PoolSwapAggregated::key(pool_pair_id, window))
        .await
}
