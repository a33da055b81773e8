//! Pool pairs and their liquidity tokens.
//!
//! A pool pair shares its id with the LP token minted for it, so creating a
//! pool writes two versioned records: the LP [`Token`] and the [`PoolPair`].

use serde::{Deserialize, Serialize};
use tracing::debug;

use dfindex_core::error::IndexerError;
use dfindex_core::types::BlockStamp;
use dfindex_dftx::pool::{CreatePoolPair, UpdatePoolPair};
use dfindex_dftx::token::CreateToken;
use dfindex_dftx::TokenAmount;
use dfindex_storage::{encode_u32, Database, History, IndexDef, Model, Query, Versioned};

use crate::context::{DfTxContext, IndexContext};
use crate::token::{self, Token};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolPair {
    /// Also the id of the pool's LP token.
    pub pool_pair_id: u32,
    pub pair_symbol: String,
    pub token_a: u32,
    pub token_b: u32,
    pub status: bool,
    pub commission: i64,
    pub owner_script: String,
    pub custom_rewards: Vec<TokenAmount>,
    /// Share of block rewards from `LP_SPLITS`, when governance has one.
    pub reward_pct: Option<f64>,
    pub creation_txid: String,
    pub creation_height: u32,
    pub block: BlockStamp,
}

impl PoolPair {
    pub fn tokens_key(a: u32, b: u32) -> String {
        format!("{}-{}", encode_u32(a), encode_u32(b))
    }
}

impl Model for PoolPair {
    const KIND: &'static str = "PoolPair";

    fn id(&self) -> String {
        encode_u32(self.pool_pair_id)
    }

    fn indexes() -> Vec<IndexDef<Self>> {
        vec![
            IndexDef::unique("tokens", |p| PoolPair::tokens_key(p.token_a, p.token_b)),
            IndexDef::sorted("id", |_| String::new(), |p| encode_u32(p.pool_pair_id)),
        ]
    }
}

impl Versioned for PoolPair {
    const HISTORY_KIND: &'static str = "PoolPairHistory";
}

pub async fn get(db: &Database, pool_pair_id: u32) -> Result<Option<PoolPair>, IndexerError> {
    db.get::<PoolPair>(&encode_u32(pool_pair_id)).await
}

pub async fn require(db: &Database, pool_pair_id: u32) -> Result<PoolPair, IndexerError> {
    db.require::<PoolPair>(&encode_u32(pool_pair_id)).await
}

/// The pool trading `a` against `b`, in either order.
pub async fn by_tokens(db: &Database, a: u32, b: u32) -> Result<Option<PoolPair>, IndexerError> {
    if let Some(pool) = db.get_by::<PoolPair>("tokens", &PoolPair::tokens_key(a, b), None).await? {
        return Ok(Some(pool));
    }
    db.get_by::<PoolPair>("tokens", &PoolPair::tokens_key(b, a), None).await
}

pub async fn require_by_tokens(db: &Database, a: u32, b: u32) -> Result<PoolPair, IndexerError> {
    by_tokens(db, a, b)
        .await?
        .ok_or_else(|| IndexerError::not_found(PoolPair::KIND, PoolPair::tokens_key(a, b)))
}

/// Every pool pair, lowest id first.
pub async fn list(db: &Database) -> Result<Vec<PoolPair>, IndexerError> {
    db.query_all::<PoolPair>("id", Query::asc(100)).await
}

async fn pair_symbol(db: &Database, payload: &CreatePoolPair) -> Result<String, IndexerError> {
    if !payload.pair_symbol.is_empty() {
        return Ok(payload.pair_symbol.clone());
    }
    let a = token::require(db, payload.token_a).await?;
    let b = token::require(db, payload.token_b).await?;
    Ok(format!("{}-{}", a.symbol, b.symbol))
}

// ─── CreatePoolPair ─────────────────────────────────────────────────────────

pub async fn index_create(
    ctx: &IndexContext,
    db: &Database,
    tx: &DfTxContext<'_>,
    payload: &CreatePoolPair,
) -> Result<(), IndexerError> {
    let symbol = pair_symbol(db, payload).await?;
    let pool_pair_id = token::next_token_id(db, true).await?;

    let lp = CreateToken {
        symbol: symbol.clone(),
        name: symbol.clone(),
        decimal: 8,
        limit: 0,
        is_dat: true,
        tradeable: true,
        mintable: false,
    };
    let lp_token = token::new_token(pool_pair_id, &lp, true, &tx.at);
    History::record(db, &lp_token.id(), Some(lp_token), &tx.at).await?;

    let pool = PoolPair {
        pool_pair_id,
        pair_symbol: symbol,
        token_a: payload.token_a,
        token_b: payload.token_b,
        status: payload.status,
        commission: payload.commission,
        owner_script: payload.owner_address.to_hex(),
        custom_rewards: payload.custom_rewards.clone(),
        reward_pct: ctx.gov.lp_split(pool_pair_id).await?,
        creation_txid: tx.txid().to_string(),
        creation_height: tx.height(),
        block: tx.at.block.clone(),
    };
    History::record(db, &pool.id(), Some(pool.clone()), &tx.at).await?;
    debug!(pool_pair_id, symbol = %pool.pair_symbol, "pool pair created");
    Ok(())
}

pub async fn invalidate_create(db: &Database, tx: &DfTxContext<'_>, payload: &CreatePoolPair) -> Result<(), IndexerError> {
    let pool = require_by_tokens(db, payload.token_a, payload.token_b).await?;
    History::<PoolPair>::revert(db, &pool.id(), &tx.at).await?;
    History::<Token>::revert(db, &encode_u32(pool.pool_pair_id), &tx.at).await
}

// ─── UpdatePoolPair ─────────────────────────────────────────────────────────

pub async fn index_update(db: &Database, tx: &DfTxContext<'_>, payload: &UpdatePoolPair) -> Result<(), IndexerError> {
    let mut pool = require(db, payload.pool_id).await?;
    pool.status = payload.status;
    if payload.commission >= 0 {
        pool.commission = payload.commission;
    }
    if !payload.owner_address.0.is_empty() {
        pool.owner_script = payload.owner_address.to_hex();
    }
    if !payload.custom_rewards.is_empty() {
        pool.custom_rewards = payload.custom_rewards.clone();
    }
    pool.block = tx.at.block.clone();
    History::record(db, &pool.id(), Some(pool), &tx.at).await
}

pub async fn invalidate_update(db: &Database, tx: &DfTxContext<'_>, payload: &UpdatePoolPair) -> Result<(), IndexerError> {
    History::<PoolPair>::revert(db, &encode_u32(payload.pool_id), &tx.at).await
}
