//! Tokens: creation, id assignment and minted totals.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use dfindex_core::error::IndexerError;
use dfindex_core::types::{Block, BlockStamp};
use dfindex_dftx::token::{CreateToken, MintToken};
use dfindex_storage::{encode_u32, Database, History, IndexDef, Model, Provenance, Query, Versioned};

use crate::context::{DfTxContext, IndexContext};
use crate::supply::DFI;

/// Ids below this are reserved for DAT (and LP) tokens.
pub const DAT_ID_LIMIT: u32 = 128;

pub const DFI_SYMBOL: &str = "DFI";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub token_id: u32,
    pub symbol: String,
    /// `symbol` for DAT tokens, `symbol#id` otherwise.
    pub symbol_key: String,
    pub name: String,
    pub decimal: u8,
    pub limit: i64,
    pub is_dat: bool,
    pub is_lps: bool,
    pub tradeable: bool,
    pub mintable: bool,
    pub minted: i64,
    pub creation_txid: String,
    pub creation_height: u32,
    pub block: BlockStamp,
}

impl Model for Token {
    const KIND: &'static str = "Token";

    fn id(&self) -> String {
        encode_u32(self.token_id)
    }

    fn indexes() -> Vec<IndexDef<Self>> {
        vec![
            IndexDef::unique("symbol", |t| t.symbol_key.clone()),
            IndexDef::sorted("id", |_| String::new(), |t| encode_u32(t.token_id)),
        ]
    }
}

impl Versioned for Token {
    const HISTORY_KIND: &'static str = "TokenHistory";
}

pub async fn get(db: &Database, token_id: u32) -> Result<Option<Token>, IndexerError> {
    db.get::<Token>(&encode_u32(token_id)).await
}

pub async fn require(db: &Database, token_id: u32) -> Result<Token, IndexerError> {
    db.require::<Token>(&encode_u32(token_id)).await
}

pub async fn by_symbol(db: &Database, symbol_key: &str) -> Result<Option<Token>, IndexerError> {
    db.get_by::<Token>("symbol", symbol_key, None).await
}

/// All tokens in id order.
pub async fn list(db: &Database) -> Result<Vec<Token>, IndexerError> {
    db.query_all::<Token>("id", Query::asc(100)).await
}

/// Next free id: DAT tokens take `1..128` while it lasts, everything else
/// counts up from 128.
pub async fn next_token_id(db: &Database, is_dat: bool) -> Result<u32, IndexerError> {
    if is_dat {
        let page = db
            .query::<Token>("id", &Query::desc(1).lt(encode_u32(DAT_ID_LIMIT)))
            .await?;
        let next = page.items.first().map_or(1, |t| t.token_id + 1);
        if next < DAT_ID_LIMIT {
            return Ok(next);
        }
    }
    let page = db
        .query::<Token>("id", &Query::desc(1).gte(encode_u32(DAT_ID_LIMIT)))
        .await?;
    Ok(page.items.first().map_or(DAT_ID_LIMIT, |t| t.token_id + 1))
}

/// A fresh token record created at `at`.
pub fn new_token(token_id: u32, payload: &CreateToken, is_lps: bool, at: &Provenance) -> Token {
    let symbol_key = if payload.is_dat {
        payload.symbol.clone()
    } else {
        format!("{}#{token_id}", payload.symbol)
    };
    Token {
        token_id,
        symbol: payload.symbol.clone(),
        symbol_key,
        name: payload.name.clone(),
        decimal: payload.decimal,
        limit: payload.limit,
        is_dat: payload.is_dat,
        is_lps,
        tradeable: payload.tradeable,
        mintable: payload.mintable,
        minted: 0,
        creation_txid: at.txid.clone(),
        creation_height: at.height(),
        block: at.block.clone(),
    }
}

/// Id of the token created by `txid`, found through the creation record.
pub async fn created_by(db: &Database, txid: &str, symbol_key_hint: Option<&str>) -> Result<Token, IndexerError> {
    if let Some(key) = symbol_key_hint {
        if let Some(token) = by_symbol(db, key).await? {
            if token.creation_txid == txid {
                return Ok(token);
            }
        }
    }
    list(db)
        .await?
        .into_iter()
        .rev()
        .find(|t| t.creation_txid == txid)
        .ok_or_else(|| IndexerError::not_found(Token::KIND, txid))
}

// ─── Native token ───────────────────────────────────────────────────────────

/// DFI has no creating transaction. It is recorded with the first block the
/// follower indexes and goes away when that block is invalidated.
fn native_token(at: &Provenance) -> Token {
    let payload = CreateToken {
        symbol: DFI_SYMBOL.to_string(),
        name: "Default Defi token".to_string(),
        decimal: 8,
        limit: 0,
        is_dat: false,
        tradeable: true,
        mintable: false,
    };
    let mut token = new_token(DFI, &payload, false, at);
    token.symbol_key = DFI_SYMBOL.to_string();
    token
}

fn native_provenance(block: &Block) -> Provenance {
    Provenance::new(block.stamp(), 0, block.hash.clone())
}

pub async fn index_native(ctx: &IndexContext, db: &Database, block: &Block) -> Result<(), IndexerError> {
    if block.height != ctx.config.from_height {
        return Ok(());
    }
    let at = native_provenance(block);
    let token = native_token(&at);
    History::record(db, &token.id(), Some(token), &at).await?;
    debug!(height = block.height, "native token recorded");
    Ok(())
}

pub async fn invalidate_native(ctx: &IndexContext, db: &Database, block: &Block) -> Result<(), IndexerError> {
    if block.height != ctx.config.from_height {
        return Ok(());
    }
    History::<Token>::revert(db, &encode_u32(DFI), &native_provenance(block)).await
}

// ─── CreateToken ────────────────────────────────────────────────────────────

pub async fn index_create(db: &Database, tx: &DfTxContext<'_>, payload: &CreateToken) -> Result<(), IndexerError> {
    let token_id = next_token_id(db, payload.is_dat).await?;
    let token = new_token(token_id, payload, false, &tx.at);
    History::record(db, &token.id(), Some(token.clone()), &tx.at).await?;
    debug!(token_id, symbol = %token.symbol_key, txid = tx.txid(), "token created");
    Ok(())
}

pub async fn invalidate_create(db: &Database, tx: &DfTxContext<'_>, payload: &CreateToken) -> Result<(), IndexerError> {
    let hint = payload.is_dat.then_some(payload.symbol.as_str());
    let token = created_by(db, tx.txid(), hint).await?;
    History::<Token>::revert(db, &token.id(), &tx.at).await
}

// ─── MintToken ──────────────────────────────────────────────────────────────

fn minted_per_token(payload: &MintToken) -> BTreeMap<u32, i64> {
    let mut totals = BTreeMap::new();
    for balance in &payload.balances {
        *totals.entry(balance.token).or_insert(0) += balance.amount;
    }
    totals
}

pub async fn index_mint(db: &Database, tx: &DfTxContext<'_>, payload: &MintToken) -> Result<(), IndexerError> {
    for (token_id, amount) in minted_per_token(payload) {
        let mut token = require(db, token_id).await?;
        token.minted += amount;
        token.block = tx.at.block.clone();
        History::record(db, &token.id(), Some(token), &tx.at).await?;
    }
    Ok(())
}

pub async fn invalidate_mint(db: &Database, tx: &DfTxContext<'_>, payload: &MintToken) -> Result<(), IndexerError> {
    for token_id in minted_per_token(payload).into_keys().rev() {
        History::<Token>::revert(db, &encode_u32(token_id), &tx.at).await?;
    }
    Ok(())
}
