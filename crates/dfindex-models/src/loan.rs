//! Loan schemes and the default scheme.
//!
//! Scheme changes may name a future activation height. Those go through the
//! deferred engine and only reach the live [`LoanScheme`] when the loan
//! scheme activation indexer runs at that height.

use serde::{Deserialize, Serialize};
use tracing::debug;

use dfindex_core::error::IndexerError;
use dfindex_core::types::{Block, BlockStamp};
use dfindex_dftx::loan::{CreateLoanScheme, DestroyLoanScheme, SetDefaultLoanScheme};
use dfindex_storage::{
    encode_height, Database, Deferrable, Deferred, DeferredEntry, DeferredOp, IndexDef, Model, Query,
};

use crate::context::DfTxContext;

// ─── LoanScheme ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanScheme {
    pub id: String,
    /// Minimum collateralization ratio, in percent.
    pub ratio: u32,
    /// Interest rate, 8 decimals.
    pub rate: i64,
    pub created_height: u32,
    pub created_txid: String,
    pub block: BlockStamp,
}

impl Model for LoanScheme {
    const KIND: &'static str = "LoanScheme";

    fn id(&self) -> String {
        self.id.clone()
    }

    fn indexes() -> Vec<IndexDef<Self>> {
        vec![IndexDef::sorted("created", |_| String::new(), |s| {
            format!("{}-{}", encode_height(s.created_height), s.id)
        })]
    }
}

impl Deferrable for LoanScheme {
    const DEFERRED_KIND: &'static str = "LoanSchemeChange";
}

/// Heights at or below the current one take effect immediately.
fn activation_height(requested: u64, current: u32) -> Option<u32> {
    if requested == 0 || requested <= u64::from(current) {
        None
    } else {
        Some(u32::try_from(requested).unwrap_or(u32::MAX))
    }
}

pub async fn get(db: &Database, id: &str) -> Result<Option<LoanScheme>, IndexerError> {
    db.get::<LoanScheme>(id).await
}

/// Live schemes, most recently created first.
pub async fn list(db: &Database, limit: usize) -> Result<Vec<LoanScheme>, IndexerError> {
    Ok(db.query::<LoanScheme>("created", &Query::desc(limit)).await?.items)
}

/// Scheme in effect at the end of block `height`.
pub async fn scheme_at(db: &Database, id: &str, height: u32) -> Result<Option<LoanScheme>, IndexerError> {
    let resolution = Deferred::<LoanScheme>::new(db)
        .resolve(id, height.saturating_add(1))
        .await?;
    Ok(resolution.value())
}

/// Changes to `id` still waiting for their activation height.
pub async fn pending(db: &Database, id: &str) -> Result<Vec<DeferredEntry<LoanScheme>>, IndexerError> {
    Deferred::<LoanScheme>::new(db).pending(id).await
}

pub async fn index_create(db: &Database, tx: &DfTxContext<'_>, payload: &CreateLoanScheme) -> Result<(), IndexerError> {
    let engine = Deferred::<LoanScheme>::new(db);
    let existing = get(db, &payload.identifier).await?;
    let (created_height, created_txid) = match &existing {
        Some(scheme) => (scheme.created_height, scheme.created_txid.clone()),
        None => (tx.height(), tx.txid().to_string()),
    };
    let scheme = LoanScheme {
        id: payload.identifier.clone(),
        ratio: payload.ratio,
        rate: payload.rate,
        created_height,
        created_txid,
        block: tx.at.block.clone(),
    };

    match activation_height(payload.update, tx.height()) {
        None => {
            let op = if existing.is_some() {
                DeferredOp::Update
            } else {
                DeferredOp::Create
            };
            engine.apply_now(&payload.identifier, op, Some(scheme), &tx.at).await?;
        }
        Some(height) => {
            engine
                .schedule(&payload.identifier, DeferredOp::Update, Some(scheme), height, &tx.at)
                .await?;
        }
    }
    debug!(scheme = %payload.identifier, rate = payload.rate, update = payload.update, "loan scheme set");
    Ok(())
}

pub async fn invalidate_create(db: &Database, tx: &DfTxContext<'_>, payload: &CreateLoanScheme) -> Result<(), IndexerError> {
    let engine = Deferred::<LoanScheme>::new(db);
    match activation_height(payload.update, tx.height()) {
        None => engine.revert_now(&payload.identifier, &tx.at).await,
        Some(_) => engine.unschedule(&payload.identifier, &tx.at).await,
    }
}

pub async fn index_destroy(db: &Database, tx: &DfTxContext<'_>, payload: &DestroyLoanScheme) -> Result<(), IndexerError> {
    let engine = Deferred::<LoanScheme>::new(db);
    match activation_height(payload.height, tx.height()) {
        None => {
            db.require::<LoanScheme>(&payload.identifier).await?;
            engine
                .apply_now(&payload.identifier, DeferredOp::Destroy, None, &tx.at)
                .await?;
        }
        Some(height) => {
            engine
                .schedule(&payload.identifier, DeferredOp::Destroy, None, height, &tx.at)
                .await?;
        }
    }
    Ok(())
}

pub async fn invalidate_destroy(db: &Database, tx: &DfTxContext<'_>, payload: &DestroyLoanScheme) -> Result<(), IndexerError> {
    let engine = Deferred::<LoanScheme>::new(db);
    match activation_height(payload.height, tx.height()) {
        None => engine.revert_now(&payload.identifier, &tx.at).await,
        Some(_) => engine.unschedule(&payload.identifier, &tx.at).await,
    }
}

/// Apply every scheme change due at this block.
pub async fn index_activation(db: &Database, block: &Block) -> Result<(), IndexerError> {
    let touched = Deferred::<LoanScheme>::new(db).activate(block.height).await?;
    if !touched.is_empty() {
        debug!(height = block.height, schemes = ?touched, "loan scheme changes activated");
    }
    Ok(())
}

pub async fn invalidate_activation(db: &Database, block: &Block) -> Result<(), IndexerError> {
    Deferred::<LoanScheme>::new(db).deactivate(block.height).await?;
    Ok(())
}

// ─── DefaultLoanScheme ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultLoanScheme {
    pub scheme_id: String,
    pub sort: String,
    pub txid: String,
    pub block: BlockStamp,
}

impl Model for DefaultLoanScheme {
    const KIND: &'static str = "DefaultLoanScheme";

    fn id(&self) -> String {
        self.sort.clone()
    }

    fn indexes() -> Vec<IndexDef<Self>> {
        vec![IndexDef::sorted("latest", |_| String::new(), |d| d.sort.clone())]
    }
}

pub async fn default_scheme(db: &Database) -> Result<Option<DefaultLoanScheme>, IndexerError> {
    let page = db.query::<DefaultLoanScheme>("latest", &Query::desc(1)).await?;
    Ok(page.items.into_iter().next())
}

pub async fn index_set_default(db: &Database, tx: &DfTxContext<'_>, payload: &SetDefaultLoanScheme) -> Result<(), IndexerError> {
    db.require::<LoanScheme>(&payload.identifier).await?;
    db.put(&DefaultLoanScheme {
        scheme_id: payload.identifier.clone(),
        sort: tx.at.sort_key(),
        txid: tx.txid().to_string(),
        block: tx.at.block.clone(),
    })
    .await
}

pub async fn invalidate_set_default(db: &Database, tx: &DfTxContext<'_>, _payload: &SetDefaultLoanScheme) -> Result<(), IndexerError> {
    db.delete::<DefaultLoanScheme>(&tx.at.sort_key()).await?;
    Ok(())
}
