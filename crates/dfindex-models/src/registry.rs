//! The ordered list of indexers a block passes through.
//!
//! Each [`Indexer`] is a plain tag. Block-level indexers see the whole block;
//! a DFTX indexer sees only the transactions carrying its opcode, in block
//! order. Invalidation walks the same list backwards, and each DFTX stage
//! walks its transactions backwards, so every block is undone in exact
//! reverse of how it was applied.

use std::fmt;

use tracing::{debug, trace};

use dfindex_core::error::IndexerError;
use dfindex_core::types::Block;
use dfindex_dftx::{extract_block, DfTx, DfTxType, Extracted};
use dfindex_storage::Database;

use crate::context::{DfTxContext, IndexContext};
use crate::{block, loan, oracle, poolpair, poolswap, script, supply, token, vault};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Indexer {
    Block,
    Script,
    DfTx(DfTxType),
    LoanSchemeActivation,
    PoolSwapVolume,
    OraclePrice,
    SupplyStats,
}

impl fmt::Display for Indexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Indexer::Block => f.write_str("block"),
            Indexer::Script => f.write_str("script"),
            Indexer::DfTx(kind) => write!(f, "dftx:{kind}"),
            Indexer::LoanSchemeActivation => f.write_str("loan-scheme-activation"),
            Indexer::PoolSwapVolume => f.write_str("pool-swap-volume"),
            Indexer::OraclePrice => f.write_str("oracle-price"),
            Indexer::SupplyStats => f.write_str("supply-stats"),
        }
    }
}

impl Indexer {
    async fn index(
        self,
        ctx: &IndexContext,
        db: &Database,
        block: &Block,
        extracted: &[Extracted<'_>],
    ) -> Result<(), IndexerError> {
        match self {
            Indexer::Block => {
                block::index(db, block).await?;
                token::index_native(ctx, db, block).await
            }
            Indexer::Script => script::index(db, block).await,
            Indexer::DfTx(kind) => {
                for e in extracted.iter().filter(|e| e.dftx.kind() == kind) {
                    let tx = DfTxContext::new(block, e);
                    trace!(%kind, txid = tx.txid(), txno = tx.txno, "indexing dftx");
                    index_dftx(ctx, db, &tx, &e.dftx).await?;
                }
                Ok(())
            }
            Indexer::LoanSchemeActivation => loan::index_activation(db, block).await,
            Indexer::PoolSwapVolume => poolswap::index_volume(ctx, db, block).await,
            Indexer::OraclePrice => oracle::index_prices(ctx, db, block, extracted).await,
            Indexer::SupplyStats => supply::index(ctx, db, block, extracted).await,
        }
    }

    async fn invalidate(
        self,
        ctx: &IndexContext,
        db: &Database,
        block: &Block,
        extracted: &[Extracted<'_>],
    ) -> Result<(), IndexerError> {
        match self {
            Indexer::Block => {
                token::invalidate_native(ctx, db, block).await?;
                block::invalidate(db, block).await
            }
            Indexer::Script => script::invalidate(db, block).await,
            Indexer::DfTx(kind) => {
                for e in extracted.iter().rev().filter(|e| e.dftx.kind() == kind) {
                    let tx = DfTxContext::new(block, e);
                    trace!(%kind, txid = tx.txid(), txno = tx.txno, "invalidating dftx");
                    invalidate_dftx(db, &tx, &e.dftx).await?;
                }
                Ok(())
            }
            Indexer::LoanSchemeActivation => loan::invalidate_activation(db, block).await,
            Indexer::PoolSwapVolume => poolswap::invalidate_volume(ctx, db, block).await,
            Indexer::OraclePrice => oracle::invalidate_prices(db, block, extracted).await,
            Indexer::SupplyStats => supply::invalidate(ctx, db, block).await,
        }
    }
}

async fn index_dftx(ctx: &IndexContext, db: &Database, tx: &DfTxContext<'_>, dftx: &DfTx) -> Result<(), IndexerError> {
    match dftx {
        DfTx::CreateToken(p) => token::index_create(db, tx, p).await,
        DfTx::MintToken(p) => token::index_mint(db, tx, p).await,
        DfTx::CreatePoolPair(p) => poolpair::index_create(ctx, db, tx, p).await,
        DfTx::UpdatePoolPair(p) => poolpair::index_update(db, tx, p).await,
        DfTx::PoolSwap(p) => poolswap::index_swap(db, tx, p).await,
        DfTx::CompositeSwap(p) => poolswap::index_composite_swap(db, tx, p).await,
        DfTx::AddLiquidity(p) => poolswap::index_add_liquidity(db, tx, p).await,
        DfTx::RemoveLiquidity(p) => poolswap::index_remove_liquidity(db, tx, p).await,
        DfTx::AppointOracle(p) => oracle::index_appoint(db, tx, p).await,
        DfTx::UpdateOracle(p) => oracle::index_update(db, tx, p).await,
        DfTx::RemoveOracle(p) => oracle::index_remove(db, tx, p).await,
        DfTx::SetOracleData(p) => oracle::index_set_data(db, tx, p).await,
        DfTx::CreateLoanScheme(p) => loan::index_create(db, tx, p).await,
        DfTx::DestroyLoanScheme(p) => loan::index_destroy(db, tx, p).await,
        DfTx::SetDefaultLoanScheme(p) => loan::index_set_default(db, tx, p).await,
        DfTx::CreateVault(p) => vault::index_create(db, tx, p).await,
        DfTx::UpdateVault(p) => vault::index_update(db, tx, p).await,
        DfTx::DepositToVault(p) => vault::index_deposit(db, tx, p).await,
        DfTx::WithdrawFromVault(p) => vault::index_withdraw(db, tx, p).await,
        DfTx::TakeLoan(p) => vault::index_take_loan(db, tx, p).await,
        DfTx::PaybackLoan(p) => vault::index_payback(db, tx, p).await,
        DfTx::CloseVault(p) => vault::index_close(db, tx, p).await,
        DfTx::PlaceAuctionBid(p) => vault::index_bid(db, tx, p).await,
    }
}

async fn invalidate_dftx(db: &Database, tx: &DfTxContext<'_>, dftx: &DfTx) -> Result<(), IndexerError> {
    match dftx {
        DfTx::CreateToken(p) => token::invalidate_create(db, tx, p).await,
        DfTx::MintToken(p) => token::invalidate_mint(db, tx, p).await,
        DfTx::CreatePoolPair(p) => poolpair::invalidate_create(db, tx, p).await,
        DfTx::UpdatePoolPair(p) => poolpair::invalidate_update(db, tx, p).await,
        DfTx::PoolSwap(p) => poolswap::invalidate_swap(db, tx, p).await,
        DfTx::CompositeSwap(p) => poolswap::invalidate_composite_swap(db, tx, p).await,
        DfTx::AddLiquidity(p) => poolswap::invalidate_add_liquidity(db, tx, p).await,
        DfTx::RemoveLiquidity(p) => poolswap::invalidate_remove_liquidity(db, tx, p).await,
        DfTx::AppointOracle(p) => oracle::invalidate_appoint(db, tx, p).await,
        DfTx::UpdateOracle(p) => oracle::invalidate_update(db, tx, p).await,
        DfTx::RemoveOracle(p) => oracle::invalidate_remove(db, tx, p).await,
        DfTx::SetOracleData(p) => oracle::invalidate_set_data(db, tx, p).await,
        DfTx::CreateLoanScheme(p) => loan::invalidate_create(db, tx, p).await,
        DfTx::DestroyLoanScheme(p) => loan::invalidate_destroy(db, tx, p).await,
        DfTx::SetDefaultLoanScheme(p) => loan::invalidate_set_default(db, tx, p).await,
        DfTx::CreateVault(p) => vault::invalidate_create(db, tx, p).await,
        DfTx::UpdateVault(p) => vault::invalidate_update(db, tx, p).await,
        DfTx::DepositToVault(p) => vault::invalidate_deposit(db, tx, p).await,
        DfTx::WithdrawFromVault(p) => vault::invalidate_withdraw(db, tx, p).await,
        DfTx::TakeLoan(p) => vault::invalidate_take_loan(db, tx, p).await,
        DfTx::PaybackLoan(p) => vault::invalidate_payback(db, tx, p).await,
        DfTx::CloseVault(p) => vault::invalidate_close(db, tx, p).await,
        DfTx::PlaceAuctionBid(p) => vault::invalidate_bid(db, tx, p).await,
    }
}

/// Outcome of running a block through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSummary {
    pub height: u32,
    pub transactions: usize,
    pub dftx: usize,
}

/// Indexers in the order they run for each block.
#[derive(Debug, Clone)]
pub struct IndexerRegistry {
    indexers: Vec<Indexer>,
}

impl Default for IndexerRegistry {
    /// Base models first, then one stage per DFTX opcode in tag table
    /// order, then the derived views that read what those wrote.
    fn default() -> Self {
        let mut indexers = vec![Indexer::Block, Indexer::Script];
        indexers.extend(DfTxType::ALL.iter().copied().map(Indexer::DfTx));
        indexers.extend([
            Indexer::LoanSchemeActivation,
            Indexer::PoolSwapVolume,
            Indexer::OraclePrice,
            Indexer::SupplyStats,
        ]);
        Self { indexers }
    }
}

impl IndexerRegistry {
    pub fn new(indexers: Vec<Indexer>) -> Self {
        Self { indexers }
    }

    pub fn indexers(&self) -> &[Indexer] {
        &self.indexers
    }

    /// Apply `block`. On error the caller must discard every write made.
    pub async fn index(&self, ctx: &IndexContext, db: &Database, block: &Block) -> Result<BlockSummary, IndexerError> {
        let extracted = extract_block(block);
        for indexer in &self.indexers {
            indexer.index(ctx, db, block, &extracted).await.map_err(|e| {
                debug!(%indexer, height = block.height, error = %e, "indexer failed");
                e
            })?;
        }
        Ok(BlockSummary {
            height: block.height,
            transactions: block.tx.len(),
            dftx: extracted.len(),
        })
    }

    /// Undo [`IndexerRegistry::index`] for `block`, which must be the
    /// highest indexed block.
    pub async fn invalidate(&self, ctx: &IndexContext, db: &Database, block: &Block) -> Result<BlockSummary, IndexerError> {
        let extracted = extract_block(block);
        for indexer in self.indexers.iter().rev() {
            indexer.invalidate(ctx, db, block, &extracted).await.map_err(|e| {
                debug!(%indexer, height = block.height, error = %e, "invalidation failed");
                e
            })?;
        }
        Ok(BlockSummary {
            height: block.height,
            transactions: block.tx.len(),
            dftx: extracted.len(),
        })
    }
}
