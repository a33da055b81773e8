//! dfindex-models: materialized views and the indexers that maintain them.
//!
//! Every view has an `index` and an `invalidate` function that are exact
//! inverses for the same block. [`IndexerRegistry`] runs them in a fixed
//! order: block-level base models, one stage per DFTX opcode, then the
//! derived aggregations.

pub mod block;
pub mod context;
pub mod loan;
pub mod oracle;
pub mod poolpair;
pub mod poolswap;
pub mod registry;
pub mod script;
pub mod supply;
pub mod token;
pub mod vault;

#[cfg(test)]
pub(crate) mod testing;

pub use block::BlockRecord;
pub use context::{DfTxContext, IndexContext};
pub use loan::{DefaultLoanScheme, LoanScheme};
pub use oracle::{Oracle, OraclePriceAggregated, OraclePriceFeed, OracleTokenCurrency};
pub use poolpair::PoolPair;
pub use poolswap::{LiquidityKind, PoolLiquidity, PoolSwapAggregated, PoolSwapRecord};
pub use registry::{BlockSummary, Indexer, IndexerRegistry};
pub use script::{ActivityKind, ScriptActivity, ScriptAggregation, TransactionVout};
pub use supply::{SupplyStat, SupplyStatAggregation};
pub use token::Token;
pub use vault::{Vault, VaultAuctionBid};
