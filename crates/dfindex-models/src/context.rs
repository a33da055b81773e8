//! Shared inputs threaded through every indexer.

use std::sync::Arc;

use dfindex_core::gov::GovCache;
use dfindex_core::indexer::IndexerConfig;
use dfindex_core::rpc::{GovernanceSource, NoGovernance};
use dfindex_core::types::{Block, Transaction};
use dfindex_dftx::Extracted;
use dfindex_storage::Provenance;

/// Configuration plus the governance cache, built once per follower.
pub struct IndexContext {
    pub config: IndexerConfig,
    pub gov: GovCache,
}

impl IndexContext {
    pub fn new(config: IndexerConfig, gov: Arc<dyn GovernanceSource>) -> Self {
        let gov = GovCache::new(gov, config.gov_cache_ttl_secs);
        Self { config, gov }
    }

    /// Context with no governance variables, for tests and offline replay.
    pub fn offline(config: IndexerConfig) -> Self {
        Self::new(config, Arc::new(NoGovernance))
    }
}

/// One DFTX transaction as seen by its indexer.
pub struct DfTxContext<'a> {
    pub txno: u32,
    pub tx: &'a Transaction,
    pub at: Provenance,
}

impl<'a> DfTxContext<'a> {
    pub fn new(block: &Block, extracted: &Extracted<'a>) -> Self {
        Self {
            txno: extracted.txno,
            tx: extracted.tx,
            at: Provenance::new(block.stamp(), extracted.txno, extracted.tx.txid.clone()),
        }
    }

    pub fn txid(&self) -> &str {
        &self.tx.txid
    }

    pub fn height(&self) -> u32 {
        self.at.height()
    }
}
