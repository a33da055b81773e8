//! Collaborator traits: the node RPC and the governance variable source.
//!
//! Wire-level bindings live outside this workspace. Implementations must be
//! `Send + Sync` so they can be shared across Tokio tasks.

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::types::Block;

/// The subset of node RPC the follower needs.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// `getblockcount`: height of the node's best block.
    async fn get_block_count(&self) -> Result<u32, IndexerError>;

    /// `getblockhash <height>`: `None` if the node has no block there.
    async fn get_block_hash(&self, height: u32) -> Result<Option<String>, IndexerError>;

    /// `getblock <hash> 2`: full block with decoded transactions.
    /// Stale (no longer best-chain) blocks must still be returned.
    async fn get_block(&self, hash: &str) -> Result<Option<Block>, IndexerError>;
}

/// Read-only governance variables (`getgov <name>`).
#[async_trait]
pub trait GovernanceSource: Send + Sync {
    async fn get_gov(&self, name: &str) -> Result<Option<serde_json::Value>, IndexerError>;
}

/// A governance source with no variables set.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGovernance;

#[async_trait]
impl GovernanceSource for NoGovernance {
    async fn get_gov(&self, _name: &str) -> Result<Option<serde_json::Value>, IndexerError> {
        Ok(None)
    }
}
