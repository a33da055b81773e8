//! Fluent builder for [`ChainFollower`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dfindex_core::indexer::Network;
//! use dfindex_core::rpc::NoGovernance;
//! use dfindex_follower::{FollowerBuilder, MemoryNode};
//! use dfindex_storage::Database;
//!
//! let follower = FollowerBuilder::new()
//!     .network(Network::Regtest)
//!     .from_height(0)
//!     .poll_interval_ms(500)
//!     .volume_windows(vec![3600])
//!     .build(Arc::new(MemoryNode::new()), Database::memory(), Arc::new(NoGovernance));
//! ```

use std::sync::Arc;

use dfindex_core::indexer::{IndexerConfig, Network};
use dfindex_core::retry::RetryConfig;
use dfindex_core::rpc::{GovernanceSource, NodeRpc};
use dfindex_models::{IndexContext, IndexerRegistry};
use dfindex_storage::Database;

use crate::follower::ChainFollower;
use crate::node::NodeClient;

/// Fluent builder for [`IndexerConfig`] and the follower around it.
#[derive(Default)]
pub struct FollowerBuilder {
    config: IndexerConfig,
    registry: Option<IndexerRegistry>,
}

impl FollowerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing config, e.g. one read from a file.
    pub fn with_config(config: IndexerConfig) -> Self {
        Self {
            config,
            registry: None,
        }
    }

    /// Set the indexer ID (used in logs).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    /// Switch network. Resets the burn script to the network default.
    pub fn network(mut self, network: Network) -> Self {
        self.config.network = network;
        self.config.burn_script_hex = network.burn_script_hex().to_string();
        self
    }

    /// Set the first block to index.
    pub fn from_height(mut self, height: u32) -> Self {
        self.config.from_height = height;
        self
    }

    /// Set the polling interval once synced.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the swap volume bucket windows, in seconds.
    pub fn volume_windows(mut self, windows: Vec<u32>) -> Self {
        self.config.volume_windows = windows;
        self
    }

    pub fn burn_script_hex(mut self, hex: impl Into<String>) -> Self {
        self.config.burn_script_hex = hex.into();
        self
    }

    /// Replace the default indexer list.
    pub fn registry(mut self, registry: IndexerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Build a follower over `node`, writing into `db`.
    pub fn build(
        self,
        node: Arc<dyn NodeRpc>,
        db: Database,
        gov: Arc<dyn GovernanceSource>,
    ) -> ChainFollower {
        let client = NodeClient::new(node, self.config.retry.clone());
        let ctx = IndexContext::new(self.config, gov);
        ChainFollower::new(ctx, client, db, self.registry.unwrap_or_default())
    }
}
