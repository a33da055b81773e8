//! Indexer configuration and follower state types.

use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;

/// The chain the indexer follows. Only affects network-specific defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    /// The provably unspendable script coins are sent to when burned.
    pub fn burn_script_hex(&self) -> &'static str {
        match self {
            Self::Mainnet => "76a914f7874e8821097615ec345f74c7e5bcf61b12e2ee88ac",
            Self::Testnet => "76a914ebf0e1b7a4cb2b9fd8a1a61d3b2b2b3f2c2e9e1f88ac",
            Self::Regtest => "6a0e4466547846524f4d5f5245474e",
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mainnet => write!(f, "mainnet"),
            Self::Testnet => write!(f, "testnet"),
            Self::Regtest => write!(f, "regtest"),
        }
    }
}

/// Configuration for an indexer instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Unique name for this indexer (used in logs).
    pub id: String,
    pub network: Network,
    /// First block to index. Aggregations treat it as their genesis.
    pub from_height: u32,
    /// Polling interval once synced (milliseconds).
    pub poll_interval_ms: u64,
    /// Backoff for RPC calls and failed blocks.
    pub retry: RetryConfig,
    /// Swap volume bucket windows in seconds of median time.
    pub volume_windows: Vec<u32>,
    /// Oracle feeds older or newer than this (vs. block time) are ignored.
    pub oracle_price_window_secs: i64,
    /// TTL for governance variable lookups.
    pub gov_cache_ttl_secs: u64,
    /// Outputs paying to this script count as burned supply.
    pub burn_script_hex: String,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self::for_network(Network::Mainnet)
    }
}

impl IndexerConfig {
    /// Defaults with network-specific values filled in.
    pub fn for_network(network: Network) -> Self {
        Self {
            id: "dfindex".into(),
            network,
            from_height: 0,
            poll_interval_ms: 2000,
            retry: RetryConfig::default(),
            volume_windows: vec![3600, 86_400],
            oracle_price_window_secs: 3600,
            gov_cache_ttl_secs: 3600,
            burn_script_hex: network.burn_script_hex().to_string(),
        }
    }
}

/// Runtime state of the chain follower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FollowerState {
    /// Behind the node's best height, indexing forward.
    CatchingUp,
    /// Indexed tip equals the node's best block.
    Synced,
    /// Rolling back blocks that left the best chain.
    Invalidating,
}

impl std::fmt::Display for FollowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CatchingUp => write!(f, "catching-up"),
            Self::Synced => write!(f, "synced"),
            Self::Invalidating => write!(f, "invalidating"),
        }
    }
}
