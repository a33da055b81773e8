//! Node access: a retrying wrapper over [`NodeRpc`] and an in-memory node.
//!
//! [`NodeClient`] is the only way the follower talks to the node. It retries
//! transient transport errors and rejects blocks that cannot be indexed
//! (wrong height, no coinbase) before they reach any indexer.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::warn;

use dfindex_core::error::IndexerError;
use dfindex_core::retry::{RetryConfig, RetryPolicy};
use dfindex_core::rpc::NodeRpc;
use dfindex_core::types::Block;

/// Retrying, validating client over a [`NodeRpc`].
#[derive(Clone)]
pub struct NodeClient {
    rpc: Arc<dyn NodeRpc>,
    retry: RetryPolicy,
}

impl NodeClient {
    pub fn new(rpc: Arc<dyn NodeRpc>, retry: RetryConfig) -> Self {
        Self {
            rpc,
            retry: RetryPolicy::new(retry),
        }
    }

    async fn with_retry<T, F, Fut>(&self, call: &'static str, f: F) -> Result<T, IndexerError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, IndexerError>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    let Some(delay) = self.retry.next_delay(attempt) else {
                        return Err(e);
                    };
                    warn!(
                        call,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "RPC failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Height of the node's best block.
    pub async fn best_height(&self) -> Result<u32, IndexerError> {
        self.with_retry("getblockcount", || self.rpc.get_block_count())
            .await
    }

    /// Best-chain hash at `height`.
    pub async fn hash_at(&self, height: u32) -> Result<Option<String>, IndexerError> {
        self.with_retry("getblockhash", || self.rpc.get_block_hash(height))
            .await
    }

    /// Block by hash, stale blocks included.
    pub async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, IndexerError> {
        let block = self
            .with_retry("getblock", || self.rpc.get_block(hash))
            .await?;
        match block {
            Some(b) if b.tx.is_empty() => Err(IndexerError::RpcItemLength {
                what: "block transactions",
                expected: 1,
                actual: 0,
            }),
            other => Ok(other),
        }
    }

    /// Best-chain block at `height`, or `None` if the node has not reached it.
    pub async fn block_at(&self, height: u32) -> Result<Option<Block>, IndexerError> {
        let Some(hash) = self.hash_at(height).await? else {
            return Ok(None);
        };
        let block = self
            .block_by_hash(&hash)
            .await?
            .ok_or(IndexerError::RpcNotFound { what: "block", id: hash })?;
        if block.height != height {
            return Err(IndexerError::HeightMismatch {
                expected: height,
                actual: block.height,
            });
        }
        Ok(Some(block))
    }
}

#[derive(Default)]
struct NodeState {
    /// Best chain, height → hash.
    best: BTreeMap<u32, String>,
    /// Every block ever accepted, including ones that left the best chain.
    blocks: HashMap<String, Block>,
    failures: u32,
}

/// In-memory node with a mutable best chain.
///
/// Used by tests and by offline replay. Blocks that leave the best chain stay
/// retrievable by hash, as with a real node.
#[derive(Default)]
pub struct MemoryNode {
    state: Mutex<NodeState>,
}

impl MemoryNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node whose best chain is `blocks`, in order.
    pub fn from_blocks(blocks: impl IntoIterator<Item = Block>) -> Self {
        let node = Self::new();
        for block in blocks {
            node.push(block);
        }
        node
    }

    /// Parse a JSON array of blocks (`getblock <hash> 2` shape).
    pub fn from_json(json: &str) -> Result<Self, IndexerError> {
        let blocks: Vec<Block> = serde_json::from_str(json)?;
        Ok(Self::from_blocks(blocks))
    }

    fn state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `block` the best block at its height.
    ///
    /// Best-chain blocks above it are dropped, so this appends, replaces the
    /// tip, or forks deeper depending on the height.
    pub fn push(&self, block: Block) {
        let mut state = self.state();
        let height = block.height;
        state.best.retain(|h, _| *h < height);
        state.best.insert(height, block.hash.clone());
        state.blocks.insert(block.hash.clone(), block);
    }

    /// Drop every best-chain block above `height`.
    pub fn rewind(&self, height: u32) {
        self.state().best.retain(|h, _| *h <= height);
    }

    /// Fail the next `n` RPC calls with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.state().failures = n;
    }

    pub fn tip(&self) -> Option<(u32, String)> {
        self.state()
            .best
            .last_key_value()
            .map(|(h, hash)| (*h, hash.clone()))
    }

    fn check_failure(state: &mut NodeState) -> Result<(), IndexerError> {
        if state.failures > 0 {
            state.failures -= 1;
            return Err(IndexerError::Rpc("connection reset by peer".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl NodeRpc for MemoryNode {
    async fn get_block_count(&self) -> Result<u32, IndexerError> {
        let mut state = self.state();
        Self::check_failure(&mut state)?;
        Ok(state.best.keys().next_back().copied().unwrap_or(0))
    }

    async fn get_block_hash(&self, height: u32) -> Result<Option<String>, IndexerError> {
        let mut state = self.state();
        Self::check_failure(&mut state)?;
        Ok(state.best.get(&height).cloned())
    }

    async fn get_block(&self, hash: &str) -> Result<Option<Block>, IndexerError> {
        let mut state = self.state();
        Self::check_failure(&mut state)?;
        Ok(state.blocks.get(hash).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfindex_core::types::{Transaction, Vin};

    fn block(height: u32, salt: &str) -> Block {
        Block {
            hash: format!("{salt}{height:08x}"),
            height,
            previous_hash: None,
            time: 0,
            median_time: 0,
            size: 0,
            tx: vec![Transaction {
                txid: format!("cb{salt}{height}"),
                vin: vec![Vin {
                    coinbase: Some("00".into()),
                    txid: None,
                    vout: None,
                    sequence: 0,
                }],
                vout: vec![],
            }],
        }
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
            multiplier: 1.0,
            jitter_fraction: 0.0,
        }
    }

    #[test]
    fn push_replaces_and_truncates() {
        let node = MemoryNode::from_blocks((0..5).map(|h| block(h, "a")));
        node.push(block(2, "b"));
        assert_eq!(node.tip(), Some((2, "b00000002".to_string())));
        node.rewind(1);
        assert_eq!(node.tip().map(|t| t.0), Some(1));
    }

    #[tokio::test]
    async fn stale_blocks_stay_retrievable() {
        let node = MemoryNode::from_blocks((0..3).map(|h| block(h, "a")));
        node.push(block(2, "b"));
        assert!(node.get_block("a00000002").await.unwrap().is_some());
        assert_eq!(node.get_block_hash(2).await.unwrap().as_deref(), Some("b00000002"));
    }

    #[tokio::test]
    async fn client_retries_transient_errors() {
        let node = Arc::new(MemoryNode::from_blocks((0..3).map(|h| block(h, "a"))));
        node.fail_next(2);
        let client = NodeClient::new(node.clone(), fast_retry(3));
        assert_eq!(client.best_height().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn client_gives_up_after_max_retries() {
        let node = Arc::new(MemoryNode::from_blocks([block(0, "a")]));
        node.fail_next(5);
        let client = NodeClient::new(node.clone(), fast_retry(2));
        let err = client.best_height().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn block_without_transactions_is_rejected() {
        let mut empty = block(0, "a");
        empty.tx.clear();
        let client = NodeClient::new(Arc::new(MemoryNode::from_blocks([empty])), fast_retry(0));
        let err = client.block_at(0).await.unwrap_err();
        assert!(matches!(err, IndexerError::RpcItemLength { actual: 0, .. }));
    }

    #[tokio::test]
    async fn block_at_wrong_height_is_rejected() {
        let node = MemoryNode::new();
        let mut b = block(7, "a");
        node.push(b.clone());
        // node indexes it under 7 but the body claims 8
        b.height = 8;
        node.state().blocks.insert(b.hash.clone(), b);
        let client = NodeClient::new(Arc::new(node), fast_retry(0));
        let err = client.block_at(7).await.unwrap_err();
        assert!(matches!(err, IndexerError::HeightMismatch { expected: 7, actual: 8 }));
    }

    #[tokio::test]
    async fn missing_height_is_none() {
        let client = NodeClient::new(Arc::new(MemoryNode::from_blocks([block(0, "a")])), fast_retry(0));
        assert!(client.block_at(1).await.unwrap().is_none());
    }
}
