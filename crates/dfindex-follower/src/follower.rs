//! The chain follower: indexes the node's best chain block by block and
//! rolls back blocks that leave it.
//!
//! # Forward
//! Fetch the block at `tip + 1`, check it builds on the stored tip, run it
//! through the registry against a staged overlay, commit, then publish the
//! new height.
//!
//! # Reorg
//! While the stored tip is not on the node's best chain, re-fetch the tip
//! block by its stored hash and invalidate it, strictly top-down. Forward
//! stepping resumes once the tip is an ancestor of the best chain again.
//!
//! A block either commits completely or not at all. Failures leave the
//! height where it was and are retried by [`ChainFollower::run`].

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use dfindex_core::cursor::{synced_height, ChainTip, HeightPublisher, SyncedHeight};
use dfindex_core::error::IndexerError;
use dfindex_core::indexer::FollowerState;
use dfindex_core::reorg::{NodeView, ReorgDetector};
use dfindex_core::retry::RetryPolicy;
use dfindex_core::types::Block;
use dfindex_models::{block, IndexContext, IndexerRegistry};
use dfindex_storage::Database;

use crate::node::NodeClient;

/// One unit of follower work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Block at this height was indexed and committed.
    Indexed(u32),
    /// Block at this height was rolled back.
    Invalidated(u32),
    /// Indexed tip equals the node's best block.
    Synced(u32),
    /// Nothing to do: the node has no block at the start height yet.
    Idle,
}

pub struct ChainFollower {
    ctx: IndexContext,
    node: NodeClient,
    db: Database,
    registry: IndexerRegistry,
    detector: ReorgDetector,
    retry: RetryPolicy,
    state: FollowerState,
    /// `None` until loaded from storage on the first step.
    tip: Option<Option<ChainTip>>,
    publisher: HeightPublisher,
}

impl ChainFollower {
    pub fn new(ctx: IndexContext, node: NodeClient, db: Database, registry: IndexerRegistry) -> Self {
        let retry = RetryPolicy::new(ctx.config.retry.clone());
        let (publisher, _) = synced_height(None);
        Self {
            ctx,
            node,
            db,
            registry,
            detector: ReorgDetector::new(),
            retry,
            state: FollowerState::CatchingUp,
            tip: None,
            publisher,
        }
    }

    pub fn state(&self) -> FollowerState {
        self.state
    }

    /// Last committed block, once known.
    pub fn tip(&self) -> Option<&ChainTip> {
        self.tip.as_ref().and_then(Option::as_ref)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn context(&self) -> &IndexContext {
        &self.ctx
    }

    /// Reader handle on the last fully indexed height.
    pub fn synced_height(&self) -> SyncedHeight {
        self.publisher.subscribe()
    }

    fn set_state(&mut self, state: FollowerState) {
        if self.state != state {
            info!(from = %self.state, to = %state, "Follower state changed");
            self.state = state;
        }
    }

    fn set_tip(&mut self, tip: Option<ChainTip>) {
        self.publisher.publish(tip.as_ref().map(|t| t.height));
        self.tip = Some(tip);
    }

    async fn load_tip(&mut self) -> Result<Option<ChainTip>, IndexerError> {
        if let Some(tip) = &self.tip {
            return Ok(tip.clone());
        }
        let tip = block::highest(&self.db)
            .await?
            .map(|b| ChainTip::new(b.height, b.hash));
        if let Some(t) = &tip {
            info!(height = t.height, hash = %t.hash, "Resuming from indexed tip");
        }
        self.set_tip(tip.clone());
        Ok(tip)
    }

    /// Perform one unit of work: index one block, roll back one block, or
    /// report that there is nothing new.
    pub async fn step(&mut self) -> Result<Step, IndexerError> {
        let tip = self.load_tip().await?;
        let best = self.node.best_height().await?;

        let Some(tip) = tip else {
            let from = self.ctx.config.from_height;
            return match self.node.block_at(from).await? {
                Some(b) => self.index_block(b, best).await,
                None => Ok(Step::Idle),
            };
        };

        let hash_at_tip = if best >= tip.height {
            self.node.hash_at(tip.height).await?
        } else {
            None
        };
        let next = if best > tip.height && hash_at_tip.as_deref() == Some(tip.hash.as_str()) {
            self.node.block_at(tip.next_height()).await?
        } else {
            None
        };

        let view = NodeView {
            best_height: best,
            hash_at_tip: hash_at_tip.as_deref(),
            next_block: next.as_ref(),
        };
        if self.detector.check(&tip, view).is_some() {
            return self.invalidate_tip(&tip).await;
        }
        self.detector.resolved();

        match next {
            Some(b) => self.index_block(b, best).await,
            None => {
                self.set_state(FollowerState::Synced);
                Ok(Step::Synced(tip.height))
            }
        }
    }

    async fn index_block(&mut self, block: Block, best: u32) -> Result<Step, IndexerError> {
        let staged = self.db.stage();
        let summary = self.registry.index(&self.ctx, &staged.db, &block).await?;
        let writes = staged.commit().await?;

        self.set_tip(Some(ChainTip::new(block.height, block.hash.clone())));
        self.set_state(if block.height >= best {
            FollowerState::Synced
        } else {
            FollowerState::CatchingUp
        });
        info!(
            height = block.height,
            hash = %block.hash,
            transactions = summary.transactions,
            dftx = summary.dftx,
            "Indexed block"
        );
        debug!(height = block.height, writes, "Block committed");
        Ok(Step::Indexed(block.height))
    }

    async fn invalidate_tip(&mut self, tip: &ChainTip) -> Result<Step, IndexerError> {
        self.set_state(FollowerState::Invalidating);
        let stale = self
            .node
            .block_by_hash(&tip.hash)
            .await?
            .ok_or_else(|| IndexerError::RpcNotFound {
                what: "block",
                id: tip.hash.clone(),
            })?;

        let staged = self.db.stage();
        self.registry.invalidate(&self.ctx, &staged.db, &stale).await?;
        staged.commit().await?;
        self.detector.on_invalidated();

        let below = block::highest(&self.db)
            .await?
            .map(|b| ChainTip::new(b.height, b.hash));
        self.set_tip(below);
        warn!(height = tip.height, hash = %tip.hash, "Invalidated block");
        Ok(Step::Invalidated(tip.height))
    }

    /// Step until the indexed tip matches the node's best block.
    ///
    /// Returns the synced height, or `None` if the node has nothing at the
    /// start height yet. Errors are returned as-is, without retrying.
    pub async fn sync(&mut self) -> Result<Option<u32>, IndexerError> {
        loop {
            match self.step().await? {
                Step::Synced(h) => return Ok(Some(h)),
                Step::Idle => return Ok(None),
                Step::Indexed(_) | Step::Invalidated(_) => {}
            }
        }
    }

    /// Follow the chain until `shutdown` turns `true` or its sender is
    /// dropped.
    ///
    /// Failed blocks are retried forever with exponential backoff. Shutdown
    /// is only observed between blocks.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let poll = Duration::from_millis(self.ctx.config.poll_interval_ms);
        let mut failures = 0u32;
        info!(id = %self.ctx.config.id, network = %self.ctx.config.network, "Follower started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            let wait = match self.step().await {
                Ok(Step::Indexed(_) | Step::Invalidated(_)) => {
                    failures = 0;
                    continue;
                }
                Ok(Step::Synced(_) | Step::Idle) => {
                    failures = 0;
                    poll
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.retry.backoff(failures);
                    warn!(
                        error = %e,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "Block failed, retrying"
                    );
                    delay
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(tip = ?self.tip().map(|t| t.height), "Follower stopped");
    }
}
