//! Reorg detection.
//!
//! Forks are detected only through hash linkage against the stored tip:
//! 1. **Parent mismatch**: the node's next block does not build on our tip
//! 2. **Tip replaced**: the node's hash at our tip height differs
//! 3. **Node behind**: the node's best height is below our tip

use crate::cursor::ChainTip;
use crate::types::Block;

/// Classification of the divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorgType {
    ParentMismatch,
    TipReplaced,
    NodeBehind,
}

impl std::fmt::Display for ReorgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ParentMismatch => write!(f, "parent mismatch"),
            Self::TipReplaced => write!(f, "tip replaced"),
            Self::NodeBehind => write!(f, "node behind"),
        }
    }
}

/// Describes a detected divergence at the indexed tip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgEvent {
    /// The indexed height that is no longer on the best chain.
    pub detected_at: u32,
    pub reorg_type: ReorgType,
}

/// What the node currently reports around our tip.
#[derive(Debug, Clone, Copy)]
pub struct NodeView<'a> {
    pub best_height: u32,
    /// Node's hash at `tip.height`, if it has one.
    pub hash_at_tip: Option<&'a str>,
    /// Node's block at `tip.height + 1`, if already fetched.
    pub next_block: Option<&'a Block>,
}

/// Tracks an in-progress rollback so its depth can be reported once the
/// stored tip is back on the best chain.
#[derive(Debug, Default)]
pub struct ReorgDetector {
    active: Option<ReorgEvent>,
    depth: u32,
}

impl ReorgDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether `tip` is still an ancestor of the node's best chain.
    pub fn check(&mut self, tip: &ChainTip, view: NodeView<'_>) -> Option<ReorgEvent> {
        let reorg_type = if view.best_height < tip.height {
            ReorgType::NodeBehind
        } else if view.hash_at_tip != Some(tip.hash.as_str()) {
            ReorgType::TipReplaced
        } else if view
            .next_block
            .map_or(false, |b| !b.extends(tip.height, &tip.hash))
        {
            ReorgType::ParentMismatch
        } else {
            return None;
        };

        let event = ReorgEvent {
            detected_at: tip.height,
            reorg_type,
        };
        if self.active.is_none() {
            tracing::warn!(
                at = tip.height,
                hash = %tip.hash,
                reorg_type = %reorg_type,
                "Reorg detected"
            );
            self.active = Some(event.clone());
        }
        Some(event)
    }

    /// Record that one block was rolled back.
    pub fn on_invalidated(&mut self) {
        self.depth += 1;
    }

    /// The tip is back on the best chain. Returns the finished reorg's depth.
    pub fn resolved(&mut self) -> Option<u32> {
        let event = self.active.take()?;
        let depth = std::mem::take(&mut self.depth);
        tracing::info!(
            detected_at = event.detected_at,
            depth,
            reorg_type = %event.reorg_type,
            "Reorg resolved"
        );
        Some(depth)
    }

    pub fn in_progress(&self) -> bool {
        self.active.is_some()
    }
}
