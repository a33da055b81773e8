//! dfindex-core: foundation for the reorg-safe DeFi chain indexer.
//!
//! # Architecture
//!
//! ```text
//! FollowerBuilder → ChainFollower
//!                      ├── NodeClient       (retrying NodeRpc wrapper)
//!                      ├── ReorgDetector    (hash-linkage divergence checks)
//!                      ├── IndexerRegistry  (ordered block + per-opcode indexers)
//!                      │     └── GovCache   (TTL governance lookups)
//!                      └── Database         (ordered KV store, memory / SQLite)
//! ```

pub mod cursor;
pub mod error;
pub mod gov;
pub mod indexer;
pub mod reorg;
pub mod retry;
pub mod rpc;
pub mod types;

pub use cursor::{synced_height, ChainTip, HeightPublisher, SyncedHeight};
pub use error::IndexerError;
pub use gov::GovCache;
pub use indexer::{FollowerState, IndexerConfig, Network};
pub use reorg::{NodeView, ReorgDetector, ReorgEvent, ReorgType};
pub use retry::{RetryConfig, RetryPolicy};
pub use rpc::{GovernanceSource, NodeRpc, NoGovernance};
pub use types::{Block, BlockStamp, ScriptPubKey, Transaction, Vin, Vout};
