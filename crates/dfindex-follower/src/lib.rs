//! dfindex-follower: keeps the index in step with a node's best chain.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dfindex_core::indexer::Network;
//! use dfindex_core::rpc::NoGovernance;
//! use dfindex_follower::{FollowerBuilder, MemoryNode};
//! use dfindex_storage::Database;
//!
//! # async fn example() -> Result<(), dfindex_core::IndexerError> {
//! let node = Arc::new(MemoryNode::from_json("[]")?);
//! let mut follower = FollowerBuilder::new()
//!     .network(Network::Regtest)
//!     .build(node, Database::memory(), Arc::new(NoGovernance));
//! let height = follower.sync().await?;
//! println!("synced to {height:?}");
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod follower;
pub mod node;

pub use builder::FollowerBuilder;
pub use follower::{ChainFollower, Step};
pub use node::{MemoryNode, NodeClient};
