//! Indexer cursor: the indexed tip and the reader-facing synced height.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// The last block the follower fully indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    pub height: u32,
    pub hash: String,
}

impl ChainTip {
    pub fn new(height: u32, hash: impl Into<String>) -> Self {
        Self {
            height,
            hash: hash.into(),
        }
    }

    /// Returns the next block to process (tip + 1).
    pub fn next_height(&self) -> u32 {
        self.height + 1
    }
}

/// Publishes the last fully indexed height. Owned by the follower.
#[derive(Debug)]
pub struct HeightPublisher {
    tx: watch::Sender<Option<u32>>,
}

/// Reader handle on the last fully indexed height.
///
/// This is the only synchronization primitive readers get: nothing above
/// [`SyncedHeight::current`] is visible as committed state.
#[derive(Debug, Clone)]
pub struct SyncedHeight {
    rx: watch::Receiver<Option<u32>>,
}

/// Create a connected publisher/reader pair starting at `initial`.
pub fn synced_height(initial: Option<u32>) -> (HeightPublisher, SyncedHeight) {
    let (tx, rx) = watch::channel(initial);
    (HeightPublisher { tx }, SyncedHeight { rx })
}

impl HeightPublisher {
    pub fn publish(&self, height: Option<u32>) {
        self.tx.send_replace(height);
    }

    pub fn subscribe(&self) -> SyncedHeight {
        SyncedHeight {
            rx: self.tx.subscribe(),
        }
    }
}

impl SyncedHeight {
    /// Last fully indexed height, `None` before the first block.
    pub fn current(&self) -> Option<u32> {
        *self.rx.borrow()
    }

    /// Wait until the indexed height reaches at least `height`.
    ///
    /// Returns `false` if the follower was dropped before getting there.
    pub async fn wait_for_indexed_height(&mut self, height: u32) -> bool {
        self.rx
            .wait_for(|h| h.map_or(false, |h| h >= height))
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn tip_next_height() {
        let tip = ChainTip::new(500, "0x123");
        assert_eq!(tip.next_height(), 501);
    }

    #[tokio::test]
    async fn wait_returns_once_height_reached() {
        let (publisher, synced) = synced_height(None);
        let mut reader = synced.clone();
        let waiter = tokio::spawn(async move { reader.wait_for_indexed_height(3).await });

        for h in 0..=3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            publisher.publish(Some(h));
        }
        assert!(waiter.await.unwrap());
        assert_eq!(synced.current(), Some(3));
    }

    #[tokio::test]
    async fn wait_fails_when_publisher_dropped() {
        let (publisher, mut synced) = synced_height(Some(1));
        drop(publisher);
        assert!(!synced.wait_for_indexed_height(2).await);
    }

    #[tokio::test]
    async fn already_reached_returns_immediately() {
        let (_publisher, mut synced) = synced_height(Some(10));
        assert!(synced.wait_for_indexed_height(7).await);
    }
}
