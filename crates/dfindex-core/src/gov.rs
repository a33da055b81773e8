//! Read-through TTL cache in front of a [`GovernanceSource`].
//!
//! Indexers only rely on values being consistent within the TTL window.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::IndexerError;
use crate::rpc::GovernanceSource;

struct Entry {
    value: Option<serde_json::Value>,
    fetched_at: i64,
}

pub struct GovCache {
    source: Arc<dyn GovernanceSource>,
    ttl_secs: i64,
    entries: Mutex<HashMap<String, Entry>>,
}

impl GovCache {
    pub fn new(source: Arc<dyn GovernanceSource>, ttl_secs: u64) -> Self {
        Self {
            source,
            ttl_secs: ttl_secs.min(i64::MAX as u64) as i64,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch `name`, serving from cache while the entry is younger than the TTL.
    pub async fn get(&self, name: &str) -> Result<Option<serde_json::Value>, IndexerError> {
        self.get_at(name, chrono::Utc::now().timestamp()).await
    }

    async fn get_at(
        &self,
        name: &str,
        now: i64,
    ) -> Result<Option<serde_json::Value>, IndexerError> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(name) {
            if now - entry.fetched_at < self.ttl_secs {
                return Ok(entry.value.clone());
            }
        }
        let value = self.source.get_gov(name).await?;
        tracing::debug!(name, found = value.is_some(), "gov variable refreshed");
        entries.insert(
            name.to_string(),
            Entry {
                value: value.clone(),
                fetched_at: now,
            },
        );
        Ok(value)
    }

    /// Reward split table (`LP_SPLITS`): pool pair id → share of rewards.
    pub async fn lp_split(&self, pool_pair_id: u32) -> Result<Option<f64>, IndexerError> {
        let splits = self.get("LP_SPLITS").await?;
        Ok(splits
            .as_ref()
            .and_then(|v| v.get(pool_pair_id.to_string()))
            .and_then(|v| v.as_f64()))
    }
}
