//! Shared chain types for the indexing pipeline.
//!
//! The shapes mirror the node's `getblock <hash> 2` response so a block can
//! be deserialized straight from JSON.

use serde::{Deserialize, Serialize};

/// Number of satoshis in one coin.
pub const COIN: i64 = 100_000_000;

/// Convert a coin-denominated float from the node into satoshis.
pub fn to_sats(value: f64) -> i64 {
    (value * COIN as f64).round() as i64
}

/// Render a satoshi amount as a fixed 8-decimal string (`"1.50000000"`).
pub fn format_sats(sats: i64) -> String {
    let sign = if sats < 0 { "-" } else { "" };
    let abs = sats.unsigned_abs();
    format!("{sign}{}.{:08}", abs / COIN as u64, abs % COIN as u64)
}

// ─── Block ──────────────────────────────────────────────────────────────────

/// A full block with its ordered transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub hash: String,
    pub height: u32,
    #[serde(rename = "previousblockhash", default)]
    pub previous_hash: Option<String>,
    pub time: i64,
    #[serde(rename = "mediantime")]
    pub median_time: i64,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub tx: Vec<Transaction>,
}

impl Block {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent_height: u32, parent_hash: &str) -> bool {
        self.height == parent_height + 1 && self.previous_hash.as_deref() == Some(parent_hash)
    }

    /// The provenance stamp attached to every record indexed from this block.
    pub fn stamp(&self) -> BlockStamp {
        BlockStamp {
            hash: self.hash.clone(),
            height: self.height,
            time: self.time,
            median_time: self.median_time,
        }
    }
}

// ─── Transaction ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,
    #[serde(default)]
    pub vin: Vec<Vin>,
    #[serde(default)]
    pub vout: Vec<Vout>,
}

impl Transaction {
    /// Returns `true` for the block reward transaction.
    pub fn is_coinbase(&self) -> bool {
        self.vin.first().map_or(false, |v| v.coinbase.is_some())
    }
}

/// A transaction input. Either a coinbase input or a reference to a
/// previous output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coinbase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vout: Option<u32>,
    #[serde(default)]
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vout {
    /// Amount in coins, as reported by the node.
    pub value: f64,
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
    #[serde(rename = "tokenId", default)]
    pub token_id: u32,
}

impl Vout {
    pub fn value_sats(&self) -> i64 {
        to_sats(self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptPubKey {
    pub hex: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
}

// ─── BlockStamp ─────────────────────────────────────────────────────────────

/// Provenance attached to every indexed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStamp {
    pub hash: String,
    pub height: u32,
    pub time: i64,
    pub median_time: i64,
}

impl BlockStamp {
    /// Block time as a UTC datetime, `None` if out of range.
    pub fn datetime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp(self.time, 0)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
