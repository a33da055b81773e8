//! Oracles, their price feeds and per-block weighted prices.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use dfindex_core::error::IndexerError;
use dfindex_core::types::{Block, BlockStamp};
use dfindex_dftx::oracle::{AppointOracle, CurrencyPair, RemoveOracle, SetOracleData, UpdateOracle};
use dfindex_dftx::{DfTx, Extracted};
use dfindex_storage::{encode_height, Database, History, IndexDef, Model, Query, Versioned};

use crate::context::{DfTxContext, IndexContext};

// ─── Oracle ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Oracle {
    /// Txid of the appointing transaction.
    pub oracle_id: String,
    pub owner_script: String,
    pub weightage: u8,
    pub price_feeds: Vec<CurrencyPair>,
    pub block: BlockStamp,
}

impl Model for Oracle {
    const KIND: &'static str = "Oracle";

    fn id(&self) -> String {
        self.oracle_id.clone()
    }

    fn indexes() -> Vec<IndexDef<Self>> {
        vec![IndexDef::sorted("all", |_| String::new(), |o| o.oracle_id.clone())]
    }
}

impl Versioned for Oracle {
    const HISTORY_KIND: &'static str = "OracleHistory";
}

// ─── OracleTokenCurrency ────────────────────────────────────────────────────

/// Membership of one oracle in one pair's feed set. Derived from the live
/// [`Oracle`] and rewritten whenever it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleTokenCurrency {
    pub key: String,
    pub token: String,
    pub currency: String,
    pub oracle_id: String,
    pub weightage: u8,
    pub block: BlockStamp,
}

impl Model for OracleTokenCurrency {
    const KIND: &'static str = "OracleTokenCurrency";

    fn id(&self) -> String {
        format!("{}-{}", self.key, self.oracle_id)
    }

    fn indexes() -> Vec<IndexDef<Self>> {
        vec![IndexDef::sorted("key", |o| o.key.clone(), |o| o.oracle_id.clone())]
    }
}

fn membership(oracle: &Oracle, pair: &CurrencyPair) -> OracleTokenCurrency {
    OracleTokenCurrency {
        key: pair.key(),
        token: pair.token.clone(),
        currency: pair.currency.clone(),
        oracle_id: oracle.oracle_id.clone(),
        weightage: oracle.weightage,
        block: oracle.block.clone(),
    }
}

/// Move the membership rows from `from` to `to`.
async fn sync_pairs(db: &Database, from: Option<&Oracle>, to: Option<&Oracle>) -> Result<(), IndexerError> {
    if let Some(old) = from {
        for pair in &old.price_feeds {
            let stale = to.map_or(true, |new| !new.price_feeds.contains(pair));
            if stale {
                db.delete::<OracleTokenCurrency>(&membership(old, pair).id()).await?;
            }
        }
    }
    if let Some(new) = to {
        for pair in &new.price_feeds {
            db.put(&membership(new, pair)).await?;
        }
    }
    Ok(())
}

/// Write `state` as the oracle's new version and keep memberships in step.
async fn record(db: &Database, oracle_id: &str, state: Option<Oracle>, tx: &DfTxContext<'_>) -> Result<(), IndexerError> {
    let before = db.get::<Oracle>(oracle_id).await?;
    History::record(db, oracle_id, state.clone(), &tx.at).await?;
    sync_pairs(db, before.as_ref(), state.as_ref()).await
}

async fn revert(db: &Database, oracle_id: &str, tx: &DfTxContext<'_>) -> Result<(), IndexerError> {
    let current = db.get::<Oracle>(oracle_id).await?;
    History::<Oracle>::revert(db, oracle_id, &tx.at).await?;
    let restored = db.get::<Oracle>(oracle_id).await?;
    sync_pairs(db, current.as_ref(), restored.as_ref()).await
}

pub async fn index_appoint(db: &Database, tx: &DfTxContext<'_>, payload: &AppointOracle) -> Result<(), IndexerError> {
    let oracle = Oracle {
        oracle_id: tx.txid().to_string(),
        owner_script: payload.script.to_hex(),
        weightage: payload.weightage,
        price_feeds: payload.price_feeds.clone(),
        block: tx.at.block.clone(),
    };
    record(db, tx.txid(), Some(oracle), tx).await?;
    debug!(oracle = tx.txid(), feeds = payload.price_feeds.len(), "oracle appointed");
    Ok(())
}

pub async fn invalidate_appoint(db: &Database, tx: &DfTxContext<'_>, _payload: &AppointOracle) -> Result<(), IndexerError> {
    revert(db, tx.txid(), tx).await
}

pub async fn index_update(db: &Database, tx: &DfTxContext<'_>, payload: &UpdateOracle) -> Result<(), IndexerError> {
    let oracle_id = payload.oracle_id.to_hex();
    db.require::<Oracle>(&oracle_id).await?;
    let oracle = Oracle {
        oracle_id: oracle_id.clone(),
        owner_script: payload.script.to_hex(),
        weightage: payload.weightage,
        price_feeds: payload.price_feeds.clone(),
        block: tx.at.block.clone(),
    };
    record(db, &oracle_id, Some(oracle), tx).await
}

pub async fn invalidate_update(db: &Database, tx: &DfTxContext<'_>, payload: &UpdateOracle) -> Result<(), IndexerError> {
    revert(db, &payload.oracle_id.to_hex(), tx).await
}

pub async fn index_remove(db: &Database, tx: &DfTxContext<'_>, payload: &RemoveOracle) -> Result<(), IndexerError> {
    let oracle_id = payload.oracle_id.to_hex();
    db.require::<Oracle>(&oracle_id).await?;
    record(db, &oracle_id, None, tx).await
}

pub async fn invalidate_remove(db: &Database, tx: &DfTxContext<'_>, payload: &RemoveOracle) -> Result<(), IndexerError> {
    revert(db, &payload.oracle_id.to_hex(), tx).await
}

/// Oracles currently feeding `pair`.
pub async fn oracles_for(db: &Database, pair: &CurrencyPair) -> Result<Vec<OracleTokenCurrency>, IndexerError> {
    db.query_all::<OracleTokenCurrency>("key", Query::asc(100).partition(pair.key()))
        .await
}

// ─── OraclePriceFeed ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OraclePriceFeed {
    /// `{token}-{currency}-{oracle}`.
    pub key: String,
    pub token: String,
    pub currency: String,
    pub oracle_id: String,
    pub amount: i64,
    /// Time the oracle claims for the price.
    pub time: i64,
    pub sort: String,
    pub txid: String,
    pub block: BlockStamp,
}

impl OraclePriceFeed {
    pub fn key(pair: &CurrencyPair, oracle_id: &str) -> String {
        format!("{}-{oracle_id}", pair.key())
    }
}

impl Model for OraclePriceFeed {
    const KIND: &'static str = "OraclePriceFeed";

    fn id(&self) -> String {
        format!("{}-{}", self.key, self.sort)
    }

    fn indexes() -> Vec<IndexDef<Self>> {
        vec![IndexDef::sorted("key", |f| f.key.clone(), |f| f.sort.clone())]
    }
}

fn price_feed(tx: &DfTxContext<'_>, oracle_id: &str, pair: CurrencyPair, amount: i64, time: i64) -> OraclePriceFeed {
    OraclePriceFeed {
        key: OraclePriceFeed::key(&pair, oracle_id),
        token: pair.token,
        currency: pair.currency,
        oracle_id: oracle_id.to_string(),
        amount,
        time,
        sort: tx.at.sort_key(),
        txid: tx.txid().to_string(),
        block: tx.at.block.clone(),
    }
}

pub async fn index_set_data(db: &Database, tx: &DfTxContext<'_>, payload: &SetOracleData) -> Result<(), IndexerError> {
    let oracle_id = payload.oracle_id.to_hex();
    db.require::<Oracle>(&oracle_id).await?;
    for (pair, amount) in payload.feeds() {
        db.put(&price_feed(tx, &oracle_id, pair, amount, payload.timestamp))
            .await?;
    }
    Ok(())
}

pub async fn invalidate_set_data(db: &Database, tx: &DfTxContext<'_>, payload: &SetOracleData) -> Result<(), IndexerError> {
    let oracle_id = payload.oracle_id.to_hex();
    for (pair, amount) in payload.feeds() {
        let feed = price_feed(tx, &oracle_id, pair, amount, payload.timestamp);
        db.delete::<OraclePriceFeed>(&feed.id()).await?;
    }
    Ok(())
}

pub async fn latest_feed(db: &Database, pair: &CurrencyPair, oracle_id: &str) -> Result<Option<OraclePriceFeed>, IndexerError> {
    let page = db
        .query::<OraclePriceFeed>("key", &Query::desc(1).partition(OraclePriceFeed::key(pair, oracle_id)))
        .await?;
    Ok(page.items.into_iter().next())
}

// ─── OraclePriceAggregated ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OraclePriceAggregated {
    /// `{token}-{currency}`.
    pub key: String,
    pub token: String,
    pub currency: String,
    /// Weighted average of the contributing feeds.
    pub amount: i64,
    pub weightage: u32,
    /// Oracles whose feed counted.
    pub active: u32,
    /// Oracles appointed for the pair.
    pub total: u32,
    pub block: BlockStamp,
}

impl Model for OraclePriceAggregated {
    const KIND: &'static str = "OraclePriceAggregated";

    fn id(&self) -> String {
        format!("{}-{}", self.key, encode_height(self.block.height))
    }

    fn indexes() -> Vec<IndexDef<Self>> {
        vec![IndexDef::sorted("key", |a| a.key.clone(), |a| encode_height(a.block.height))]
    }
}

/// Pairs that received a price in this block.
fn pairs_set_in(extracted: &[Extracted<'_>]) -> BTreeSet<CurrencyPair> {
    extracted
        .iter()
        .filter_map(|e| match &e.dftx {
            DfTx::SetOracleData(data) => Some(data),
            _ => None,
        })
        .flat_map(|data| data.feeds().map(|(pair, _)| pair))
        .collect()
}

async fn aggregate(
    db: &Database,
    pair: &CurrencyPair,
    block: &BlockStamp,
    window_secs: i64,
) -> Result<Option<OraclePriceAggregated>, IndexerError> {
    let members = oracles_for(db, pair).await?;
    let mut weighted: i128 = 0;
    let mut weightage: u32 = 0;
    let mut active: u32 = 0;
    for member in &members {
        if member.weightage == 0 {
            continue;
        }
        let Some(feed) = latest_feed(db, pair, &member.oracle_id).await? else {
            continue;
        };
        if (feed.time - block.time).abs() > window_secs {
            continue;
        }
        weighted += i128::from(feed.amount) * i128::from(member.weightage);
        weightage += u32::from(member.weightage);
        active += 1;
    }
    if active == 0 {
        return Ok(None);
    }
    let amount = i64::try_from(weighted / i128::from(weightage))
        .map_err(|_| IndexerError::Other(format!("price overflow for {}", pair.key())))?;
    Ok(Some(OraclePriceAggregated {
        key: pair.key(),
        token: pair.token.clone(),
        currency: pair.currency.clone(),
        amount,
        weightage,
        active,
        total: members.len() as u32,
        block: block.clone(),
    }))
}

pub async fn index_prices(
    ctx: &IndexContext,
    db: &Database,
    block: &Block,
    extracted: &[Extracted<'_>],
) -> Result<(), IndexerError> {
    let stamp = block.stamp();
    for pair in pairs_set_in(extracted) {
        match aggregate(db, &pair, &stamp, ctx.config.oracle_price_window_secs).await? {
            Some(price) => db.put(&price).await?,
            None => warn!(pair = %pair.key(), height = block.height, "no live feed to aggregate"),
        }
    }
    Ok(())
}

pub async fn invalidate_prices(db: &Database, block: &Block, extracted: &[Extracted<'_>]) -> Result<(), IndexerError> {
    for pair in pairs_set_in(extracted) {
        let id = format!("{}-{}", pair.key(), encode_height(block.height));
        db.delete::<OraclePriceAggregated>(&id).await?;
    }
    Ok(())
}

/// Newest aggregated price of `pair`.
pub async fn latest_price(db: &Database, pair: &CurrencyPair) -> Result<Option<OraclePriceAggregated>, IndexerError> {
    let page = db
        .query::<OraclePriceAggregated>("key", &Query::desc(1).partition(pair.key()))
        .await?;
    Ok(page.items.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{dftx_ctx, stamp_at, TxFixture};
    use dfindex_core::indexer::IndexerConfig;
    use dfindex_core::types::Transaction;
    use dfindex_dftx::oracle::{CurrencyAmount, TokenPrice};
    use dfindex_dftx::{Hash32, Script};

    fn txid(n: u8) -> String {
        format!("{n:02x}").repeat(32)
    }

    fn appoint(weightage: u8, pairs: &[(&str, &str)]) -> AppointOracle {
        AppointOracle {
            script: Script(vec![0x51]),
            weightage,
            price_feeds: pairs.iter().map(|(t, c)| CurrencyPair::new(*t, *c)).collect(),
        }
    }

    fn set_data(oracle: &str, timestamp: i64, amount: i64) -> SetOracleData {
        SetOracleData {
            oracle_id: Hash32::from_hex(oracle).unwrap(),
            timestamp,
            token_prices: vec![TokenPrice {
                token: "BTC".into(),
                prices: vec![CurrencyAmount { currency: "USD".into(), amount }],
            }],
        }
    }

    fn block_with(height: u32, time: i64, fixtures: &[&TxFixture]) -> Block {
        let s = stamp_at(height, time);
        Block {
            hash: s.hash,
            height,
            previous_hash: None,
            time,
            median_time: time,
            size: 0,
            tx: fixtures.iter().map(|f| f.tx.clone()).collect::<Vec<Transaction>>(),
        }
    }

    #[tokio::test]
    async fn update_moves_pair_memberships_and_reverts() {
        let db = Database::memory();
        let appointed = dftx_ctx(stamp_at(1, 100), 1, &txid(1));
        index_appoint(&db, &appointed.ctx(), &appoint(1, &[("BTC", "USD"), ("ETH", "USD")]))
            .await
            .unwrap();
        let before = db.snapshot().await.unwrap();

        let update = UpdateOracle {
            oracle_id: Hash32::from_hex(&txid(1)).unwrap(),
            script: Script(vec![0x51]),
            weightage: 5,
            price_feeds: vec![CurrencyPair::new("BTC", "USD")],
        };
        let updated = dftx_ctx(stamp_at(2, 200), 1, &txid(2));
        index_update(&db, &updated.ctx(), &update).await.unwrap();
        assert!(oracles_for(&db, &CurrencyPair::new("ETH", "USD")).await.unwrap().is_empty());
        assert_eq!(oracles_for(&db, &CurrencyPair::new("BTC", "USD")).await.unwrap()[0].weightage, 5);

        invalidate_update(&db, &updated.ctx(), &update).await.unwrap();
        assert_eq!(db.snapshot().await.unwrap(), before);
    }

    #[tokio::test]
    async fn weighted_price_ignores_stale_feeds() {
        let db = Database::memory();
        let mut config = IndexerConfig::default();
        config.oracle_price_window_secs = 3600;
        let ctx = IndexContext::offline(config);

        for (n, weight) in [(1u8, 1u8), (2, 3), (3, 2)] {
            let tx = dftx_ctx(stamp_at(1, 100), u32::from(n), &txid(n));
            index_appoint(&db, &tx.ctx(), &appoint(weight, &[("BTC", "USD")])).await.unwrap();
        }

        let block_time = 10_000;
        let feeds = [
            dftx_ctx(stamp_at(2, block_time), 1, &txid(11)),
            dftx_ctx(stamp_at(2, block_time), 2, &txid(12)),
            dftx_ctx(stamp_at(2, block_time), 3, &txid(13)),
        ];
        let payloads = [
            set_data(&txid(1), block_time - 10, 100),
            set_data(&txid(2), block_time + 20, 200),
            set_data(&txid(3), block_time - 3601, 900),
        ];
        for (fixture, payload) in feeds.iter().zip(&payloads) {
            index_set_data(&db, &fixture.ctx(), payload).await.unwrap();
        }

        let block = block_with(2, block_time, &[&feeds[0], &feeds[1], &feeds[2]]);
        let extracted: Vec<Extracted<'_>> = block
            .tx
            .iter()
            .zip(&payloads)
            .enumerate()
            .map(|(i, (tx, payload))| Extracted {
                txno: i as u32 + 1,
                tx,
                dftx: DfTx::SetOracleData(payload.clone()),
            })
            .collect();
        index_prices(&ctx, &db, &block, &extracted).await.unwrap();

        let price = latest_price(&db, &CurrencyPair::new("BTC", "USD")).await.unwrap().unwrap();
        assert_eq!(price.amount, (100 + 200 * 3) / 4);
        assert_eq!((price.active, price.total, price.weightage), (2, 3, 4));

        invalidate_prices(&db, &block, &extracted).await.unwrap();
        assert!(latest_price(&db, &CurrencyPair::new("BTC", "USD")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn data_for_unknown_oracle_is_not_found() {
        let db = Database::memory();
        let tx = dftx_ctx(stamp_at(2, 0), 1, &txid(9));
        let err = index_set_data(&db, &tx.ctx(), &set_data(&txid(1), 0, 1)).await.unwrap_err();
        assert!(matches!(err, IndexerError::NotFound { model: "Oracle", .. }));
    }
}
