//! Coin supply: per-block deltas and the running totals built from them.

use serde::{Deserialize, Serialize};
use tracing::debug;

use dfindex_core::error::IndexerError;
use dfindex_core::types::{Block, BlockStamp};
use dfindex_dftx::{DfTx, Extracted};
use dfindex_storage::{
    encode_height, Cumulative, CumulativeEngine, Database, IndexDef, Model, Recurrence,
};

use crate::context::IndexContext;

/// The native coin's token id.
pub const DFI: u32 = 0;

const SUBJECT: &str = "supply";

/// What one block changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyStat {
    pub height: u32,
    /// Coinbase outputs.
    pub minted: i64,
    /// Outputs paying to the burn script.
    pub burned: i64,
    /// Net coins moved into vault collateral.
    pub locked: i64,
}

impl Model for SupplyStat {
    const KIND: &'static str = "SupplyStat";

    fn id(&self) -> String {
        encode_height(self.height)
    }

    fn indexes() -> Vec<IndexDef<Self>> {
        vec![]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyStatAggregation {
    pub subject: String,
    pub minted: i64,
    pub burned: i64,
    pub locked: i64,
    /// `minted - burned - locked`.
    pub circulating: i64,
    pub block: BlockStamp,
}

impl Model for SupplyStatAggregation {
    const KIND: &'static str = "SupplyStatAggregation";

    fn id(&self) -> String {
        format!("{}-{}", self.subject, encode_height(self.block.height))
    }

    fn indexes() -> Vec<IndexDef<Self>> {
        vec![IndexDef::sorted("height", |s| s.subject.clone(), |s| encode_height(s.block.height))]
    }
}

impl Cumulative for SupplyStatAggregation {
    const HEIGHT_INDEX: &'static str = "height";
    type Delta = SupplyStat;

    fn zero(subject: &str, block: &BlockStamp) -> Self {
        Self {
            subject: subject.to_string(),
            minted: 0,
            burned: 0,
            locked: 0,
            circulating: 0,
            block: block.clone(),
        }
    }

    fn accumulate(previous: &Self, delta: &SupplyStat, block: &BlockStamp) -> Self {
        let minted = previous.minted + delta.minted;
        let burned = previous.burned + delta.burned;
        let locked = previous.locked + delta.locked;
        Self {
            subject: previous.subject.clone(),
            minted,
            burned,
            locked,
            circulating: minted - burned - locked,
            block: block.clone(),
        }
    }
}

/// Supply delta of `block`.
pub fn block_delta(block: &Block, extracted: &[Extracted<'_>], burn_script_hex: &str) -> SupplyStat {
    let mut stat = SupplyStat {
        height: block.height,
        ..SupplyStat::default()
    };
    for tx in &block.tx {
        let coinbase = tx.is_coinbase();
        for vout in tx.vout.iter().filter(|v| v.token_id == DFI) {
            if coinbase {
                stat.minted += vout.value_sats();
            }
            if vout.script_pub_key.hex == burn_script_hex {
                stat.burned += vout.value_sats();
            }
        }
    }
    for e in extracted {
        match &e.dftx {
            DfTx::DepositToVault(d) if d.amount.token == DFI => stat.locked += d.amount.amount,
            DfTx::WithdrawFromVault(w) if w.amount.token == DFI => stat.locked -= w.amount.amount,
            _ => {}
        }
    }
    stat
}

fn engine(ctx: &IndexContext, db: &Database) -> CumulativeEngine<SupplyStatAggregation> {
    CumulativeEngine::new(
        db,
        Recurrence::Contiguous {
            from_height: ctx.config.from_height,
        },
    )
}

pub async fn index(ctx: &IndexContext, db: &Database, block: &Block, extracted: &[Extracted<'_>]) -> Result<(), IndexerError> {
    let delta = block_delta(block, extracted, &ctx.config.burn_script_hex);
    db.put(&delta).await?;
    let total = engine(ctx, db).apply(SUBJECT, &delta, &block.stamp()).await?;
    debug!(height = block.height, circulating = total.circulating, "supply indexed");
    Ok(())
}

pub async fn invalidate(ctx: &IndexContext, db: &Database, block: &Block) -> Result<(), IndexerError> {
    engine(ctx, db).revert(SUBJECT, block.height).await?;
    db.delete::<SupplyStat>(&encode_height(block.height)).await?;
    Ok(())
}

pub async fn delta_at(db: &Database, height: u32) -> Result<Option<SupplyStat>, IndexerError> {
    db.get::<SupplyStat>(&encode_height(height)).await
}

pub async fn total_at(ctx: &IndexContext, db: &Database, height: u32) -> Result<Option<SupplyStatAggregation>, IndexerError> {
    engine(ctx, db).at(SUBJECT, height).await
}

pub async fn latest(ctx: &IndexContext, db: &Database) -> Result<Option<SupplyStatAggregation>, IndexerError> {
    engine(ctx, db).latest(SUBJECT).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfindex_core::indexer::{IndexerConfig, Network};
    use dfindex_core::types::{ScriptPubKey, Transaction, Vin, Vout};

    fn vout(n: u32, value: f64, script: &str) -> Vout {
        Vout {
            value,
            n,
            script_pub_key: ScriptPubKey {
                hex: script.into(),
                kind: String::new(),
                addresses: vec![],
            },
            token_id: DFI,
        }
    }

    fn block(height: u32, burn: Option<(&str, f64)>) -> Block {
        let coinbase = Transaction {
            txid: format!("cb{height}"),
            vin: vec![Vin {
                coinbase: Some("03".into()),
                txid: None,
                vout: None,
                sequence: 0,
            }],
            vout: vec![vout(0, 2.0, "51")],
        };
        let mut tx = vec![coinbase];
        if let Some((script, value)) = burn {
            tx.push(Transaction {
                txid: format!("burn{height}"),
                vin: vec![],
                vout: vec![vout(0, value, script)],
            });
        }
        Block {
            hash: format!("{height:064x}"),
            height,
            previous_hash: None,
            time: 0,
            median_time: 0,
            size: 0,
            tx,
        }
    }

    #[tokio::test]
    async fn running_totals_follow_deltas() {
        let db = Database::memory();
        let ctx = IndexContext::offline(IndexerConfig::for_network(Network::Regtest));
        let burn = Network::Regtest.burn_script_hex();
        for h in 0..4 {
            let b = block(h, (h == 2).then_some((burn, 0.5)));
            index(&ctx, &db, &b, &[]).await.unwrap();
        }
        for h in 1..4 {
            let prev = total_at(&ctx, &db, h - 1).await.unwrap().unwrap();
            let delta = delta_at(&db, h).await.unwrap().unwrap();
            let total = total_at(&ctx, &db, h).await.unwrap().unwrap();
            assert_eq!(total.minted, prev.minted + delta.minted);
            assert_eq!(total.burned, prev.burned + delta.burned);
        }
        let last = latest(&ctx, &db).await.unwrap().unwrap();
        assert_eq!(last.circulating, 8 * 100_000_000 - 50_000_000);
    }

    #[tokio::test]
    async fn missing_previous_total_fails() {
        let db = Database::memory();
        let ctx = IndexContext::offline(IndexerConfig::for_network(Network::Regtest));
        index(&ctx, &db, &block(0, None), &[]).await.unwrap();
        let err = index(&ctx, &db, &block(2, None), &[]).await.unwrap_err();
        assert!(matches!(err, IndexerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn invalidate_removes_both_rows() {
        let db = Database::memory();
        let ctx = IndexContext::offline(IndexerConfig::for_network(Network::Regtest));
        index(&ctx, &db, &block(0, None), &[]).await.unwrap();
        let before = db.snapshot().await.unwrap();
        index(&ctx, &db, &block(1, None), &[]).await.unwrap();
        invalidate(&ctx, &db, &block(1, None)).await.unwrap();
        assert_eq!(db.snapshot().await.unwrap(), before);
    }
}
