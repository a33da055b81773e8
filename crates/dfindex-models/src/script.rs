//! Per-script activity and running balances.
//!
//! Scripts are addressed by their hid: the hex SHA-256 of the raw script
//! bytes. Every output is also kept as a [`TransactionVout`] so later inputs
//! can be resolved to the script they spend.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use dfindex_core::error::IndexerError;
use dfindex_core::types::{Block, BlockStamp, Transaction};
use dfindex_storage::{
    encode_height, encode_u32, Cumulative, CumulativeEngine, Database, IndexDef, Model, Recurrence,
};

/// Hex SHA-256 of the script given as hex.
pub fn script_hid(script_hex: &str) -> Result<String, IndexerError> {
    let bytes = hex::decode(script_hex)
        .map_err(|e| IndexerError::Codec(format!("script '{script_hex}': {e}")))?;
    Ok(hex::encode(Sha256::digest(bytes)))
}

// ─── TransactionVout ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionVout {
    pub id: String,
    pub txid: String,
    pub n: u32,
    pub value: i64,
    pub token_id: u32,
    pub script: String,
    pub hid: String,
}

impl TransactionVout {
    pub fn key(txid: &str, n: u32) -> String {
        format!("{txid}{}", encode_u32(n))
    }
}

impl Model for TransactionVout {
    const KIND: &'static str = "TransactionVout";

    fn id(&self) -> String {
        self.id.clone()
    }

    fn indexes() -> Vec<IndexDef<Self>> {
        vec![]
    }
}

// ─── ScriptActivity ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Vin,
    Vout,
}

impl ActivityKind {
    fn code(self) -> &'static str {
        match self {
            ActivityKind::Vin => "00",
            ActivityKind::Vout => "01",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptActivity {
    pub id: String,
    pub hid: String,
    pub kind: ActivityKind,
    pub txid: String,
    /// Input or output index within the transaction.
    pub n: u32,
    pub value: i64,
    pub token_id: u32,
    pub script: String,
    /// The spent output, for inputs.
    pub spent: Option<SpentOutput>,
    pub block: BlockStamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpentOutput {
    pub txid: String,
    pub n: u32,
}

impl ScriptActivity {
    /// `{height}{vin|vout}{txid}{n}`.
    pub fn sort_key(height: u32, kind: ActivityKind, txid: &str, n: u32) -> String {
        format!("{}{}{}{}", encode_height(height), kind.code(), txid, encode_u32(n))
    }
}

impl Model for ScriptActivity {
    const KIND: &'static str = "ScriptActivity";

    fn id(&self) -> String {
        self.id.clone()
    }

    fn indexes() -> Vec<IndexDef<Self>> {
        vec![IndexDef::sorted("hid", |a| a.hid.clone(), |a| {
            ScriptActivity::sort_key(a.block.height, a.kind, &a.txid, a.n)
        })]
    }
}

// ─── ScriptAggregation ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptAmounts {
    pub tx_in: i64,
    pub tx_out: i64,
    pub unspent: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptAggregation {
    pub hid: String,
    pub script: String,
    pub block: BlockStamp,
    pub tx_in_count: u64,
    pub tx_out_count: u64,
    pub amount: ScriptAmounts,
}

/// One block's effect on one script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptDelta {
    pub script: String,
    pub in_count: u64,
    pub out_count: u64,
    pub in_amount: i64,
    pub out_amount: i64,
}

impl Model for ScriptAggregation {
    const KIND: &'static str = "ScriptAggregation";

    fn id(&self) -> String {
        format!("{}-{}", self.hid, encode_height(self.block.height))
    }

    fn indexes() -> Vec<IndexDef<Self>> {
        vec![IndexDef::sorted("hid", |a| a.hid.clone(), |a| encode_height(a.block.height))]
    }
}

impl Cumulative for ScriptAggregation {
    const HEIGHT_INDEX: &'static str = "hid";
    type Delta = ScriptDelta;

    fn zero(subject: &str, block: &BlockStamp) -> Self {
        ScriptAggregation {
            hid: subject.to_string(),
            script: String::new(),
            block: block.clone(),
            tx_in_count: 0,
            tx_out_count: 0,
            amount: ScriptAmounts::default(),
        }
    }

    fn accumulate(previous: &Self, delta: &ScriptDelta, block: &BlockStamp) -> Self {
        let tx_in = previous.amount.tx_in + delta.in_amount;
        let tx_out = previous.amount.tx_out + delta.out_amount;
        ScriptAggregation {
            hid: previous.hid.clone(),
            script: delta.script.clone(),
            block: block.clone(),
            tx_in_count: previous.tx_in_count + delta.in_count,
            tx_out_count: previous.tx_out_count + delta.out_count,
            amount: ScriptAmounts {
                tx_in,
                tx_out,
                unspent: tx_out - tx_in,
            },
        }
    }
}

// ─── Indexer ────────────────────────────────────────────────────────────────

fn activity_id(hid: &str, sort: &str) -> String {
    format!("{hid}-{sort}")
}

async fn spent_output(db: &Database, txid: &str, n: u32) -> Result<TransactionVout, IndexerError> {
    db.require::<TransactionVout>(&TransactionVout::key(txid, n)).await
}

fn spent_ref(tx: &Transaction, i: usize) -> Option<(&str, u32)> {
    let vin = &tx.vin[i];
    if vin.coinbase.is_some() {
        return None;
    }
    match (&vin.txid, vin.vout) {
        (Some(txid), Some(n)) => Some((txid.as_str(), n)),
        _ => None,
    }
}

pub async fn index(db: &Database, block: &Block) -> Result<(), IndexerError> {
    let stamp = block.stamp();
    let mut deltas: BTreeMap<String, ScriptDelta> = BTreeMap::new();

    for tx in &block.tx {
        for i in 0..tx.vin.len() {
            let Some((txid, n)) = spent_ref(tx, i) else {
                continue;
            };
            let spent = spent_output(db, txid, n).await?;
            let sort = ScriptActivity::sort_key(stamp.height, ActivityKind::Vin, &tx.txid, i as u32);
            db.put(&ScriptActivity {
                id: activity_id(&spent.hid, &sort),
                hid: spent.hid.clone(),
                kind: ActivityKind::Vin,
                txid: tx.txid.clone(),
                n: i as u32,
                value: spent.value,
                token_id: spent.token_id,
                script: spent.script.clone(),
                spent: Some(SpentOutput { txid: spent.txid.clone(), n: spent.n }),
                block: stamp.clone(),
            })
            .await?;
            let delta = deltas.entry(spent.hid).or_default();
            delta.script = spent.script;
            delta.in_count += 1;
            delta.in_amount += spent.value;
        }

        for vout in &tx.vout {
            let script = vout.script_pub_key.hex.clone();
            let hid = script_hid(&script)?;
            let value = vout.value_sats();
            db.put(&TransactionVout {
                id: TransactionVout::key(&tx.txid, vout.n),
                txid: tx.txid.clone(),
                n: vout.n,
                value,
                token_id: vout.token_id,
                script: script.clone(),
                hid: hid.clone(),
            })
            .await?;
            let sort = ScriptActivity::sort_key(stamp.height, ActivityKind::Vout, &tx.txid, vout.n);
            db.put(&ScriptActivity {
                id: activity_id(&hid, &sort),
                hid: hid.clone(),
                kind: ActivityKind::Vout,
                txid: tx.txid.clone(),
                n: vout.n,
                value,
                token_id: vout.token_id,
                script: script.clone(),
                spent: None,
                block: stamp.clone(),
            })
            .await?;
            let delta = deltas.entry(hid).or_default();
            delta.script = script;
            delta.out_count += 1;
            delta.out_amount += value;
        }
    }

    let engine = CumulativeEngine::<ScriptAggregation>::new(db, Recurrence::Sparse);
    for (hid, delta) in &deltas {
        engine.apply(hid, delta, &stamp).await?;
    }
    Ok(())
}

pub async fn invalidate(db: &Database, block: &Block) -> Result<(), IndexerError> {
    let height = block.height;
    let engine = CumulativeEngine::<ScriptAggregation>::new(db, Recurrence::Sparse);

    for tx in block.tx.iter().rev() {
        for vout in tx.vout.iter().rev() {
            let hid = script_hid(&vout.script_pub_key.hex)?;
            engine.revert(&hid, height).await?;
            let sort = ScriptActivity::sort_key(height, ActivityKind::Vout, &tx.txid, vout.n);
            db.delete::<ScriptActivity>(&activity_id(&hid, &sort)).await?;
            db.delete::<TransactionVout>(&TransactionVout::key(&tx.txid, vout.n)).await?;
        }
        for i in (0..tx.vin.len()).rev() {
            let Some((txid, n)) = spent_ref(tx, i) else {
                continue;
            };
            let spent = spent_output(db, txid, n).await?;
            engine.revert(&spent.hid, height).await?;
            let sort = ScriptActivity::sort_key(height, ActivityKind::Vin, &tx.txid, i as u32);
            db.delete::<ScriptActivity>(&activity_id(&spent.hid, &sort)).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfindex_core::types::{ScriptPubKey, Vin, Vout};
    use dfindex_storage::Query;

    const ALICE: &str = "0014aa";
    const BOB: &str = "0014bb";

    fn vout(n: u32, value: f64, script: &str) -> Vout {
        Vout {
            value,
            n,
            script_pub_key: ScriptPubKey {
                hex: script.into(),
                kind: "witness_v0_keyhash".into(),
                addresses: vec![],
            },
            token_id: 0,
        }
    }

    fn spend(txid: &str, n: u32) -> Vin {
        Vin {
            coinbase: None,
            txid: Some(txid.into()),
            vout: Some(n),
            sequence: 0,
        }
    }

    fn coinbase_tx(txid: &str, to: &str, value: f64) -> Transaction {
        Transaction {
            txid: txid.into(),
            vin: vec![Vin {
                coinbase: Some("00".into()),
                txid: None,
                vout: None,
                sequence: 0,
            }],
            vout: vec![vout(0, value, to)],
        }
    }

    fn block(height: u32, tx: Vec<Transaction>) -> Block {
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
    async fn balances_follow_spends() {
        let db = Database::memory();
        index(&db, &block(0, vec![coinbase_tx("c0", ALICE, 10.0)])).await.unwrap();
        let before = db.snapshot().await.unwrap();

        let pay = Transaction {
            txid: "p1".into(),
            vin: vec![spend("c0", 0)],
            vout: vec![vout(0, 4.0, BOB), vout(1, 6.0, ALICE)],
        };
        let b1 = block(1, vec![coinbase_tx("c1", BOB, 1.0), pay]);
        index(&db, &b1).await.unwrap();

        let engine = CumulativeEngine::<ScriptAggregation>::new(&db, Recurrence::Sparse);
        let alice = engine.latest(&script_hid(ALICE).unwrap()).await.unwrap().unwrap();
        assert_eq!(alice.amount.unspent, 600_000_000);
        assert_eq!((alice.tx_in_count, alice.tx_out_count), (1, 2));
        let bob = engine.latest(&script_hid(BOB).unwrap()).await.unwrap().unwrap();
        assert_eq!(bob.amount.unspent, 500_000_000);

        let activity = db
            .query::<ScriptActivity>("hid", &Query::desc(10).partition(script_hid(ALICE).unwrap()))
            .await
            .unwrap();
        let kinds: Vec<_> = activity.items.iter().map(|a| (a.block.height, a.kind)).collect();
        assert_eq!(
            kinds,
            vec![(1, ActivityKind::Vout), (1, ActivityKind::Vin), (0, ActivityKind::Vout)]
        );

        invalidate(&db, &b1).await.unwrap();
        assert_eq!(db.snapshot().await.unwrap(), before);
    }

    #[tokio::test]
    async fn unknown_spent_output_is_not_found() {
        let db = Database::memory();
        let orphan = Transaction {
            txid: "x".into(),
            vin: vec![spend("missing", 3)],
            vout: vec![],
        };
        let err = index(&db, &block(5, vec![orphan])).await.unwrap_err();
        assert!(matches!(err, IndexerError::NotFound { model: "TransactionVout", .. }));
    }

    #[test]
    fn hid_is_sha256_of_script_bytes() {
        assert_eq!(
            script_hid("").unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert!(script_hid("zz").is_err());
    }
}
