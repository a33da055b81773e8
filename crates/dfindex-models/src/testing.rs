//! Fixtures shared by the unit tests of this crate.

use dfindex_core::types::{BlockStamp, Transaction};
use dfindex_storage::Provenance;

use crate::context::DfTxContext;

pub fn stamp(height: u32) -> BlockStamp {
    stamp_at(height, 1_600_000_000 + i64::from(height) * 30)
}

pub fn stamp_at(height: u32, time: i64) -> BlockStamp {
    BlockStamp {
        hash: format!("{height:064x}"),
        height,
        time,
        median_time: time,
    }
}

/// Owns the transaction a [`DfTxContext`] borrows.
pub struct TxFixture {
    pub block: BlockStamp,
    pub txno: u32,
    pub tx: Transaction,
}

impl TxFixture {
    pub fn ctx(&self) -> DfTxContext<'_> {
        DfTxContext {
            txno: self.txno,
            tx: &self.tx,
            at: Provenance::new(self.block.clone(), self.txno, self.tx.txid.clone()),
        }
    }
}

pub fn dftx_ctx(block: BlockStamp, txno: u32, txid: &str) -> TxFixture {
    TxFixture {
        block,
        txno,
        tx: Transaction {
            txid: txid.to_string(),
            vin: vec![],
            vout: vec![],
        },
    }
}

/// DAT tokens `BTC` (id 1) and `ETH` (id 2), created at height 1.
pub async fn seed_tokens(db: &dfindex_storage::Database) {
    for (i, symbol) in ["BTC", "ETH"].into_iter().enumerate() {
        let tx = dftx_ctx(stamp(1), i as u32, &format!("tok{i}"));
        let payload = dfindex_dftx::token::CreateToken {
            symbol: symbol.into(),
            name: symbol.into(),
            decimal: 8,
            limit: 0,
            is_dat: true,
            tradeable: true,
            mintable: true,
        };
        crate::token::index_create(db, &tx.ctx(), &payload).await.unwrap();
    }
}
