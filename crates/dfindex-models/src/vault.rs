//! Vaults and auction bids.
//!
//! Balances are tracked as the transactions state them. No valuation or
//! collateralization checks happen here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use dfindex_core::error::IndexerError;
use dfindex_core::types::BlockStamp;
use dfindex_dftx::vault::{
    CloseVault, CreateVault, DepositToVault, PaybackLoan, PlaceAuctionBid, TakeLoan, UpdateVault,
    WithdrawFromVault,
};
use dfindex_dftx::{Hash32, TokenAmount};
use dfindex_storage::{encode_u32, Database, History, IndexDef, Model, Query, Versioned};

use crate::context::DfTxContext;
use crate::loan;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vault {
    /// Txid of the creating transaction.
    pub vault_id: String,
    pub owner_script: String,
    pub scheme_id: String,
    pub collateral: BTreeMap<u32, i64>,
    pub loans: BTreeMap<u32, i64>,
    pub created_height: u32,
    pub block: BlockStamp,
}

impl Model for Vault {
    const KIND: &'static str = "Vault";

    fn id(&self) -> String {
        self.vault_id.clone()
    }

    fn indexes() -> Vec<IndexDef<Self>> {
        vec![IndexDef::sorted("owner", |v| v.owner_script.clone(), |v| v.vault_id.clone())]
    }
}

impl Versioned for Vault {
    const HISTORY_KIND: &'static str = "VaultHistory";
}

pub async fn get(db: &Database, vault_id: &str) -> Result<Option<Vault>, IndexerError> {
    db.get::<Vault>(vault_id).await
}

pub async fn by_owner(db: &Database, owner_script: &str) -> Result<Vec<Vault>, IndexerError> {
    db.query_all::<Vault>("owner", Query::asc(100).partition(owner_script))
        .await
}

fn adjust(balances: &mut BTreeMap<u32, i64>, token: u32, delta: i64) {
    let amount = balances.entry(token).or_insert(0);
    *amount += delta;
    if *amount == 0 {
        balances.remove(&token);
    }
}

/// Load the live vault, change it and store the result as a new version.
async fn modify<F>(db: &Database, tx: &DfTxContext<'_>, vault_id: &Hash32, change: F) -> Result<(), IndexerError>
where
    F: FnOnce(&mut Vault),
{
    let id = vault_id.to_hex();
    let mut vault = db.require::<Vault>(&id).await?;
    change(&mut vault);
    vault.block = tx.at.block.clone();
    History::record(db, &id, Some(vault), &tx.at).await
}

async fn revert(db: &Database, tx: &DfTxContext<'_>, vault_id: &Hash32) -> Result<(), IndexerError> {
    History::<Vault>::revert(db, &vault_id.to_hex(), &tx.at).await
}

pub async fn index_create(db: &Database, tx: &DfTxContext<'_>, payload: &CreateVault) -> Result<(), IndexerError> {
    let scheme_id = if payload.scheme_id.is_empty() {
        loan::default_scheme(db)
            .await?
            .map(|d| d.scheme_id)
            .unwrap_or_default()
    } else {
        payload.scheme_id.clone()
    };
    let vault = Vault {
        vault_id: tx.txid().to_string(),
        owner_script: payload.owner_address.to_hex(),
        scheme_id,
        collateral: BTreeMap::new(),
        loans: BTreeMap::new(),
        created_height: tx.height(),
        block: tx.at.block.clone(),
    };
    History::record(db, tx.txid(), Some(vault), &tx.at).await
}

pub async fn invalidate_create(db: &Database, tx: &DfTxContext<'_>, _payload: &CreateVault) -> Result<(), IndexerError> {
    History::<Vault>::revert(db, tx.txid(), &tx.at).await
}

pub async fn index_update(db: &Database, tx: &DfTxContext<'_>, payload: &UpdateVault) -> Result<(), IndexerError> {
    modify(db, tx, &payload.vault_id, |vault| {
        vault.owner_script = payload.owner_address.to_hex();
        if !payload.scheme_id.is_empty() {
            vault.scheme_id = payload.scheme_id.clone();
        }
    })
    .await
}

pub async fn invalidate_update(db: &Database, tx: &DfTxContext<'_>, payload: &UpdateVault) -> Result<(), IndexerError> {
    revert(db, tx, &payload.vault_id).await
}

pub async fn index_deposit(db: &Database, tx: &DfTxContext<'_>, payload: &DepositToVault) -> Result<(), IndexerError> {
    let TokenAmount { token, amount } = payload.amount;
    modify(db, tx, &payload.vault_id, |vault| adjust(&mut vault.collateral, token, amount)).await
}

pub async fn invalidate_deposit(db: &Database, tx: &DfTxContext<'_>, payload: &DepositToVault) -> Result<(), IndexerError> {
    revert(db, tx, &payload.vault_id).await
}

pub async fn index_withdraw(db: &Database, tx: &DfTxContext<'_>, payload: &WithdrawFromVault) -> Result<(), IndexerError> {
    let TokenAmount { token, amount } = payload.amount;
    modify(db, tx, &payload.vault_id, |vault| adjust(&mut vault.collateral, token, -amount)).await
}

pub async fn invalidate_withdraw(db: &Database, tx: &DfTxContext<'_>, payload: &WithdrawFromVault) -> Result<(), IndexerError> {
    revert(db, tx, &payload.vault_id).await
}

pub async fn index_take_loan(db: &Database, tx: &DfTxContext<'_>, payload: &TakeLoan) -> Result<(), IndexerError> {
    modify(db, tx, &payload.vault_id, |vault| {
        for a in &payload.amounts {
            adjust(&mut vault.loans, a.token, a.amount);
        }
    })
    .await
}

pub async fn invalidate_take_loan(db: &Database, tx: &DfTxContext<'_>, payload: &TakeLoan) -> Result<(), IndexerError> {
    revert(db, tx, &payload.vault_id).await
}

pub async fn index_payback(db: &Database, tx: &DfTxContext<'_>, payload: &PaybackLoan) -> Result<(), IndexerError> {
    modify(db, tx, &payload.vault_id, |vault| {
        for a in &payload.amounts {
            adjust(&mut vault.loans, a.token, -a.amount);
        }
    })
    .await
}

pub async fn invalidate_payback(db: &Database, tx: &DfTxContext<'_>, payload: &PaybackLoan) -> Result<(), IndexerError> {
    revert(db, tx, &payload.vault_id).await
}

pub async fn index_close(db: &Database, tx: &DfTxContext<'_>, payload: &CloseVault) -> Result<(), IndexerError> {
    let id = payload.vault_id.to_hex();
    db.require::<Vault>(&id).await?;
    History::<Vault>::record(db, &id, None, &tx.at).await
}

pub async fn invalidate_close(db: &Database, tx: &DfTxContext<'_>, payload: &CloseVault) -> Result<(), IndexerError> {
    revert(db, tx, &payload.vault_id).await
}

// ─── VaultAuctionBid ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultAuctionBid {
    pub vault_id: String,
    /// Auction batch index within the vault.
    pub index: u32,
    pub from: String,
    pub amount: TokenAmount,
    pub sort: String,
    pub txid: String,
    pub block: BlockStamp,
}

impl VaultAuctionBid {
    pub fn auction_key(vault_id: &str, index: u32) -> String {
        format!("{vault_id}-{}", encode_u32(index))
    }
}

impl Model for VaultAuctionBid {
    const KIND: &'static str = "VaultAuctionBid";

    fn id(&self) -> String {
        format!("{}-{}", Self::auction_key(&self.vault_id, self.index), self.sort)
    }

    fn indexes() -> Vec<IndexDef<Self>> {
        vec![IndexDef::sorted(
            "auction",
            |b| VaultAuctionBid::auction_key(&b.vault_id, b.index),
            |b| b.sort.clone(),
        )]
    }
}

fn bid(tx: &DfTxContext<'_>, payload: &PlaceAuctionBid) -> VaultAuctionBid {
    VaultAuctionBid {
        vault_id: payload.vault_id.to_hex(),
        index: payload.index,
        from: payload.from.to_hex(),
        amount: payload.amount,
        sort: tx.at.sort_key(),
        txid: tx.txid().to_string(),
        block: tx.at.block.clone(),
    }
}

pub async fn index_bid(db: &Database, tx: &DfTxContext<'_>, payload: &PlaceAuctionBid) -> Result<(), IndexerError> {
    db.put(&bid(tx, payload)).await
}

pub async fn invalidate_bid(db: &Database, tx: &DfTxContext<'_>, payload: &PlaceAuctionBid) -> Result<(), IndexerError> {
    db.delete::<VaultAuctionBid>(&bid(tx, payload).id()).await?;
    Ok(())
}

/// Bids on one auction batch, highest (latest) first.
pub async fn bids(db: &Database, vault_id: &str, index: u32, limit: usize) -> Result<Vec<VaultAuctionBid>, IndexerError> {
    let query = Query::desc(limit).partition(VaultAuctionBid::auction_key(vault_id, index));
    Ok(db.query::<VaultAuctionBid>("auction", &query).await?.items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{dftx_ctx, stamp};
    use dfindex_dftx::loan::{CreateLoanScheme, SetDefaultLoanScheme};
    use dfindex_dftx::Script;

    const VAULT: &str = "0101010101010101010101010101010101010101010101010101010101010101";

    fn vault_id() -> Hash32 {
        Hash32::from_hex(VAULT).unwrap()
    }

    async fn with_default_scheme(db: &Database) {
        let tx = dftx_ctx(stamp(1), 1, "scheme");
        let payload = CreateLoanScheme {
            ratio: 150,
            rate: 1,
            identifier: "MIN150".into(),
            update: 0,
        };
        loan::index_create(db, &tx.ctx(), &payload).await.unwrap();
        let set = dftx_ctx(stamp(1), 2, "default");
        loan::index_set_default(db, &set.ctx(), &SetDefaultLoanScheme { identifier: "MIN150".into() })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn lifecycle_and_exact_reverts() {
        let db = Database::memory();
        with_default_scheme(&db).await;
        let created = dftx_ctx(stamp(2), 1, VAULT);
        let create = CreateVault {
            owner_address: Script(vec![0x51]),
            scheme_id: String::new(),
        };
        index_create(&db, &created.ctx(), &create).await.unwrap();
        assert_eq!(get(&db, VAULT).await.unwrap().unwrap().scheme_id, "MIN150");
        let created_state = db.snapshot().await.unwrap();

        let deposit = DepositToVault {
            vault_id: vault_id(),
            from: Script(vec![0x51]),
            amount: TokenAmount { token: 0, amount: 1_000 },
        };
        let dtx = dftx_ctx(stamp(3), 1, "dep");
        index_deposit(&db, &dtx.ctx(), &deposit).await.unwrap();

        let take = TakeLoan {
            vault_id: vault_id(),
            to: Script(vec![0x51]),
            amounts: vec![TokenAmount { token: 5, amount: 40 }],
        };
        let ttx = dftx_ctx(stamp(3), 2, "take");
        index_take_loan(&db, &ttx.ctx(), &take).await.unwrap();

        let payback = PaybackLoan {
            vault_id: vault_id(),
            from: Script(vec![0x51]),
            amounts: vec![TokenAmount { token: 5, amount: 40 }],
        };
        let ptx = dftx_ctx(stamp(4), 1, "pay");
        index_payback(&db, &ptx.ctx(), &payback).await.unwrap();

        let vault = get(&db, VAULT).await.unwrap().unwrap();
        assert_eq!(vault.collateral.get(&0), Some(&1_000));
        assert!(vault.loans.is_empty());
        assert_eq!(by_owner(&db, "51").await.unwrap().len(), 1);

        let close = CloseVault {
            vault_id: vault_id(),
            to: Script(vec![0x51]),
        };
        let ctx = dftx_ctx(stamp(5), 1, "close");
        index_close(&db, &ctx.ctx(), &close).await.unwrap();
        assert!(get(&db, VAULT).await.unwrap().is_none());

        invalidate_close(&db, &ctx.ctx(), &close).await.unwrap();
        invalidate_payback(&db, &ptx.ctx(), &payback).await.unwrap();
        assert_eq!(get(&db, VAULT).await.unwrap().unwrap().loans.get(&5), Some(&40));
        invalidate_take_loan(&db, &ttx.ctx(), &take).await.unwrap();
        invalidate_deposit(&db, &dtx.ctx(), &deposit).await.unwrap();
        assert_eq!(db.snapshot().await.unwrap(), created_state);
    }

    #[tokio::test]
    async fn bids_are_listed_per_batch() {
        let db = Database::memory();
        for (txno, amount) in [(1, 100), (2, 150)] {
            let tx = dftx_ctx(stamp(9), txno, &format!("bid{txno}"));
            let payload = PlaceAuctionBid {
                vault_id: vault_id(),
                index: 0,
                from: Script(vec![0x51]),
                amount: TokenAmount { token: 2, amount },
            };
            index_bid(&db, &tx.ctx(), &payload).await.unwrap();
        }
        let listed = bids(&db, VAULT, 0, 10).await.unwrap();
        assert_eq!(listed[0].amount.amount, 150);
        assert!(bids(&db, VAULT, 1, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deposit_into_unknown_vault_is_not_found() {
        let db = Database::memory();
        let payload = DepositToVault {
            vault_id: vault_id(),
            from: Script(vec![0x51]),
            amount: TokenAmount { token: 0, amount: 1 },
        };
        let tx = dftx_ctx(stamp(3), 1, "dep");
        let err = index_deposit(&db, &tx.ctx(), &payload).await.unwrap_err();
        assert!(matches!(err, IndexerError::NotFound { model: "Vault", .. }));
    }
}
