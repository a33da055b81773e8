//! Vault and auction payloads.

use serde::{Deserialize, Serialize};

use crate::codec::{Encodable, Hash32, Reader, Script, TokenAmount, Writer};
use crate::error::DecodeError;

/// `V`: open a vault. Its id is the creating txid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateVault {
    pub owner_address: Script,
    /// Empty selects the default scheme.
    pub scheme_id: String,
}

impl Encodable for CreateVault {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(CreateVault {
            owner_address: Script::decode(r)?,
            scheme_id: r.string("scheme id")?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        self.owner_address.encode(w);
        w.string(&self.scheme_id);
    }
}

/// `v`: change a vault's owner or scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateVault {
    pub vault_id: Hash32,
    pub owner_address: Script,
    pub scheme_id: String,
}

impl Encodable for UpdateVault {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(UpdateVault {
            vault_id: Hash32::decode(r)?,
            owner_address: Script::decode(r)?,
            scheme_id: r.string("scheme id")?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        self.vault_id.encode(w);
        self.owner_address.encode(w);
        w.string(&self.scheme_id);
    }
}

/// `S`: move collateral into a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositToVault {
    pub vault_id: Hash32,
    pub from: Script,
    pub amount: TokenAmount,
}

impl Encodable for DepositToVault {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(DepositToVault {
            vault_id: Hash32::decode(r)?,
            from: Script::decode(r)?,
            amount: TokenAmount::decode(r)?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        self.vault_id.encode(w);
        self.from.encode(w);
        self.amount.encode(w);
    }
}

/// `J`: move collateral out of a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawFromVault {
    pub vault_id: Hash32,
    pub to: Script,
    pub amount: TokenAmount,
}

impl Encodable for WithdrawFromVault {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(WithdrawFromVault {
            vault_id: Hash32::decode(r)?,
            to: Script::decode(r)?,
            amount: TokenAmount::decode(r)?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        self.vault_id.encode(w);
        self.to.encode(w);
        self.amount.encode(w);
    }
}

/// `X`: borrow loan tokens against a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeLoan {
    pub vault_id: Hash32,
    pub to: Script,
    pub amounts: Vec<TokenAmount>,
}

impl Encodable for TakeLoan {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(TakeLoan {
            vault_id: Hash32::decode(r)?,
            to: Script::decode(r)?,
            amounts: r.vec()?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        self.vault_id.encode(w);
        self.to.encode(w);
        w.vec(&self.amounts);
    }
}

/// `H`: repay loan tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaybackLoan {
    pub vault_id: Hash32,
    pub from: Script,
    pub amounts: Vec<TokenAmount>,
}

impl Encodable for PaybackLoan {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(PaybackLoan {
            vault_id: Hash32::decode(r)?,
            from: Script::decode(r)?,
            amounts: r.vec()?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        self.vault_id.encode(w);
        self.from.encode(w);
        w.vec(&self.amounts);
    }
}

/// `e`: close an empty vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseVault {
    pub vault_id: Hash32,
    pub to: Script,
}

impl Encodable for CloseVault {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(CloseVault {
            vault_id: Hash32::decode(r)?,
            to: Script::decode(r)?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        self.vault_id.encode(w);
        self.to.encode(w);
    }
}

/// `I`: bid on one batch of a vault in liquidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceAuctionBid {
    pub vault_id: Hash32,
    pub index: u32,
    pub from: Script,
    pub amount: TokenAmount,
}

impl Encodable for PlaceAuctionBid {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(PlaceAuctionBid {
            vault_id: Hash32::decode(r)?,
            index: r.u32_le()?,
            from: Script::decode(r)?,
            amount: TokenAmount::decode(r)?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        self.vault_id.encode(w);
        w.u32_le(self.index);
        self.from.encode(w);
        self.amount.encode(w);
    }
}
