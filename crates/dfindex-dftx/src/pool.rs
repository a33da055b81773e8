//! Pool pair, liquidity and swap payloads.

use serde::{Deserialize, Serialize};

use crate::codec::{Encodable, Reader, Script, ScriptBalances, TokenAmount, Writer};
use crate::error::DecodeError;

/// `p`: create a pool pair between two tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePoolPair {
    pub token_a: u32,
    pub token_b: u32,
    /// Fee in satoshi units of 1.0.
    pub commission: i64,
    pub owner_address: Script,
    pub status: bool,
    pub pair_symbol: String,
    pub custom_rewards: Vec<TokenAmount>,
}

impl Encodable for CreatePoolPair {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(CreatePoolPair {
            token_a: r.token_id()?,
            token_b: r.token_id()?,
            commission: r.i64_le()?,
            owner_address: Script::decode(r)?,
            status: r.bool()?,
            pair_symbol: r.string("pair symbol")?,
            custom_rewards: r.vec()?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        w.token_id(self.token_a);
        w.token_id(self.token_b);
        w.i64_le(self.commission);
        self.owner_address.encode(w);
        w.bool(self.status);
        w.string(&self.pair_symbol);
        w.vec(&self.custom_rewards);
    }
}

/// `u`: change pool status, commission, owner or rewards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePoolPair {
    pub pool_id: u32,
    pub status: bool,
    pub commission: i64,
    pub owner_address: Script,
    pub custom_rewards: Vec<TokenAmount>,
}

impl Encodable for UpdatePoolPair {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(UpdatePoolPair {
            pool_id: r.token_id()?,
            status: r.u32_le()? != 0,
            commission: r.i64_le()?,
            owner_address: Script::decode(r)?,
            custom_rewards: r.vec()?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        w.token_id(self.pool_id);
        w.u32_le(u32::from(self.status));
        w.i64_le(self.commission);
        self.owner_address.encode(w);
        w.vec(&self.custom_rewards);
    }
}

/// `s`: swap through the single pool holding both tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSwap {
    pub from_script: Script,
    pub from_token_id: u32,
    pub from_amount: i64,
    pub to_script: Script,
    pub to_token_id: u32,
    pub max_price_integer: i64,
    pub max_price_fraction: i64,
}

impl Encodable for PoolSwap {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(PoolSwap {
            from_script: Script::decode(r)?,
            from_token_id: r.token_id()?,
            from_amount: r.i64_le()?,
            to_script: Script::decode(r)?,
            to_token_id: r.token_id()?,
            max_price_integer: r.i64_le()?,
            max_price_fraction: r.i64_le()?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        self.from_script.encode(w);
        w.token_id(self.from_token_id);
        w.i64_le(self.from_amount);
        self.to_script.encode(w);
        w.token_id(self.to_token_id);
        w.i64_le(self.max_price_integer);
        w.i64_le(self.max_price_fraction);
    }
}

/// `i`: swap along an explicit path of pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeSwap {
    pub pool_swap: PoolSwap,
    pub pools: Vec<u32>,
}

impl Encodable for CompositeSwap {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let pool_swap = PoolSwap::decode(r)?;
        let n = r.count()?;
        let mut pools = Vec::with_capacity(n);
        for _ in 0..n {
            pools.push(r.token_id()?);
        }
        Ok(CompositeSwap { pool_swap, pools })
    }

    fn encode(&self, w: &mut Writer) {
        self.pool_swap.encode(w);
        w.compact_size(self.pools.len() as u64);
        for pool in &self.pools {
            w.token_id(*pool);
        }
    }
}

/// `l`: add liquidity from one or more scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLiquidity {
    pub from: Vec<ScriptBalances>,
    pub share_address: Script,
}

impl Encodable for AddLiquidity {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(AddLiquidity {
            from: r.vec()?,
            share_address: Script::decode(r)?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        w.vec(&self.from);
        self.share_address.encode(w);
    }
}

/// `r`: burn LP tokens for the underlying pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveLiquidity {
    pub script: Script,
    pub amount: TokenAmount,
}

impl Encodable for RemoveLiquidity {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(RemoveLiquidity {
            script: Script::decode(r)?,
            amount: TokenAmount::decode(r)?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        self.script.encode(w);
        self.amount.encode(w);
    }
}
