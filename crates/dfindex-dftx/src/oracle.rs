//! Oracle payloads.

use serde::{Deserialize, Serialize};

use crate::codec::{Encodable, Hash32, Reader, Script, Writer};
use crate::error::DecodeError;

/// A `{token, currency}` price feed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub token: String,
    pub currency: String,
}

impl CurrencyPair {
    pub fn new(token: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            currency: currency.into(),
        }
    }

    /// `{token}-{currency}`.
    pub fn key(&self) -> String {
        format!("{}-{}", self.token, self.currency)
    }
}

impl Encodable for CurrencyPair {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(CurrencyPair {
            token: r.string("token")?,
            currency: r.string("currency")?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        w.string(&self.token);
        w.string(&self.currency);
    }
}

/// `o`: appoint an oracle. Its id is the appointing txid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointOracle {
    pub script: Script,
    pub weightage: u8,
    pub price_feeds: Vec<CurrencyPair>,
}

impl Encodable for AppointOracle {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(AppointOracle {
            script: Script::decode(r)?,
            weightage: r.u8()?,
            price_feeds: r.vec()?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        self.script.encode(w);
        w.u8(self.weightage);
        w.vec(&self.price_feeds);
    }
}

/// `t`: replace an oracle's address, weight and feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOracle {
    pub oracle_id: Hash32,
    pub script: Script,
    pub weightage: u8,
    pub price_feeds: Vec<CurrencyPair>,
}

impl Encodable for UpdateOracle {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(UpdateOracle {
            oracle_id: Hash32::decode(r)?,
            script: Script::decode(r)?,
            weightage: r.u8()?,
            price_feeds: r.vec()?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        self.oracle_id.encode(w);
        self.script.encode(w);
        w.u8(self.weightage);
        w.vec(&self.price_feeds);
    }
}

/// `h`: remove an oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveOracle {
    pub oracle_id: Hash32,
}

impl Encodable for RemoveOracle {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(RemoveOracle {
            oracle_id: Hash32::decode(r)?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        self.oracle_id.encode(w);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyAmount {
    pub currency: String,
    pub amount: i64,
}

impl Encodable for CurrencyAmount {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(CurrencyAmount {
            currency: r.string("currency")?,
            amount: r.i64_le()?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        w.string(&self.currency);
        w.i64_le(self.amount);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPrice {
    pub token: String,
    pub prices: Vec<CurrencyAmount>,
}

impl Encodable for TokenPrice {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(TokenPrice {
            token: r.string("token")?,
            prices: r.vec()?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        w.string(&self.token);
        w.vec(&self.prices);
    }
}

/// `y`: publish prices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetOracleData {
    pub oracle_id: Hash32,
    /// Unix seconds the oracle claims for these prices.
    pub timestamp: i64,
    pub token_prices: Vec<TokenPrice>,
}

impl SetOracleData {
    /// Flattened `(pair, amount)` list in payload order.
    pub fn feeds(&self) -> impl Iterator<Item = (CurrencyPair, i64)> + '_ {
        self.token_prices.iter().flat_map(|tp| {
            tp.prices
                .iter()
                .map(move |p| (CurrencyPair::new(tp.token.clone(), p.currency.clone()), p.amount))
        })
    }
}

impl Encodable for SetOracleData {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(SetOracleData {
            oracle_id: Hash32::decode(r)?,
            timestamp: r.i64_le()?,
            token_prices: r.vec()?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        self.oracle_id.encode(w);
        w.i64_le(self.timestamp);
        w.vec(&self.token_prices);
    }
}
