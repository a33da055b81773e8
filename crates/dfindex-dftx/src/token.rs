//! Token payloads.

use serde::{Deserialize, Serialize};

use crate::codec::{Encodable, Reader, TokenAmount, Writer};
use crate::error::DecodeError;

/// `T`: create a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateToken {
    pub symbol: String,
    pub name: String,
    pub decimal: u8,
    pub limit: i64,
    pub is_dat: bool,
    pub tradeable: bool,
    pub mintable: bool,
}

impl Encodable for CreateToken {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(CreateToken {
            symbol: r.string("symbol")?,
            name: r.string("name")?,
            decimal: r.u8()?,
            limit: r.i64_le()?,
            is_dat: r.bool()?,
            tradeable: r.bool()?,
            mintable: r.bool()?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        w.string(&self.symbol);
        w.string(&self.name);
        w.u8(self.decimal);
        w.i64_le(self.limit);
        w.bool(self.is_dat);
        w.bool(self.tradeable);
        w.bool(self.mintable);
    }
}

/// `M`: mint amounts of existing tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintToken {
    pub balances: Vec<TokenAmount>,
}

impl Encodable for MintToken {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(MintToken { balances: r.vec()? })
    }

    fn encode(&self, w: &mut Writer) {
        w.vec(&self.balances);
    }
}
