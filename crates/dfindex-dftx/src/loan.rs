//! Loan scheme payloads.

use serde::{Deserialize, Serialize};

use crate::codec::{Encodable, Reader, Writer};
use crate::error::DecodeError;

/// `L`: create a loan scheme, or update an existing one.
///
/// `update == 0` takes effect in its own block; any other value is the
/// activation height of a scheduled update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateLoanScheme {
    /// Minimum collateralization ratio in percent.
    pub ratio: u32,
    /// Interest rate in satoshi units of one percent.
    pub rate: i64,
    pub identifier: String,
    pub update: u64,
}

impl Encodable for CreateLoanScheme {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(CreateLoanScheme {
            ratio: r.u32_le()?,
            rate: r.i64_le()?,
            identifier: r.string("identifier")?,
            update: r.u64_le()?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        w.u32_le(self.ratio);
        w.i64_le(self.rate);
        w.string(&self.identifier);
        w.u64_le(self.update);
    }
}

/// `D`: destroy a loan scheme, now (`height == 0`) or at `height`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyLoanScheme {
    pub identifier: String,
    pub height: u64,
}

impl Encodable for DestroyLoanScheme {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(DestroyLoanScheme {
            identifier: r.string("identifier")?,
            height: r.u64_le()?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        w.string(&self.identifier);
        w.u64_le(self.height);
    }
}

/// `d`: make a scheme the default for new vaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetDefaultLoanScheme {
    pub identifier: String,
}

impl Encodable for SetDefaultLoanScheme {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(SetDefaultLoanScheme {
            identifier: r.string("identifier")?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        w.string(&self.identifier);
    }
}
