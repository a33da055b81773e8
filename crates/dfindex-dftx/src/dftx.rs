//! The DFTX envelope: marker, one-byte type tag, payload.

use serde::{Deserialize, Serialize};

use crate::codec::{Encodable, Reader, Writer};
use crate::error::DecodeError;
use crate::loan::{CreateLoanScheme, DestroyLoanScheme, SetDefaultLoanScheme};
use crate::oracle::{AppointOracle, RemoveOracle, SetOracleData, UpdateOracle};
use crate::pool::{AddLiquidity, CompositeSwap, CreatePoolPair, PoolSwap, RemoveLiquidity, UpdatePoolPair};
use crate::script::{op_return_script, DFTX_MARKER};
use crate::token::{CreateToken, MintToken};
use crate::vault::{
    CloseVault, CreateVault, DepositToVault, PaybackLoan, PlaceAuctionBid, TakeLoan, UpdateVault,
    WithdrawFromVault,
};

macro_rules! dftx_types {
    ($($variant:ident = $tag:literal,)+) => {
        /// Opcode of a DFTX payload.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum DfTxType {
            $($variant,)+
        }

        impl DfTxType {
            pub const ALL: &'static [DfTxType] = &[$(DfTxType::$variant,)+];

            /// Wire tag byte.
            pub fn tag(self) -> u8 {
                match self {
                    $(DfTxType::$variant => $tag,)+
                }
            }

            pub fn from_tag(tag: u8) -> Option<Self> {
                match tag {
                    $($tag => Some(DfTxType::$variant),)+
                    _ => None,
                }
            }
        }

        /// A decoded DFTX payload.
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(tag = "type", content = "data")]
        pub enum DfTx {
            $($variant($variant),)+
        }

        impl DfTx {
            pub fn kind(&self) -> DfTxType {
                match self {
                    $(DfTx::$variant(_) => DfTxType::$variant,)+
                }
            }

            fn decode_payload(kind: DfTxType, r: &mut Reader<'_>) -> Result<Self, DecodeError> {
                match kind {
                    $(DfTxType::$variant => $variant::decode(r).map(DfTx::$variant),)+
                }
            }

            fn encode_payload(&self, w: &mut Writer) {
                match self {
                    $(DfTx::$variant(payload) => payload.encode(w),)+
                }
            }
        }
    };
}

dftx_types! {
    CreateToken = b'T',
    MintToken = b'M',
    CreatePoolPair = b'p',
    UpdatePoolPair = b'u',
    PoolSwap = b's',
    CompositeSwap = b'i',
    AddLiquidity = b'l',
    RemoveLiquidity = b'r',
    AppointOracle = b'o',
    UpdateOracle = b't',
    RemoveOracle = b'h',
    SetOracleData = b'y',
    CreateLoanScheme = b'L',
    DestroyLoanScheme = b'D',
    SetDefaultLoanScheme = b'd',
    CreateVault = b'V',
    UpdateVault = b'v',
    DepositToVault = b'S',
    WithdrawFromVault = b'J',
    TakeLoan = b'X',
    PaybackLoan = b'H',
    CloseVault = b'e',
    PlaceAuctionBid = b'I',
}

impl std::fmt::Display for DfTxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl DfTx {
    /// Decode the data of an OP_RETURN push.
    ///
    /// `Ok(None)` when the push does not carry the DFTX marker.
    pub fn from_push(data: &[u8]) -> Result<Option<Self>, DecodeError> {
        let Some(body) = data.strip_prefix(DFTX_MARKER.as_slice()) else {
            return Ok(None);
        };
        let mut r = Reader::new(body);
        let tag = r.u8()?;
        let kind = DfTxType::from_tag(tag).ok_or(DecodeError::UnknownType(tag))?;
        Self::decode_payload(kind, &mut r).map(Some)
    }

    /// Marker, tag and payload.
    pub fn to_push(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.raw(DFTX_MARKER);
        w.u8(self.kind().tag());
        self.encode_payload(&mut w);
        w.into_bytes()
    }

    /// Full `OP_RETURN` script carrying this payload.
    pub fn to_script(&self) -> Vec<u8> {
        op_return_script(&self.to_push())
    }
}
