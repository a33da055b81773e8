//! Error types for DFTX decoding.

use thiserror::Error;

/// Why a candidate output could not be decoded.
///
/// Never fatal for a block: the extractor logs the error and skips the
/// transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Unexpected end of payload: needed {needed} byte(s), {remaining} left")]
    UnexpectedEnd { needed: usize, remaining: usize },

    #[error("Unknown DFTX type 0x{0:02x}")]
    UnknownType(u8),

    #[error("Invalid script: {reason}")]
    InvalidScript { reason: String },

    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("Invalid UTF-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    #[error("Integer overflow while reading {field}")]
    Overflow { field: &'static str },

    #[error("{0}")]
    Other(String),
}
