//! dfindex-dftx: DFTX payload codec and extraction.
//!
//! A DFTX is a custom chain operation carried in an `OP_RETURN` output:
//!
//! ```text
//! OP_RETURN <push: "DfTx" | type tag (1 byte) | payload>
//! ```
//!
//! Every payload can be decoded and encoded. Extraction never fails a block:
//! foreign or malformed scripts are logged and skipped.

pub mod codec;
pub mod dftx;
pub mod error;
pub mod extract;
pub mod loan;
pub mod oracle;
pub mod pool;
pub mod script;
pub mod token;
pub mod vault;

pub use codec::{Encodable, Hash32, Reader, Script, ScriptBalances, TokenAmount, Writer};
pub use dftx::{DfTx, DfTxType};
pub use error::DecodeError;
pub use extract::{decode_transaction, extract, extract_block, Extracted};
