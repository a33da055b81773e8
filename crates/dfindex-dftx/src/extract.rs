//! Per-transaction DFTX extraction.

use tracing::{debug, trace, warn};

use dfindex_core::types::{Block, Transaction};

use crate::codec::Script;
use crate::dftx::DfTx;
use crate::error::DecodeError;
use crate::script::op_return_data;

/// A DFTX found in a block, with its in-block position.
#[derive(Debug, Clone)]
pub struct Extracted<'a> {
    pub txno: u32,
    pub tx: &'a Transaction,
    pub dftx: DfTx,
}

/// OP_RETURN payload of one output. An output whose script does not parse
/// carries no DFTX and is passed over.
fn op_return_payload<'a>(tx: &Transaction, n: u32, script: &'a Script) -> Option<&'a [u8]> {
    match op_return_data(&script.0) {
        Ok(data) => data,
        Err(e) => {
            trace!(txid = %tx.txid, vout = n, error = %e, "malformed output script skipped");
            None
        }
    }
}

/// Decode the first DFTX output of `tx`. Outputs with malformed scripts are
/// skipped; a malformed DFTX payload fails the whole transaction.
pub fn decode_transaction(tx: &Transaction) -> Result<Option<DfTx>, DecodeError> {
    for vout in &tx.vout {
        let script = match Script::from_hex(&vout.script_pub_key.hex) {
            Ok(script) => script,
            Err(e) => {
                trace!(txid = %tx.txid, vout = vout.n, error = %e, "undecodable output script skipped");
                continue;
            }
        };
        let Some(data) = op_return_payload(tx, vout.n, &script) else {
            continue;
        };
        if let Some(dftx) = DfTx::from_push(data)? {
            return Ok(Some(dftx));
        }
    }
    Ok(None)
}

/// Like [`decode_transaction`], but malformed payloads are logged and
/// treated as absent.
pub fn extract(tx: &Transaction) -> Option<DfTx> {
    match decode_transaction(tx) {
        Ok(dftx) => dftx,
        Err(DecodeError::UnknownType(tag)) => {
            debug!(txid = %tx.txid, tag, "unhandled DFTX type skipped");
            None
        }
        Err(e) => {
            warn!(txid = %tx.txid, error = %e, "DFTX decode failed, transaction skipped");
            None
        }
    }
}

/// Every decodable DFTX in `block`, in transaction order.
pub fn extract_block(block: &Block) -> Vec<Extracted<'_>> {
    block
        .tx
        .iter()
        .enumerate()
        .filter_map(|(txno, tx)| {
            extract(tx).map(|dftx| Extracted {
                txno: txno as u32,
                tx,
                dftx,
            })
        })
        .collect()
}
