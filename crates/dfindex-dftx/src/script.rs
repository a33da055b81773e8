//! OP_RETURN script parsing.

use crate::error::DecodeError;

pub const OP_RETURN: u8 = 0x6a;
const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;

/// Marker that opens every DFTX push.
pub const DFTX_MARKER: &[u8; 4] = b"DfTx";

/// Data of the first push following `OP_RETURN`, or `None` when the script
/// is not an `OP_RETURN` script.
pub fn op_return_data(script: &[u8]) -> Result<Option<&[u8]>, DecodeError> {
    let Some((&OP_RETURN, rest)) = script.split_first() else {
        return Ok(None);
    };
    let Some((&opcode, rest)) = rest.split_first() else {
        return Err(DecodeError::InvalidScript {
            reason: "OP_RETURN without push".into(),
        });
    };
    let (len, rest) = match opcode {
        1..=0x4b => (usize::from(opcode), rest),
        OP_PUSHDATA1 => read_len(rest, 1)?,
        OP_PUSHDATA2 => read_len(rest, 2)?,
        OP_PUSHDATA4 => read_len(rest, 4)?,
        other => {
            return Err(DecodeError::InvalidScript {
                reason: format!("opcode 0x{other:02x} is not a data push"),
            })
        }
    };
    rest.get(..len).map(Some).ok_or(DecodeError::InvalidScript {
        reason: format!("push of {len} byte(s) with {} left", rest.len()),
    })
}

fn read_len(bytes: &[u8], width: usize) -> Result<(usize, &[u8]), DecodeError> {
    if bytes.len() < width {
        return Err(DecodeError::InvalidScript {
            reason: "truncated push length".into(),
        });
    }
    let (len, rest) = bytes.split_at(width);
    let mut le = [0u8; 8];
    le[..width].copy_from_slice(len);
    let len = usize::try_from(u64::from_le_bytes(le)).map_err(|_| DecodeError::Overflow { field: "push length" })?;
    Ok((len, rest))
}

/// `OP_RETURN <push data>` with the smallest push opcode for `data`.
pub fn op_return_script(data: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(data.len() + 6);
    script.push(OP_RETURN);
    match data.len() {
        0..=0x4b => script.push(data.len() as u8),
        0x4c..=0xff => {
            script.push(OP_PUSHDATA1);
            script.push(data.len() as u8);
        }
        0x100..=0xffff => {
            script.push(OP_PUSHDATA2);
            script.extend_from_slice(&(data.len() as u16).to_le_bytes());
        }
        _ => {
            script.push(OP_PUSHDATA4);
            script.extend_from_slice(&(data.len() as u32).to_le_bytes());
        }
    }
    script.extend_from_slice(data);
    script
}
