//! Byte-level primitives shared by every DFTX payload.
//!
//! Integers are little-endian, lengths are Bitcoin CompactSize, token ids are
//! Bitcoin VARINT (base-128, MSB continuation, each continuation byte offset
//! by one) and 32-byte ids are stored in reversed byte order.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DecodeError;

/// A value with a DFTX wire form.
pub trait Encodable: Sized {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError>;
    fn encode(&self, w: &mut Writer);
}

// ─── Reader ─────────────────────────────────────────────────────────────────

pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if n > self.remaining() {
            return Err(DecodeError::UnexpectedEnd {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.u8()? != 0)
    }

    pub fn u16_le(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32_le(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn u64_le(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn i64_le(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub fn compact_size(&mut self) -> Result<u64, DecodeError> {
        match self.u8()? {
            0xfd => Ok(u64::from(self.u16_le()?)),
            0xfe => Ok(u64::from(self.u32_le()?)),
            0xff => self.u64_le(),
            n => Ok(u64::from(n)),
        }
    }

    /// CompactSize element count, bounded by the bytes left so a corrupt
    /// length cannot trigger a huge allocation.
    pub fn count(&mut self) -> Result<usize, DecodeError> {
        let n = self.compact_size()?;
        let remaining = self.remaining();
        match usize::try_from(n) {
            Ok(n) if n <= remaining => Ok(n),
            _ => Err(DecodeError::UnexpectedEnd {
                needed: usize::try_from(n).unwrap_or(usize::MAX),
                remaining,
            }),
        }
    }

    pub fn varint(&mut self) -> Result<u64, DecodeError> {
        let mut n: u64 = 0;
        loop {
            let byte = self.u8()?;
            if n > (u64::MAX >> 7) {
                return Err(DecodeError::Overflow { field: "varint" });
            }
            n = (n << 7) | u64::from(byte & 0x7f);
            if byte & 0x80 == 0 {
                return Ok(n);
            }
            n = n.checked_add(1).ok_or(DecodeError::Overflow { field: "varint" })?;
        }
    }

    /// VARINT token id.
    pub fn token_id(&mut self) -> Result<u32, DecodeError> {
        u32::try_from(self.varint()?).map_err(|_| DecodeError::Overflow { field: "token id" })
    }

    pub fn bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.count()?;
        Ok(self.take(len)?.to_vec())
    }

    pub fn string(&mut self, field: &'static str) -> Result<String, DecodeError> {
        String::from_utf8(self.bytes()?).map_err(|_| DecodeError::InvalidUtf8 { field })
    }

    pub fn vec<T: Encodable>(&mut self) -> Result<Vec<T>, DecodeError> {
        let n = self.count()?;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(T::decode(self)?);
        }
        Ok(out)
    }
}

// ─── Writer ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn bool(&mut self, v: bool) {
        self.u8(u8::from(v));
    }

    pub fn u32_le(&mut self, v: u32) {
        self.raw(&v.to_le_bytes());
    }

    pub fn u64_le(&mut self, v: u64) {
        self.raw(&v.to_le_bytes());
    }

    pub fn i64_le(&mut self, v: i64) {
        self.raw(&v.to_le_bytes());
    }

    pub fn compact_size(&mut self, n: u64) {
        match n {
            0..=0xfc => self.u8(n as u8),
            0xfd..=0xffff => {
                self.u8(0xfd);
                self.raw(&(n as u16).to_le_bytes());
            }
            0x1_0000..=0xffff_ffff => {
                self.u8(0xfe);
                self.raw(&(n as u32).to_le_bytes());
            }
            _ => {
                self.u8(0xff);
                self.u64_le(n);
            }
        }
    }

    pub fn varint(&mut self, mut n: u64) {
        let mut tmp = Vec::with_capacity(10);
        loop {
            let continuation = if tmp.is_empty() { 0x00 } else { 0x80 };
            tmp.push((n & 0x7f) as u8 | continuation);
            if n <= 0x7f {
                break;
            }
            n = (n >> 7) - 1;
        }
        tmp.reverse();
        self.raw(&tmp);
    }

    pub fn token_id(&mut self, id: u32) {
        self.varint(u64::from(id));
    }

    pub fn bytes(&mut self, bytes: &[u8]) {
        self.compact_size(bytes.len() as u64);
        self.raw(bytes);
    }

    pub fn string(&mut self, s: &str) {
        self.bytes(s.as_bytes());
    }

    pub fn vec<T: Encodable>(&mut self, items: &[T]) {
        self.compact_size(items.len() as u64);
        for item in items {
            item.encode(self);
        }
    }
}

// ─── Script ─────────────────────────────────────────────────────────────────

/// Raw script bytes, hex-encoded in text form.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Script(pub Vec<u8>);

impl Script {
    pub fn from_hex(s: &str) -> Result<Self, DecodeError> {
        hex::decode(s)
            .map(Script)
            .map_err(|e| DecodeError::InvalidHex(e.to_string()))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script({})", self.to_hex())
    }
}

impl Encodable for Script {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.bytes().map(Script)
    }

    fn encode(&self, w: &mut Writer) {
        w.bytes(&self.0);
    }
}

impl Serialize for Script {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Script {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Script::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ─── Hash32 ─────────────────────────────────────────────────────────────────

/// 32-byte id (txid, oracle id, vault id). Stored reversed on the wire and
/// displayed in the usual RPC order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    pub fn from_hex(s: &str) -> Result<Self, DecodeError> {
        let bytes = hex::decode(s).map_err(|e| DecodeError::InvalidHex(e.to_string()))?;
        let mut out: [u8; 32] = bytes
            .try_into()
            .map_err(|_| DecodeError::InvalidHex(format!("expected 32 bytes: {s}")))?;
        out.reverse();
        Ok(Hash32(out))
    }

    pub fn to_hex(&self) -> String {
        let mut display = self.0;
        display.reverse();
        hex::encode(display)
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

impl Encodable for Hash32 {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.array().map(Hash32)
    }

    fn encode(&self, w: &mut Writer) {
        w.raw(&self.0);
    }
}

impl Serialize for Hash32 {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash32 {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Hash32::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ─── Token amounts ──────────────────────────────────────────────────────────

/// `{token id, amount in satoshi}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
    pub token: u32,
    pub amount: i64,
}

impl Encodable for TokenAmount {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(TokenAmount {
            token: r.token_id()?,
            amount: r.i64_le()?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        w.token_id(self.token);
        w.i64_le(self.amount);
    }
}

/// A script and the balances it moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptBalances {
    pub script: Script,
    pub balances: Vec<TokenAmount>,
}

impl Encodable for ScriptBalances {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(ScriptBalances {
            script: Script::decode(r)?,
            balances: r.vec()?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        self.script.encode(w);
        w.vec(&self.balances);
    }
}
