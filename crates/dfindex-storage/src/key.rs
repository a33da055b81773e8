//! Persisted key encoding.
//!
//! Numeric key parts are fixed-width big-endian hex so that byte order equals
//! numeric order. These formats are part of the on-disk layout.

/// 4-byte height as 8 lowercase hex chars.
pub fn encode_height(height: u32) -> String {
    format!("{height:08x}")
}

/// Any `u32` key part (token ids, in-block order, output index).
pub fn encode_u32(value: u32) -> String {
    format!("{value:08x}")
}

/// Inverse of [`encode_height`]/[`encode_u32`] for the leading 8 chars.
pub fn decode_u32(encoded: &str) -> Option<u32> {
    encoded
        .get(..8)
        .and_then(|s| u32::from_str_radix(s, 16).ok())
}

/// `{height}-{txno}-{txid}`: total order for per-transaction rows, unique
/// even when one block holds several operations of the same kind.
pub fn height_sort_key(height: u32, txno: u32, txid: &str) -> String {
    format!("{}-{}-{}", encode_height(height), encode_u32(txno), txid)
}

/// Raw key layout.
///
/// Primary rows live under `m\0{kind}\0{id}`, index entries under
/// `i\0{kind}\0{index}\0{partition}` with `\0{sort}` appended for sorted
/// indexes.
pub(crate) mod raw {
    pub const SEP: u8 = 0;

    pub fn primary(kind: &str, id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(kind.len() + id.len() + 3);
        key.push(b'm');
        key.push(SEP);
        key.extend_from_slice(kind.as_bytes());
        key.push(SEP);
        key.extend_from_slice(id.as_bytes());
        key
    }

    pub fn index_prefix(kind: &str, index: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(kind.len() + index.len() + 4);
        key.push(b'i');
        key.push(SEP);
        key.extend_from_slice(kind.as_bytes());
        key.push(SEP);
        key.extend_from_slice(index.as_bytes());
        key.push(SEP);
        key
    }

    /// Prefix holding every sort key of one partition.
    pub fn partition_prefix(kind: &str, index: &str, partition: &str) -> Vec<u8> {
        let mut key = index_prefix(kind, index);
        key.extend_from_slice(partition.as_bytes());
        key.push(SEP);
        key
    }

    pub fn index_entry(kind: &str, index: &str, partition: &str, sort: Option<&str>) -> Vec<u8> {
        match sort {
            Some(sort) => {
                let mut key = partition_prefix(kind, index, partition);
                key.extend_from_slice(sort.as_bytes());
                key
            }
            None => {
                let mut key = index_prefix(kind, index);
                key.extend_from_slice(partition.as_bytes());
                key
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_is_eight_hex_chars() {
        assert_eq!(encode_height(0), "00000000");
        assert_eq!(encode_height(110), "0000006e");
        assert_eq!(encode_height(u32::MAX), "ffffffff");
    }

    #[test]
    fn lexicographic_equals_numeric_order() {
        let mut heights = vec![9u32, 10, 255, 256, 1, 70_000];
        let mut encoded: Vec<_> = heights.iter().map(|h| encode_height(*h)).collect();
        heights.sort();
        encoded.sort();
        let decoded: Vec<_> = encoded.iter().map(|e| decode_u32(e).unwrap()).collect();
        assert_eq!(decoded, heights);
    }

    #[test]
    fn same_height_rows_order_by_txno() {
        let a = height_sort_key(5, 2, "ff");
        let b = height_sort_key(5, 10, "00");
        assert_eq!(a, "00000005-00000002-ff");
        assert!(a < b);
    }

    #[test]
    fn raw_layout() {
        assert_eq!(raw::primary("Token", "01"), b"m\0Token\001".to_vec());
        assert_eq!(
            raw::index_entry("Token", "symbol", "DFI", None),
            b"i\0Token\0symbol\0DFI".to_vec()
        );
        assert_eq!(
            raw::index_entry("PoolSwap", "pool", "00000004", Some("x")),
            b"i\0PoolSwap\0pool\000000004\0x".to_vec()
        );
    }
}
