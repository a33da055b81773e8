//! Error types for the dfindex pipeline.

use thiserror::Error;

/// Errors that can occur while indexing or invalidating a block.
///
/// Every variant is fatal for the block being processed: the follower keeps
/// its height and retries the whole block. DFTX decode failures are not part
/// of this taxonomy, they are skipped at extraction time.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// A cross-referenced record that must exist is missing from storage.
    #[error("{model} '{id}' not found in index")]
    NotFound { model: &'static str, id: String },

    /// The node returned nothing for a reference that must exist.
    #[error("RPC returned no {what} for '{id}'")]
    RpcNotFound { what: &'static str, id: String },

    /// The node returned a response with an unexpected number of items.
    #[error("RPC {what}: expected {expected} item(s), got {actual}")]
    RpcItemLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Transient transport failure talking to the node.
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// A stored record could not be (de)serialized.
    #[error("Codec error: {0}")]
    Codec(String),

    /// A block was offered out of sequence.
    #[error("Height mismatch: expected {expected}, got {actual}")]
    HeightMismatch { expected: u32, actual: u32 },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Shorthand for [`IndexerError::NotFound`].
    pub fn not_found(model: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            model,
            id: id.into(),
        }
    }

    /// Returns `true` if the error is a transient RPC failure worth retrying
    /// at the call site.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rpc_is_retryable() {
        assert!(IndexerError::Rpc("connection reset".into()).is_retryable());
        assert!(!IndexerError::not_found("Vault", "abc").is_retryable());
        assert!(!IndexerError::RpcNotFound { what: "block", id: "0xa".into() }.is_retryable());
    }

    #[test]
    fn block_level_failures_are_not_retryable() {
        let fatal = [
            IndexerError::RpcItemLength { what: "block transactions", expected: 1, actual: 0 },
            IndexerError::Storage("disk full".into()),
            IndexerError::Codec("eof".into()),
            IndexerError::HeightMismatch { expected: 4, actual: 6 },
            IndexerError::Other("bad config".into()),
        ];
        assert!(fatal.iter().all(|e| !e.is_retryable()));
    }

    #[test]
    fn display_names_the_missing_record() {
        let err = IndexerError::not_found("TransactionVout", "aa-00000001");
        assert_eq!(err.to_string(), "TransactionVout 'aa-00000001' not found in index");
    }
}
