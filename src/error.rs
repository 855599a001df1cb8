use thiserror::Error;

use crate::hash::{to_hex, TrieHash};

/// Failures surfaced by decoding, store access and node construction.
///
/// Decoders check eagerly and never return a partial node; a decode failure
/// invalidates the root being opened without touching in-memory nodes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrieError {
    #[error("malformed node: {reason}")]
    MalformedNode { reason: &'static str },

    #[error("inconsistent value: declared length {declared}, actual {actual} bytes")]
    InvalidValueLength { declared: usize, actual: usize },

    #[error("store has no entry for hash {}", to_hex(.hash))]
    MissingStoreEntry { hash: TrieHash },

    #[error("trie invariant violated: {0}")]
    InvariantViolation(&'static str),
}

impl TrieError {
    pub(crate) fn malformed(reason: &'static str) -> Self {
        Self::MalformedNode { reason }
    }
}
