//! Persistent binary radix trie with Keccak-authenticated roots.
//!
//! Keys are byte strings addressed bit by bit; nodes are immutable and
//! path-compressed, mutations return a new root sharing every untouched
//! subtree, and any insertion order of the same key/value set produces the
//! same 32-byte root digest. Nodes and externalized long values live in a
//! pluggable content-addressed [`store::TrieStore`].

pub mod codec_compact;
pub mod codec_legacy;
pub mod error;
pub mod hash;
pub mod iter;
mod mutation;
pub mod node;
pub mod path;
pub mod rent;
pub mod store;
pub mod trie;
pub mod varint;

pub use crate::error::TrieError;
pub use crate::hash::{empty_trie_hash, keccak256, TrieHash, HASH_SIZE};
pub use crate::iter::{NodeIter, TraversalOrder};
pub use crate::node::{
    Node, NodeReference, NodeValue, NodeVersion, ReferenceTarget, LONG_VALUE_THRESHOLD,
    MAX_EMBEDDED_NODE_SIZE,
};
pub use crate::path::KeySlice;
pub use crate::rent::{
    RentRead, RentRewrite, RentTracker, RENT_EPOCH_ANCHOR, UNSET_RENT_TIMESTAMP,
};
pub use crate::store::{MemoryStore, TrieStore};
pub use crate::trie::{SaveStats, Trie};
