//! External key-value store contract. Nodes are persisted under the
//! Keccak-256 of their encoding, long values under the Keccak-256 of their
//! bytes; reads are idempotent and writes content-addressed.

use std::collections::HashMap;

use crate::hash::TrieHash;

pub trait TrieStore {
    fn retrieve_node(&self, hash: &TrieHash) -> Option<Vec<u8>>;

    fn retrieve_value(&self, hash: &TrieHash) -> Option<Vec<u8>> {
        self.retrieve_node(hash)
    }

    fn save_node(&mut self, hash: &TrieHash, payload: &[u8]);

    fn save_value(&mut self, hash: &TrieHash, value: &[u8]);
}

/// Hash-map backed store, the default for tests, benches and callers that
/// do not persist to disk.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    nodes: HashMap<TrieHash, Vec<u8>>,
    values: HashMap<TrieHash, Vec<u8>>,
}

impl MemoryStore {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn contains_node(&self, hash: &TrieHash) -> bool {
        self.nodes.contains_key(hash)
    }

    pub fn contains_value(&self, hash: &TrieHash) -> bool {
        self.values.contains_key(hash)
    }
}

impl TrieStore for MemoryStore {
    fn retrieve_node(&self, hash: &TrieHash) -> Option<Vec<u8>> {
        self.nodes.get(hash).cloned()
    }

    fn retrieve_value(&self, hash: &TrieHash) -> Option<Vec<u8>> {
        self.values.get(hash).cloned()
    }

    fn save_node(&mut self, hash: &TrieHash, payload: &[u8]) {
        self.nodes.insert(*hash, payload.to_vec());
    }

    fn save_value(&mut self, hash: &TrieHash, value: &[u8]) {
        self.values.insert(*hash, value.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryStore, TrieStore};

    #[test]
    fn node_and_value_namespaces_are_separate() {
        let mut store = MemoryStore::default();
        store.save_node(&[1; 32], &[0xaa]);
        store.save_value(&[1; 32], &[0xbb]);

        assert_eq!(store.retrieve_node(&[1; 32]), Some(vec![0xaa]));
        assert_eq!(store.retrieve_value(&[1; 32]), Some(vec![0xbb]));
        assert_eq!(store.retrieve_node(&[2; 32]), None);
    }

    #[test]
    fn writes_are_idempotent() {
        let mut store = MemoryStore::default();
        store.save_node(&[1; 32], &[0xaa]);
        store.save_node(&[1; 32], &[0xaa]);
        assert_eq!(store.node_count(), 1);
    }
}
