//! Owning façade over a trie root and its backing store. Mutations swap the
//! root for the replacement returned by the node-level operations; `save`
//! checkpoints the reachable graph into the store, skipping everything
//! already persisted this session.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::error::TrieError;
use crate::hash::{empty_trie_hash, keccak256, to_hex, TrieHash};
use crate::node::{Node, NodeReference, NodeValue, LONG_VALUE_THRESHOLD};
use crate::store::TrieStore;

#[derive(Debug, Default, Clone, Copy)]
pub struct SaveStats {
    pub nodes_visited: u64,
    pub nodes_written: u64,
    pub values_written: u64,
}

#[derive(Debug)]
pub struct Trie<S: TrieStore> {
    root: Arc<Node>,
    store: S,
    persisted_nodes: HashSet<TrieHash>,
    persisted_values: HashSet<TrieHash>,
}

impl<S: TrieStore> Trie<S> {
    pub fn new(store: S) -> Self {
        Self {
            root: Arc::new(Node::empty()),
            store,
            persisted_nodes: HashSet::new(),
            persisted_values: HashSet::new(),
        }
    }

    /// Reopens a trie from a persisted root hash. Children stay hash-only
    /// and are fetched when traversal first reaches them.
    pub fn from_persisted_root(root_hash: TrieHash, store: S) -> Result<Self, TrieError> {
        if root_hash == empty_trie_hash() {
            return Ok(Self::new(store));
        }

        let payload = store
            .retrieve_node(&root_hash)
            .ok_or(TrieError::MissingStoreEntry { hash: root_hash })?;
        let root = Node::from_stored_payload(payload, root_hash)?;
        tracing::debug!(root = %to_hex(&root_hash), "opened trie from persisted root");

        Ok(Self {
            root: Arc::new(root),
            store,
            persisted_nodes: HashSet::from([root_hash]),
            persisted_values: HashSet::new(),
        })
    }

    pub fn root(&self) -> &Arc<Node> {
        &self.root
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        self.root.get(key, &self.store)
    }

    pub fn find(&self, key: &[u8]) -> Result<Option<Arc<Node>>, TrieError> {
        self.root.find(key, &self.store)
    }

    pub fn get_nodes(&self, key: &[u8]) -> Result<Option<Vec<Arc<Node>>>, TrieError> {
        self.root.get_nodes(key, &self.store)
    }

    pub fn value_length(&self, key: &[u8]) -> Result<Option<usize>, TrieError> {
        match self.find(key)? {
            None => Ok(None),
            Some(node) if !node.has_value() => Ok(None),
            Some(node) => node.value().ensure_length(&self.store).map(Some),
        }
    }

    pub fn value_hash(&self, key: &[u8]) -> Result<Option<TrieHash>, TrieError> {
        Ok(self.find(key)?.and_then(|node| node.value_hash()))
    }

    pub fn collect_keys(&self, max_bytes: usize) -> Result<BTreeSet<Vec<u8>>, TrieError> {
        self.root.collect_keys(max_bytes, &self.store)
    }

    pub fn trie_size(&self) -> usize {
        self.root.trie_size()
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), TrieError> {
        self.root = self.root.put(key, value, &self.store)?;
        Ok(())
    }

    pub fn put_with_rent(
        &mut self,
        key: &[u8],
        value: &[u8],
        rent_timestamp: i64,
    ) -> Result<(), TrieError> {
        self.root = self
            .root
            .put_with_rent(key, value, rent_timestamp, &self.store)?;
        Ok(())
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<(), TrieError> {
        self.root = self.root.delete(key, &self.store)?;
        Ok(())
    }

    pub fn delete_recursive(&mut self, key: &[u8]) -> Result<(), TrieError> {
        self.root = self.root.delete_recursive(key, &self.store)?;
        Ok(())
    }

    pub fn root_hash(&self) -> Result<TrieHash, TrieError> {
        self.root.hash(&self.store)
    }

    pub fn root_hash_legacy(&self, is_secure: bool) -> Result<TrieHash, TrieError> {
        self.root.hash_legacy(is_secure, &self.store)
    }

    /// Checkpoints the reachable graph: every non-embeddable node is written
    /// under its hash, inline long values under theirs. Cached encodings are
    /// released once written; hashes stay cached.
    pub fn save(&mut self) -> Result<SaveStats, TrieError> {
        let root = Arc::clone(&self.root);
        let (root_hash, stats) = persist_node(
            &root,
            &mut self.store,
            &mut self.persisted_nodes,
            &mut self.persisted_values,
            true,
        )?;
        tracing::debug!(
            root = %to_hex(&root_hash),
            visited = stats.nodes_visited,
            written = stats.nodes_written,
            "saved trie checkpoint"
        );
        Ok(stats)
    }
}

fn persist_node<S: TrieStore>(
    node: &Arc<Node>,
    store: &mut S,
    persisted_nodes: &mut HashSet<TrieHash>,
    persisted_values: &mut HashSet<TrieHash>,
    is_root: bool,
) -> Result<(TrieHash, SaveStats), TrieError> {
    let mut stats = SaveStats {
        nodes_visited: 1,
        ..SaveStats::default()
    };

    for reference in [node.left(), node.right()] {
        match reference {
            NodeReference::Empty => {}
            // A hash reference came from the store; its subtree is already
            // persisted.
            NodeReference::Hash { hash, .. } => {
                persisted_nodes.insert(*hash);
            }
            NodeReference::Node(child) => {
                let (_, child_stats) =
                    persist_node(child, store, persisted_nodes, persisted_values, false)?;
                stats.nodes_visited += child_stats.nodes_visited;
                stats.nodes_written += child_stats.nodes_written;
                stats.values_written += child_stats.values_written;
            }
        }
    }

    match node.value() {
        NodeValue::Inline(bytes) if bytes.len() > LONG_VALUE_THRESHOLD => {
            let value_hash = keccak256(bytes);
            if persisted_values.insert(value_hash) {
                store.save_value(&value_hash, bytes);
                stats.values_written += 1;
            }
        }
        NodeValue::Long { hash, .. } => {
            persisted_values.insert(*hash);
        }
        _ => {}
    }

    let encoded = node.encode(&*store)?;
    let hash = node.hash(&*store)?;
    let embeddable = node.is_embeddable(&*store)?;

    if is_root || !embeddable {
        let first_write = persisted_nodes.insert(hash);
        if is_root || first_write {
            store.save_node(&hash, &encoded);
            stats.nodes_written += 1;
        }
    }
    node.release_encoded();

    Ok((hash, stats))
}

#[cfg(test)]
mod tests {
    use super::Trie;
    use crate::hash::empty_trie_hash;
    use crate::store::MemoryStore;

    #[test]
    fn empty_trie_save_writes_the_empty_node() {
        let mut trie = Trie::new(MemoryStore::default());
        assert_eq!(trie.root_hash().unwrap(), empty_trie_hash());

        let stats = trie.save().unwrap();
        assert_eq!(stats.nodes_written, 1);
        assert!(trie.store().contains_node(&empty_trie_hash()));
    }

    #[test]
    fn save_and_reopen_round_trips_content() {
        let mut trie = Trie::new(MemoryStore::default());
        trie.put(b"aa", &[0x01, 0x02, 0x03]).unwrap();
        trie.put(b"ab", &vec![0x09; 40]).unwrap();

        let root_hash = trie.root_hash().unwrap();
        trie.save().unwrap();
        let store = trie.into_store();

        let reopened = Trie::from_persisted_root(root_hash, store).unwrap();
        assert_eq!(
            reopened.get(b"aa").unwrap().as_deref(),
            Some([0x01, 0x02, 0x03].as_slice())
        );
        assert_eq!(
            reopened.get(b"ab").unwrap().as_deref(),
            Some(vec![0x09; 40].as_slice())
        );
        assert_eq!(reopened.root_hash().unwrap(), root_hash);
    }

    #[test]
    fn reopening_an_unknown_root_reports_the_missing_hash() {
        let result = Trie::from_persisted_root([0x13; 32], MemoryStore::default());
        assert_eq!(
            result.err(),
            Some(crate::TrieError::MissingStoreEntry { hash: [0x13; 32] })
        );
    }

    #[test]
    fn second_save_skips_already_persisted_subtrees() {
        let mut trie = Trie::new(MemoryStore::default());
        for index in 0u8..8 {
            trie.put(&[index], &[index; 8]).unwrap();
        }
        let first = trie.save().unwrap();
        assert!(first.nodes_written > 0);

        trie.put(&[0xff], b"more").unwrap();
        let second = trie.save().unwrap();
        assert!(second.nodes_written < first.nodes_written + 2);
    }

    #[test]
    fn value_length_and_hash_queries_resolve_through_the_store() {
        let mut trie = Trie::new(MemoryStore::default());
        let value = vec![0x42; 33];
        trie.put(b"k2", &value).unwrap();

        assert_eq!(trie.value_length(b"k2").unwrap(), Some(33));
        assert_eq!(
            trie.value_hash(b"k2").unwrap(),
            Some(crate::hash::keccak256(&value))
        );
        assert_eq!(trie.value_length(b"nope").unwrap(), None);
    }

    #[test]
    fn lazy_children_are_fetched_on_traversal() {
        let mut trie = Trie::new(MemoryStore::default());
        // Long keys keep the terminals above the embedding bound, forcing
        // hash references in the stored parent.
        trie.put(&[0x11; 24], &vec![0xaa; 64]).unwrap();
        trie.put(&[0x22; 24], &vec![0xbb; 64]).unwrap();

        let root_hash = trie.root_hash().unwrap();
        trie.save().unwrap();
        let reopened = Trie::from_persisted_root(root_hash, trie.into_store()).unwrap();

        assert_eq!(reopened.trie_size(), 1);
        assert_eq!(
            reopened.get(&[0x11; 24]).unwrap().as_deref(),
            Some(vec![0xaa; 64].as_slice())
        );
        assert!(reopened.trie_size() > 1);
    }

    #[test]
    fn deleting_everything_restores_the_empty_root() {
        let mut trie = Trie::new(MemoryStore::default());
        trie.put(b"one", b"1").unwrap();
        trie.put(b"two", b"2").unwrap();
        trie.delete(b"one").unwrap();
        trie.delete(b"two").unwrap();
        assert_eq!(trie.root_hash().unwrap(), empty_trie_hash());
        assert!(trie.root().is_empty_trie());
    }
}
