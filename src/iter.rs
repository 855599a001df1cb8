//! Traversal over the trie: in-, pre- and post-order iteration yielding the
//! full bit path of each node, key enumeration, and the leaf-first node
//! chain backing Merkle proofs. Hash-only children are resolved through the
//! store on demand; traversal never mutates.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::TrieError;
use crate::node::Node;
use crate::path::KeySlice;
use crate::store::TrieStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalOrder {
    InOrder,
    PreOrder,
    PostOrder,
}

struct Frame {
    path: KeySlice,
    node: Arc<Node>,
    stage: u8,
}

/// Depth-first iterator over `(path, node)` pairs, where `path` is the full
/// bit path from the root up to and including the node's shared path.
pub struct NodeIter<'a, S: TrieStore> {
    store: &'a S,
    order: TraversalOrder,
    stack: Vec<Frame>,
    failed: bool,
}

impl<'a, S: TrieStore> NodeIter<'a, S> {
    fn new(root: &Arc<Node>, order: TraversalOrder, store: &'a S) -> Self {
        Self {
            store,
            order,
            stack: vec![Frame {
                path: root.shared_path().clone(),
                node: Arc::clone(root),
                stage: 0,
            }],
            failed: false,
        }
    }

    fn push_child(&mut self, parent: &Frame, bit: u8) -> Result<(), TrieError> {
        if let Some(child) = parent.node.child(bit).resolve(self.store)? {
            self.stack.push(Frame {
                path: parent.path.rebuild_shared_path(bit, child.shared_path()),
                node: Arc::clone(child),
                stage: 0,
            });
        }
        Ok(())
    }

    fn step(&mut self) -> Result<Option<(KeySlice, Arc<Node>)>, TrieError> {
        while let Some(frame) = self.stack.pop() {
            match (self.order, frame.stage) {
                (TraversalOrder::PreOrder, _) => {
                    // Right below left so the left subtree is visited first.
                    self.push_child(&frame, 1)?;
                    self.push_child(&frame, 0)?;
                    return Ok(Some((frame.path, frame.node)));
                }
                (TraversalOrder::InOrder, 0) => {
                    let revisit = Frame {
                        path: frame.path.clone(),
                        node: Arc::clone(&frame.node),
                        stage: 1,
                    };
                    self.stack.push(revisit);
                    self.push_child(&frame, 0)?;
                }
                (TraversalOrder::InOrder, _) => {
                    self.push_child(&frame, 1)?;
                    return Ok(Some((frame.path, frame.node)));
                }
                (TraversalOrder::PostOrder, 0) => {
                    let revisit = Frame {
                        path: frame.path.clone(),
                        node: Arc::clone(&frame.node),
                        stage: 1,
                    };
                    self.stack.push(revisit);
                    self.push_child(&frame, 1)?;
                    self.push_child(&frame, 0)?;
                }
                (TraversalOrder::PostOrder, _) => {
                    return Ok(Some((frame.path, frame.node)));
                }
            }
        }
        Ok(None)
    }
}

impl<S: TrieStore> Iterator for NodeIter<'_, S> {
    type Item = Result<(KeySlice, Arc<Node>), TrieError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.step() {
            Ok(item) => item.map(Ok),
            Err(error) => {
                self.failed = true;
                Some(Err(error))
            }
        }
    }
}

impl Node {
    pub fn iter<'a, S: TrieStore>(
        self: &Arc<Self>,
        order: TraversalOrder,
        store: &'a S,
    ) -> NodeIter<'a, S> {
        NodeIter::new(self, order, store)
    }

    pub fn iter_in_order<'a, S: TrieStore>(self: &Arc<Self>, store: &'a S) -> NodeIter<'a, S> {
        self.iter(TraversalOrder::InOrder, store)
    }

    pub fn iter_pre_order<'a, S: TrieStore>(self: &Arc<Self>, store: &'a S) -> NodeIter<'a, S> {
        self.iter(TraversalOrder::PreOrder, store)
    }

    pub fn iter_post_order<'a, S: TrieStore>(self: &Arc<Self>, store: &'a S) -> NodeIter<'a, S> {
        self.iter(TraversalOrder::PostOrder, store)
    }

    /// Nodes traversed from the root to the node at `key`, leaf-first, so a
    /// verifier can check that each successive node's encoding contains the
    /// predecessor's hash or its embedded bytes. `None` when `key` does not
    /// resolve to a node.
    pub fn get_nodes<S: TrieStore>(
        self: &Arc<Self>,
        key: &[u8],
        store: &S,
    ) -> Result<Option<Vec<Arc<Node>>>, TrieError> {
        let key = KeySlice::from_key(key);
        let mut visited = Vec::new();
        let mut current = Arc::clone(self);
        let mut consumed = 0usize;

        loop {
            let path = current.shared_path().clone();
            if path.len() > key.len() - consumed
                || key.slice(consumed, consumed + path.len()) != path
            {
                return Ok(None);
            }
            consumed += path.len();
            visited.push(Arc::clone(&current));

            if consumed == key.len() {
                visited.reverse();
                return Ok(Some(visited));
            }

            let bit = key.get(consumed);
            consumed += 1;
            match current.child(bit).resolve(store)?.cloned() {
                None => return Ok(None),
                Some(child) => current = child,
            }
        }
    }

    /// Byte keys stored in this subtree whose length is at most `max_bytes`
    /// (`usize::MAX` collects all). Hash-only children are loaded through
    /// the store so the enumeration is complete.
    pub fn collect_keys<S: TrieStore>(
        self: &Arc<Self>,
        max_bytes: usize,
        store: &S,
    ) -> Result<BTreeSet<Vec<u8>>, TrieError> {
        let mut keys = BTreeSet::new();
        for item in self.iter_pre_order(store) {
            let (path, node) = item?;
            if !node.has_value() {
                continue;
            }
            if let Some(key) = path.to_key_bytes() {
                if max_bytes == usize::MAX || key.len() <= max_bytes {
                    keys.insert(key);
                }
            }
        }
        Ok(keys)
    }
}
