//! Pure-functional mutation. Every operation returns a new root that shares
//! each untouched subtree with the receiver; the receiver is never changed.
//! Two rules keep the structure canonical: a put whose key diverges inside a
//! node's compressed path splits that node, and a delete that leaves a
//! value-less node with a single child folds it into that child.

use std::sync::Arc;

use crate::error::TrieError;
use crate::node::{Node, NodeReference, NodeValue, NodeVersion, MAX_VALUE_LENGTH};
use crate::path::KeySlice;
use crate::rent::UNSET_RENT_TIMESTAMP;
use crate::store::TrieStore;

#[derive(Debug, Clone, Copy)]
struct Operation {
    rent_timestamp: Option<i64>,
    recursive_delete: bool,
}

impl Node {
    /// Inserts or replaces `value` at `key`; an empty value deletes.
    pub fn put<S: TrieStore>(
        self: &Arc<Self>,
        key: &[u8],
        value: &[u8],
        store: &S,
    ) -> Result<Arc<Node>, TrieError> {
        apply_put(self, key, value, None, store)
    }

    /// As [`Node::put`], and stamps the written terminal (and any internal
    /// node the split creates) with `rent_timestamp` as a v2 node. Passing
    /// the `-1` sentinel degrades to a plain v1 put.
    pub fn put_with_rent<S: TrieStore>(
        self: &Arc<Self>,
        key: &[u8],
        value: &[u8],
        rent_timestamp: i64,
        store: &S,
    ) -> Result<Arc<Node>, TrieError> {
        let rent = (rent_timestamp != UNSET_RENT_TIMESTAMP).then_some(rent_timestamp);
        apply_put(self, key, value, rent, store)
    }

    pub fn delete<S: TrieStore>(
        self: &Arc<Self>,
        key: &[u8],
        store: &S,
    ) -> Result<Arc<Node>, TrieError> {
        self.put(key, &[], store)
    }

    /// Removes the whole subtree rooted at `key`. The key must identify an
    /// exact node; otherwise the trie is returned unchanged.
    pub fn delete_recursive<S: TrieStore>(
        self: &Arc<Self>,
        key: &[u8],
        store: &S,
    ) -> Result<Arc<Node>, TrieError> {
        let operation = Operation {
            rent_timestamp: None,
            recursive_delete: true,
        };
        let outcome = put_internal(self, &KeySlice::from_key(key), None, operation, store)?;
        Ok(outcome.unwrap_or_else(|| Arc::new(Node::empty())))
    }
}

fn apply_put<S: TrieStore>(
    root: &Arc<Node>,
    key: &[u8],
    value: &[u8],
    rent_timestamp: Option<i64>,
    store: &S,
) -> Result<Arc<Node>, TrieError> {
    if value.len() > MAX_VALUE_LENGTH {
        return Err(TrieError::InvalidValueLength {
            declared: value.len(),
            actual: value.len(),
        });
    }

    let operation = Operation {
        rent_timestamp,
        recursive_delete: false,
    };
    let value = (!value.is_empty()).then_some(value);
    let outcome = put_internal(root, &KeySlice::from_key(key), value, operation, store)?;
    Ok(outcome.unwrap_or_else(|| Arc::new(Node::empty())))
}

/// Returns the replacement subtree, or `None` when the subtree became empty.
fn put_internal<S: TrieStore>(
    node: &Arc<Node>,
    key: &KeySlice,
    value: Option<&[u8]>,
    operation: Operation,
    store: &S,
) -> Result<Option<Arc<Node>>, TrieError> {
    let path = node.shared_path();
    let common = key.common_prefix_len(path);

    if common < path.len() {
        // The key diverges inside this node's compressed path. Nothing to
        // delete there; a put splits the path at the divergence point.
        if value.is_none() {
            return Ok(Some(Arc::clone(node)));
        }
        let split_node = split(node, common, operation)?;
        return put_internal(&split_node, key, value, operation, store);
    }

    if path.len() >= key.len() {
        // The key ends exactly at this node.
        if operation.recursive_delete {
            return Ok(None);
        }
        if node.value().same_as(value) && rent_unchanged(node, operation) {
            return Ok(Some(Arc::clone(node)));
        }
        let new_value = value.map(NodeValue::from_bytes).unwrap_or(NodeValue::Empty);
        return rebuild(
            path.clone(),
            new_value,
            node.left().clone(),
            node.right().clone(),
            operation.rent_timestamp,
            store,
        );
    }

    if node.is_empty_trie() {
        return match value {
            None => Ok(Some(Arc::clone(node))),
            Some(bytes) => Ok(Some(Arc::new(Node::new(
                key.clone(),
                NodeValue::from_bytes(bytes),
                NodeReference::empty(),
                NodeReference::empty(),
                NodeVersion::for_rent(operation.rent_timestamp),
                operation.rent_timestamp,
            )?))),
        };
    }

    let bit = key.get(path.len());
    let child_key = key.tail(path.len() + 1);
    let existing_child = node.child(bit).resolve(store)?.cloned();

    let new_child = match &existing_child {
        Some(child) => put_internal(child, &child_key, value, operation, store)?,
        None => {
            if value.is_none() {
                // Deleting below a missing child.
                return Ok(Some(Arc::clone(node)));
            }
            let empty = Arc::new(Node::empty());
            put_internal(&empty, &child_key, value, operation, store)?
        }
    };

    if let (Some(old), Some(new)) = (&existing_child, &new_child) {
        if Arc::ptr_eq(old, new) {
            return Ok(Some(Arc::clone(node)));
        }
    }

    let replacement = match new_child {
        None => NodeReference::empty(),
        Some(child) => NodeReference::from_arc(child),
    };
    let (left, right) = if bit == 0 {
        (replacement, node.right().clone())
    } else {
        (node.left().clone(), replacement)
    };

    // Only a descendant changed: the receiver keeps its own rent and version.
    rebuild_keeping_version(
        path.clone(),
        node.value().clone(),
        left,
        right,
        node.rent_timestamp(),
        node.version(),
        store,
    )
}

fn rent_unchanged(node: &Node, operation: Operation) -> bool {
    // A rent-less put never restamps, so it cannot demote a v2 node.
    operation.rent_timestamp.is_none() || operation.rent_timestamp == node.rent_timestamp()
}

/// Splits `node` at `common` bits of its shared path: the node's whole
/// content moves into a child hanging off the bit right after the common
/// prefix, under a fresh internal parent stamped with the put's rent.
fn split(node: &Arc<Node>, common: usize, operation: Operation) -> Result<Arc<Node>, TrieError> {
    let path = node.shared_path();
    let child = Node::new(
        path.tail(common + 1),
        node.value().clone(),
        node.left().clone(),
        node.right().clone(),
        node.version(),
        node.rent_timestamp(),
    )?;

    let child_reference = NodeReference::node(child);
    let (left, right) = if path.get(common) == 0 {
        (child_reference, NodeReference::empty())
    } else {
        (NodeReference::empty(), child_reference)
    };

    Ok(Arc::new(Node::new(
        path.slice(0, common),
        NodeValue::Empty,
        left,
        right,
        NodeVersion::for_rent(operation.rent_timestamp),
        operation.rent_timestamp,
    )?))
}

fn rebuild<S: TrieStore>(
    path: KeySlice,
    value: NodeValue,
    left: NodeReference,
    right: NodeReference,
    rent_timestamp: Option<i64>,
    store: &S,
) -> Result<Option<Arc<Node>>, TrieError> {
    rebuild_keeping_version(
        path,
        value,
        left,
        right,
        rent_timestamp,
        NodeVersion::for_rent(rent_timestamp),
        store,
    )
}

fn rebuild_keeping_version<S: TrieStore>(
    path: KeySlice,
    value: NodeValue,
    left: NodeReference,
    right: NodeReference,
    rent_timestamp: Option<i64>,
    version: NodeVersion,
    store: &S,
) -> Result<Option<Arc<Node>>, TrieError> {
    if !value.has_value() {
        match (left.is_empty(), right.is_empty()) {
            (true, true) => return Ok(None),
            (false, true) => return coalesce(&path, 0, &left, store).map(Some),
            (true, false) => return coalesce(&path, 1, &right, store).map(Some),
            (false, false) => {}
        }
    }

    Ok(Some(Arc::new(Node::new(
        path,
        value,
        left,
        right,
        version,
        rent_timestamp,
    )?)))
}

/// Folds a value-less single-child node into that child, prepending the
/// parent path and the implicit bit. The merged node carries the child's
/// value, children, rent and version.
fn coalesce<S: TrieStore>(
    parent_path: &KeySlice,
    bit: u8,
    reference: &NodeReference,
    store: &S,
) -> Result<Arc<Node>, TrieError> {
    let child = reference
        .resolve(store)?
        .ok_or(TrieError::InvariantViolation("coalesce requires a child"))?;

    Ok(Arc::new(Node::new(
        parent_path.rebuild_shared_path(bit, child.shared_path()),
        child.value().clone(),
        child.left().clone(),
        child.right().clone(),
        child.version(),
        child.rent_timestamp(),
    )?))
}
