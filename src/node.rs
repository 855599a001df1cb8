use std::sync::{Arc, Mutex, OnceLock};

use crate::codec_compact::{ChildEncoding, CompactCodec};
use crate::codec_legacy::LegacyCodec;
use crate::error::TrieError;
use crate::hash::{empty_trie_hash, keccak256, to_hex, TrieHash, HASH_SIZE};
use crate::path::KeySlice;
use crate::rent::UNSET_RENT_TIMESTAMP;
use crate::store::TrieStore;

/// A node may be inlined into its parent's encoding only while terminal and
/// no larger than this many serialized bytes.
pub const MAX_EMBEDDED_NODE_SIZE: usize = 52;

/// Values longer than this are stored externally under their own Keccak-256.
pub const LONG_VALUE_THRESHOLD: usize = 32;

/// Largest representable value length; the wire carries it as a Uint24.
pub const MAX_VALUE_LENGTH: usize = 0x00ff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeVersion {
    /// Read for historical root re-derivation only; never written anew.
    Legacy,
    V1,
    V2,
}

impl NodeVersion {
    pub fn as_byte(self) -> u8 {
        match self {
            NodeVersion::Legacy => 0,
            NodeVersion::V1 => 1,
            NodeVersion::V2 => 2,
        }
    }

    pub(crate) fn for_rent(rent_timestamp: Option<i64>) -> Self {
        if rent_timestamp.is_some() {
            NodeVersion::V2
        } else {
            NodeVersion::V1
        }
    }
}

/// Value payload of a node. Long values decoded from the wire start out as
/// hash-plus-length and are materialized from the store on first access.
#[derive(Debug, Clone)]
pub enum NodeValue {
    Empty,
    Inline(Arc<[u8]>),
    Long {
        hash: TrieHash,
        length: OnceLock<usize>,
        bytes: OnceLock<Arc<[u8]>>,
    },
}

impl NodeValue {
    pub fn from_bytes(value: &[u8]) -> Self {
        if value.is_empty() {
            NodeValue::Empty
        } else {
            NodeValue::Inline(Arc::from(value))
        }
    }

    pub(crate) fn long(hash: TrieHash, length: Option<usize>) -> Self {
        let length_cell = OnceLock::new();
        if let Some(length) = length {
            let _ = length_cell.set(length);
        }
        NodeValue::Long {
            hash,
            length: length_cell,
            bytes: OnceLock::new(),
        }
    }

    pub fn has_value(&self) -> bool {
        !matches!(self, NodeValue::Empty)
    }

    /// `None` only for long values decoded from the legacy format, whose
    /// length is not on the wire and is learned on materialization.
    pub fn length(&self) -> Option<usize> {
        match self {
            NodeValue::Empty => Some(0),
            NodeValue::Inline(bytes) => Some(bytes.len()),
            NodeValue::Long { length, .. } => length.get().copied(),
        }
    }

    pub fn is_long(&self) -> bool {
        match self.length() {
            Some(length) => length > LONG_VALUE_THRESHOLD,
            None => true,
        }
    }

    pub fn hash(&self) -> Option<TrieHash> {
        match self {
            NodeValue::Empty => None,
            NodeValue::Inline(bytes) => Some(keccak256(bytes)),
            NodeValue::Long { hash, .. } => Some(*hash),
        }
    }

    pub fn bytes_in_memory(&self) -> Option<&[u8]> {
        match self {
            NodeValue::Empty => None,
            NodeValue::Inline(bytes) => Some(bytes),
            NodeValue::Long { bytes, .. } => bytes.get().map(|bytes| bytes.as_ref()),
        }
    }

    /// Materializes the value bytes, fetching externalized values on demand.
    pub fn resolve<S: TrieStore>(&self, store: &S) -> Result<Option<Arc<[u8]>>, TrieError> {
        match self {
            NodeValue::Empty => Ok(None),
            NodeValue::Inline(bytes) => Ok(Some(Arc::clone(bytes))),
            NodeValue::Long {
                hash,
                length,
                bytes,
            } => {
                if let Some(bytes) = bytes.get() {
                    return Ok(Some(Arc::clone(bytes)));
                }

                tracing::trace!(value = %to_hex(hash), "fetching long value from store");
                let fetched = store
                    .retrieve_value(hash)
                    .ok_or(TrieError::MissingStoreEntry { hash: *hash })?;
                if let Some(declared) = length.get() {
                    if *declared != fetched.len() {
                        return Err(TrieError::InvalidValueLength {
                            declared: *declared,
                            actual: fetched.len(),
                        });
                    }
                }

                let _ = length.set(fetched.len());
                let _ = bytes.set(Arc::from(fetched));
                Ok(bytes.get().map(Arc::clone))
            }
        }
    }

    pub(crate) fn ensure_length<S: TrieStore>(&self, store: &S) -> Result<usize, TrieError> {
        if let Some(length) = self.length() {
            return Ok(length);
        }
        self.resolve(store)?;
        self.length()
            .ok_or(TrieError::InvariantViolation("value length unresolved"))
    }

    /// Whether this payload holds the same value as `candidate` (`None` and
    /// the empty byte string are equivalent).
    pub(crate) fn same_as(&self, candidate: Option<&[u8]>) -> bool {
        let candidate = candidate.filter(|bytes| !bytes.is_empty());
        match (self.has_value(), candidate) {
            (false, None) => true,
            (true, Some(bytes)) => self.hash() == Some(keccak256(bytes)),
            _ => false,
        }
    }
}

impl PartialEq for NodeValue {
    fn eq(&self, other: &Self) -> bool {
        match (self.has_value(), other.has_value()) {
            (false, false) => true,
            (true, true) => self.hash() == other.hash(),
            _ => false,
        }
    }
}

impl Eq for NodeValue {}

/// Lazy handle to a child node: absent, inlined, or addressed by hash and
/// fetched from the store on demand. Resolution of a hash reference is
/// memoization of a pure function and does not affect hashing.
#[derive(Debug, Clone)]
pub enum NodeReference {
    Empty,
    Node(Arc<Node>),
    Hash {
        hash: TrieHash,
        resolved: OnceLock<Arc<Node>>,
    },
}

/// What a non-empty reference points at, see [`NodeReference::target`].
#[derive(Debug, Clone)]
pub enum ReferenceTarget<'a> {
    Hash(TrieHash),
    Embedded(&'a Arc<Node>),
}

impl NodeReference {
    pub fn empty() -> Self {
        NodeReference::Empty
    }

    pub fn node(node: Node) -> Self {
        NodeReference::Node(Arc::new(node))
    }

    pub fn from_arc(node: Arc<Node>) -> Self {
        NodeReference::Node(node)
    }

    pub fn hash(hash: TrieHash) -> Self {
        NodeReference::Hash {
            hash,
            resolved: OnceLock::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, NodeReference::Empty)
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self, NodeReference::Node(_))
    }

    pub fn known_hash(&self) -> Option<TrieHash> {
        match self {
            NodeReference::Hash { hash, .. } => Some(*hash),
            _ => None,
        }
    }

    pub fn target(&self) -> Option<ReferenceTarget<'_>> {
        match self {
            NodeReference::Empty => None,
            NodeReference::Node(node) => Some(ReferenceTarget::Embedded(node)),
            NodeReference::Hash { hash, .. } => Some(ReferenceTarget::Hash(*hash)),
        }
    }

    /// The node already in memory, if any; never touches the store.
    pub fn materialized(&self) -> Option<&Arc<Node>> {
        match self {
            NodeReference::Empty => None,
            NodeReference::Node(node) => Some(node),
            NodeReference::Hash { resolved, .. } => resolved.get(),
        }
    }

    /// Resolves to the referenced node, fetching through the store when the
    /// reference is hash-only. The fetched node is retained on the reference.
    pub fn resolve<'a, S: TrieStore>(
        &'a self,
        store: &S,
    ) -> Result<Option<&'a Arc<Node>>, TrieError> {
        match self {
            NodeReference::Empty => Ok(None),
            NodeReference::Node(node) => Ok(Some(node)),
            NodeReference::Hash { hash, resolved } => {
                if resolved.get().is_none() {
                    tracing::trace!(node = %to_hex(hash), "resolving node reference from store");
                    let payload = store
                        .retrieve_node(hash)
                        .ok_or(TrieError::MissingStoreEntry { hash: *hash })?;
                    let node = Node::from_stored_payload(payload, *hash)?;
                    let _ = resolved.set(Arc::new(node));
                }
                Ok(resolved.get())
            }
        }
    }

    /// Byte cost this reference contributes to its parent's encoding: one
    /// length byte plus the inlined bytes when embedded, 32 bytes otherwise.
    pub fn reference_size<S: TrieStore>(&self, store: &S) -> Result<u64, TrieError> {
        match self {
            NodeReference::Empty => Ok(0),
            NodeReference::Hash { .. } => Ok(HASH_SIZE as u64),
            NodeReference::Node(node) => {
                if node.is_embeddable(store)? {
                    Ok(1 + node.encode(store)?.len() as u64)
                } else {
                    Ok(HASH_SIZE as u64)
                }
            }
        }
    }

    /// Legacy hash of the referenced node, `Some` for every non-empty
    /// reference. Used when re-deriving historical roots.
    pub fn hash_legacy<S: TrieStore>(
        &self,
        is_secure: bool,
        store: &S,
    ) -> Result<Option<TrieHash>, TrieError> {
        match self.resolve(store)? {
            None => Ok(None),
            Some(node) => node.hash_legacy(is_secure, store).map(Some),
        }
    }
}

impl PartialEq for NodeReference {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (NodeReference::Empty, NodeReference::Empty) => true,
            (NodeReference::Node(left), NodeReference::Node(right)) => left == right,
            (NodeReference::Hash { hash: left, .. }, NodeReference::Hash { hash: right, .. }) => {
                left == right
            }
            _ => false,
        }
    }
}

impl Eq for NodeReference {}

/// An immutable trie node. Mutations build replacement nodes that share
/// every untouched subtree with the original; the hash, legacy hash,
/// serialization and aggregate children size are caches of pure functions of
/// the node's state and are populated lazily.
#[derive(Debug)]
pub struct Node {
    shared_path: KeySlice,
    value: NodeValue,
    left: NodeReference,
    right: NodeReference,
    version: NodeVersion,
    rent_timestamp: Option<i64>,
    hash: OnceLock<TrieHash>,
    legacy_hash: [OnceLock<TrieHash>; 2],
    encoded: Mutex<Option<Arc<[u8]>>>,
    children_size: OnceLock<u64>,
}

impl Node {
    pub fn new(
        shared_path: KeySlice,
        value: NodeValue,
        left: NodeReference,
        right: NodeReference,
        version: NodeVersion,
        rent_timestamp: Option<i64>,
    ) -> Result<Self, TrieError> {
        match version {
            NodeVersion::V2 if rent_timestamp.is_none() => {
                return Err(TrieError::InvariantViolation(
                    "v2 node requires a rent timestamp",
                ));
            }
            NodeVersion::Legacy | NodeVersion::V1 if rent_timestamp.is_some() => {
                return Err(TrieError::InvariantViolation(
                    "rent timestamp requires version 2",
                ));
            }
            _ => {}
        }

        if let Some(length) = value.length() {
            if length > MAX_VALUE_LENGTH {
                return Err(TrieError::InvalidValueLength {
                    declared: length,
                    actual: length,
                });
            }
        }

        Ok(Self {
            shared_path,
            value,
            left,
            right,
            version,
            rent_timestamp,
            hash: OnceLock::new(),
            legacy_hash: [OnceLock::new(), OnceLock::new()],
            encoded: Mutex::new(None),
            children_size: OnceLock::new(),
        })
    }

    /// The unique empty trie: empty path, no value, two empty references.
    pub fn empty() -> Self {
        Self::new(
            KeySlice::empty(),
            NodeValue::Empty,
            NodeReference::empty(),
            NodeReference::empty(),
            NodeVersion::V1,
            None,
        )
        .expect("empty node parameters are always valid")
    }

    pub fn shared_path(&self) -> &KeySlice {
        &self.shared_path
    }

    pub fn value(&self) -> &NodeValue {
        &self.value
    }

    pub fn left(&self) -> &NodeReference {
        &self.left
    }

    pub fn right(&self) -> &NodeReference {
        &self.right
    }

    pub fn child(&self, bit: u8) -> &NodeReference {
        if bit == 0 {
            &self.left
        } else {
            &self.right
        }
    }

    pub fn version(&self) -> NodeVersion {
        self.version
    }

    pub fn rent_timestamp(&self) -> Option<i64> {
        self.rent_timestamp
    }

    /// Seconds-since-epoch rent timestamp, `-1` when unset.
    pub fn last_rent_paid_time(&self) -> i64 {
        self.rent_timestamp.unwrap_or(UNSET_RENT_TIMESTAMP)
    }

    pub fn has_value(&self) -> bool {
        self.value.has_value()
    }

    pub fn value_length(&self) -> Option<usize> {
        self.value.length()
    }

    pub fn value_hash(&self) -> Option<TrieHash> {
        self.value.hash()
    }

    pub fn has_long_value(&self) -> bool {
        self.value.has_value() && self.value.is_long()
    }

    pub fn is_terminal(&self) -> bool {
        self.left.is_empty() && self.right.is_empty()
    }

    pub fn is_empty_trie(&self) -> bool {
        !self.has_value() && self.is_terminal()
    }

    /// Number of nodes materialized in memory under (and including) this
    /// node. Children still addressed by an unresolved hash are not counted.
    pub fn trie_size(&self) -> usize {
        let children: usize = [&self.left, &self.right]
            .into_iter()
            .filter_map(NodeReference::materialized)
            .map(|child| child.trie_size())
            .sum();
        1 + children
    }

    /// Keccak-256 of the current-format serialization. The empty trie hashes
    /// to the Keccak-256 of the RLP empty byte string.
    pub fn hash<S: TrieStore>(&self, store: &S) -> Result<TrieHash, TrieError> {
        if let Some(hash) = self.hash.get() {
            return Ok(*hash);
        }

        let hash = if self.is_empty_trie() {
            empty_trie_hash()
        } else {
            keccak256(&self.encode(store)?)
        };
        let _ = self.hash.set(hash);
        Ok(hash)
    }

    /// Keccak-256 under the legacy v0 format, for historical roots.
    pub fn hash_legacy<S: TrieStore>(
        &self,
        is_secure: bool,
        store: &S,
    ) -> Result<TrieHash, TrieError> {
        let cache = &self.legacy_hash[usize::from(is_secure)];
        if let Some(hash) = cache.get() {
            return Ok(*hash);
        }

        let hash = if self.is_empty_trie() {
            empty_trie_hash()
        } else {
            let left_hash = self.left.hash_legacy(is_secure, store)?;
            let right_hash = self.right.hash_legacy(is_secure, store)?;
            let encoded = LegacyCodec::encode_node(self, left_hash, right_hash, is_secure)?;
            keccak256(&encoded)
        };
        let _ = cache.set(hash);
        Ok(hash)
    }

    /// Serializes this node in its current format, caching the bytes until
    /// the next save boundary releases them.
    pub fn encode<S: TrieStore>(&self, store: &S) -> Result<Arc<[u8]>, TrieError> {
        if let Some(encoded) = self.encoded.lock().expect("encoded cache lock").as_ref() {
            return Ok(Arc::clone(encoded));
        }

        if self.value.has_value() && self.value.is_long() {
            // The wire carries the length of an externalized value; legacy
            // decodes may not know it yet.
            self.value.ensure_length(store)?;
        }

        let left = self.child_encoding(&self.left, store)?;
        let right = self.child_encoding(&self.right, store)?;
        let children_size = if self.is_terminal() {
            None
        } else {
            Some(self.children_size(store)?)
        };

        let encoded: Arc<[u8]> = CompactCodec::encode_node(self, &left, &right, children_size)?.into();
        *self.encoded.lock().expect("encoded cache lock") = Some(Arc::clone(&encoded));
        Ok(encoded)
    }

    /// Aggregate serialized byte size of every descendant, including their
    /// externalized values; zero for terminals.
    pub fn children_size<S: TrieStore>(&self, store: &S) -> Result<u64, TrieError> {
        if let Some(size) = self.children_size.get() {
            return Ok(*size);
        }

        let mut total = 0u64;
        for reference in [&self.left, &self.right] {
            if let Some(child) = reference.resolve(store)? {
                total += child.subtree_size(store)?;
            }
        }
        let _ = self.children_size.set(total);
        Ok(total)
    }

    fn subtree_size<S: TrieStore>(&self, store: &S) -> Result<u64, TrieError> {
        let external_value = if self.has_long_value() {
            self.value.ensure_length(store)? as u64
        } else {
            0
        };
        Ok(self.encode(store)?.len() as u64 + self.children_size(store)? + external_value)
    }

    /// A node is embeddable in its parent iff it is terminal and its
    /// serialization is at most [`MAX_EMBEDDED_NODE_SIZE`] bytes.
    pub fn is_embeddable<S: TrieStore>(&self, store: &S) -> Result<bool, TrieError> {
        Ok(self.is_terminal() && self.encode(store)?.len() <= MAX_EMBEDDED_NODE_SIZE)
    }

    fn child_encoding<S: TrieStore>(
        &self,
        reference: &NodeReference,
        store: &S,
    ) -> Result<ChildEncoding, TrieError> {
        match reference {
            NodeReference::Empty => Ok(ChildEncoding::Empty),
            // Hash references decoded from a stored parent are never
            // embeddable: the save walk inlines every embeddable child.
            NodeReference::Hash { hash, .. } => Ok(ChildEncoding::Hashed(*hash)),
            NodeReference::Node(child) => {
                if child.is_embeddable(store)? {
                    Ok(ChildEncoding::Embedded(child.encode(store)?.to_vec()))
                } else {
                    Ok(ChildEncoding::Hashed(child.hash(store)?))
                }
            }
        }
    }

    /// Decodes a node payload in whichever format it carries: a leading
    /// arity byte selects the legacy format, anything else the current one.
    pub fn decode(payload: &[u8]) -> Result<Node, TrieError> {
        if LegacyCodec::is_legacy_message(payload) {
            let (node, _) = LegacyCodec::decode_node(payload)?;
            Ok(node)
        } else {
            CompactCodec::decode_node(payload)
        }
    }

    /// Decodes a payload fetched from the store under `hash`, priming the
    /// hash and encoding caches so they are not recomputed.
    pub(crate) fn from_stored_payload(
        payload: Vec<u8>,
        hash: TrieHash,
    ) -> Result<Node, TrieError> {
        if LegacyCodec::is_legacy_message(&payload) {
            let (node, is_secure) = LegacyCodec::decode_node(&payload)?;
            // The store key of a legacy payload is its legacy hash.
            let _ = node.legacy_hash[usize::from(is_secure)].set(hash);
            Ok(node)
        } else {
            let node = CompactCodec::decode_node(&payload)?;
            let _ = node.hash.set(hash);
            node.prime_encoded(payload.into());
            Ok(node)
        }
    }

    pub(crate) fn prime_encoded(&self, payload: Arc<[u8]>) {
        *self.encoded.lock().expect("encoded cache lock") = Some(payload);
    }

    pub(crate) fn prime_children_size(&self, size: u64) {
        let _ = self.children_size.set(size);
    }

    /// Drops the cached serialization; the hash caches are retained. Called
    /// at save boundaries once the bytes have reached the store.
    pub(crate) fn release_encoded(&self) {
        self.encoded.lock().expect("encoded cache lock").take();
    }

    /// Finds the node sitting exactly at `key`, if any.
    pub fn find<S: TrieStore>(
        self: &Arc<Self>,
        key: &[u8],
        store: &S,
    ) -> Result<Option<Arc<Node>>, TrieError> {
        let key = KeySlice::from_key(key);
        let mut current = Arc::clone(self);
        let mut consumed = 0usize;

        loop {
            let path = current.shared_path.clone();
            if path.len() > key.len() - consumed
                || key.slice(consumed, consumed + path.len()) != path
            {
                return Ok(None);
            }
            consumed += path.len();

            if consumed == key.len() {
                return Ok(Some(current));
            }

            let bit = key.get(consumed);
            consumed += 1;
            match current.child(bit).resolve(store)?.cloned() {
                None => return Ok(None),
                Some(child) => current = child,
            }
        }
    }

    /// Value stored at `key`, materializing long values through the store.
    pub fn get<S: TrieStore>(
        self: &Arc<Self>,
        key: &[u8],
        store: &S,
    ) -> Result<Option<Vec<u8>>, TrieError> {
        match self.find(key, store)? {
            None => Ok(None),
            Some(node) => Ok(node.value.resolve(store)?.map(|bytes| bytes.to_vec())),
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.shared_path == other.shared_path
            && self.value == other.value
            && self.left == other.left
            && self.right == other.right
            && self.version == other.version
            && self.rent_timestamp == other.rent_timestamp
    }
}

impl Eq for Node {}
