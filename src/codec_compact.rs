//! Current node wire format (v1, and v2 which adds a rent timestamp).
//!
//! Layout: one flags byte; for v2 an 8-byte big-endian signed rent
//! timestamp; the shared path when present; the left then right child, each
//! either a length-prefixed embedded serialization or a 32-byte hash; a
//! VarInt children size when any child is present; finally either the inline
//! value bytes or, for long values, the 32-byte value hash plus a Uint24
//! length.

use std::sync::Arc;

use crate::error::TrieError;
use crate::hash::{TrieHash, HASH_SIZE};
use crate::node::{
    Node, NodeReference, NodeValue, NodeVersion, LONG_VALUE_THRESHOLD, MAX_EMBEDDED_NODE_SIZE,
};
use crate::path::{codec as path_codec, KeySlice};
use crate::varint;

const V2_FLAG: u8 = 0b1000_0000;
const V1_FLAG: u8 = 0b0100_0000;
const VERSION_MASK: u8 = 0b1100_0000;
const LONG_VALUE_FLAG: u8 = 0b0010_0000;
const SHARED_PREFIX_FLAG: u8 = 0b0001_0000;
const LEFT_PRESENT_FLAG: u8 = 0b0000_1000;
const RIGHT_PRESENT_FLAG: u8 = 0b0000_0100;
const LEFT_EMBEDDED_FLAG: u8 = 0b0000_0010;
const RIGHT_EMBEDDED_FLAG: u8 = 0b0000_0001;

const RENT_TIMESTAMP_LEN: usize = 8;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ChildEncoding {
    Empty,
    Embedded(Vec<u8>),
    Hashed(TrieHash),
}

impl ChildEncoding {
    pub fn is_present(&self) -> bool {
        !matches!(self, ChildEncoding::Empty)
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self, ChildEncoding::Embedded(_))
    }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct CompactCodec;

impl CompactCodec {
    pub fn is_compact_message(payload: &[u8]) -> bool {
        matches!(
            payload.first().map(|flags| flags & VERSION_MASK),
            Some(V1_FLAG) | Some(V2_FLAG)
        )
    }

    pub fn decode_node(payload: &[u8]) -> Result<Node, TrieError> {
        let flags = *payload
            .first()
            .ok_or_else(|| TrieError::malformed("node payload is empty"))?;
        let mut cursor = 1usize;

        let (version, rent_timestamp) = match flags & VERSION_MASK {
            V1_FLAG => (NodeVersion::V1, None),
            V2_FLAG => {
                let raw: [u8; RENT_TIMESTAMP_LEN] = read_array(payload, &mut cursor)
                    .ok_or_else(|| TrieError::malformed("rent timestamp is truncated"))?;
                let timestamp = i64::from_be_bytes(raw);
                if timestamp == crate::rent::UNSET_RENT_TIMESTAMP {
                    return Err(TrieError::malformed("v2 node carries the unset rent sentinel"));
                }
                (NodeVersion::V2, Some(timestamp))
            }
            _ => return Err(TrieError::malformed("unknown version flags")),
        };

        let shared_path = if flags & SHARED_PREFIX_FLAG != 0 {
            path_codec::read(payload, &mut cursor)?
        } else {
            KeySlice::empty()
        };

        let left = Self::decode_reference(
            payload,
            &mut cursor,
            flags & LEFT_PRESENT_FLAG != 0,
            flags & LEFT_EMBEDDED_FLAG != 0,
        )?;
        let right = Self::decode_reference(
            payload,
            &mut cursor,
            flags & RIGHT_PRESENT_FLAG != 0,
            flags & RIGHT_EMBEDDED_FLAG != 0,
        )?;

        let children_size = if left.is_empty() && right.is_empty() {
            None
        } else {
            Some(varint::read(payload, &mut cursor)?)
        };

        let value = if flags & LONG_VALUE_FLAG != 0 {
            let hash = read_hash(payload, &mut cursor)?;
            let length = read_u24(payload, &mut cursor)?;
            if length <= LONG_VALUE_THRESHOLD {
                return Err(TrieError::malformed("long value flag with short length"));
            }
            if cursor != payload.len() {
                return Err(TrieError::malformed("trailing bytes after value"));
            }
            NodeValue::long(hash, Some(length))
        } else {
            let inline = &payload[cursor..];
            if inline.len() > LONG_VALUE_THRESHOLD {
                return Err(TrieError::malformed("long value stored inline"));
            }
            NodeValue::from_bytes(inline)
        };

        let node = Node::new(shared_path, value, left, right, version, rent_timestamp)?;
        if let Some(size) = children_size {
            node.prime_children_size(size);
        }
        Ok(node)
    }

    pub fn encode_node(
        node: &Node,
        left: &ChildEncoding,
        right: &ChildEncoding,
        children_size: Option<u64>,
    ) -> Result<Vec<u8>, TrieError> {
        let has_long_value = node.has_long_value();
        let any_child = left.is_present() || right.is_present();
        if any_child && children_size.is_none() {
            return Err(TrieError::InvariantViolation(
                "children size is required for a non-terminal node",
            ));
        }

        let mut flags = match node.version() {
            NodeVersion::V2 => V2_FLAG,
            // Legacy nodes are re-serialized in the v1 format; new v0
            // payloads are never produced.
            NodeVersion::Legacy | NodeVersion::V1 => V1_FLAG,
        };
        if has_long_value {
            flags |= LONG_VALUE_FLAG;
        }
        if !node.shared_path().is_empty() {
            flags |= SHARED_PREFIX_FLAG;
        }
        if left.is_present() {
            flags |= LEFT_PRESENT_FLAG;
        }
        if right.is_present() {
            flags |= RIGHT_PRESENT_FLAG;
        }
        if left.is_embedded() {
            flags |= LEFT_EMBEDDED_FLAG;
        }
        if right.is_embedded() {
            flags |= RIGHT_EMBEDDED_FLAG;
        }

        let mut encoded = Vec::new();
        encoded.push(flags);

        if node.version() == NodeVersion::V2 {
            let timestamp = node.rent_timestamp().ok_or(TrieError::InvariantViolation(
                "v2 node requires a rent timestamp",
            ))?;
            encoded.extend_from_slice(&timestamp.to_be_bytes());
        }

        path_codec::write(node.shared_path(), &mut encoded);
        Self::encode_reference(left, &mut encoded)?;
        Self::encode_reference(right, &mut encoded)?;

        if any_child {
            varint::write(children_size.unwrap_or(0), &mut encoded);
        }

        if has_long_value {
            let hash = node.value_hash().ok_or(TrieError::InvariantViolation(
                "long value is missing its hash",
            ))?;
            let length = node.value_length().ok_or(TrieError::InvariantViolation(
                "long value length must be resolved before encoding",
            ))?;
            encoded.extend_from_slice(&hash);
            encoded.extend_from_slice(&encode_u24(length)?);
        } else if let Some(inline) = node.value().bytes_in_memory() {
            encoded.extend_from_slice(inline);
        }

        Ok(encoded)
    }

    fn decode_reference(
        payload: &[u8],
        cursor: &mut usize,
        present: bool,
        embedded: bool,
    ) -> Result<NodeReference, TrieError> {
        if !present {
            if embedded {
                return Err(TrieError::malformed("embedded flag without child"));
            }
            return Ok(NodeReference::empty());
        }

        if !embedded {
            return Ok(NodeReference::hash(read_hash(payload, cursor)?));
        }

        let length = usize::from(
            *payload
                .get(*cursor)
                .ok_or_else(|| TrieError::malformed("embedded child length is truncated"))?,
        );
        *cursor += 1;
        if length > MAX_EMBEDDED_NODE_SIZE {
            return Err(TrieError::malformed("embedded child exceeds embedding bound"));
        }

        let end = *cursor + length;
        if end > payload.len() {
            return Err(TrieError::malformed("embedded child payload is truncated"));
        }
        let child_payload = &payload[*cursor..end];
        *cursor = end;

        let child = Self::decode_node(child_payload)?;
        if !child.is_terminal() {
            return Err(TrieError::malformed("embedded child is not terminal"));
        }
        child.prime_encoded(Arc::from(child_payload));
        Ok(NodeReference::node(child))
    }

    fn encode_reference(
        reference: &ChildEncoding,
        output: &mut Vec<u8>,
    ) -> Result<(), TrieError> {
        match reference {
            ChildEncoding::Empty => Ok(()),
            ChildEncoding::Embedded(payload) => {
                if payload.len() > MAX_EMBEDDED_NODE_SIZE {
                    return Err(TrieError::InvariantViolation(
                        "embedded child exceeds embedding bound",
                    ));
                }
                output.push(payload.len() as u8);
                output.extend_from_slice(payload);
                Ok(())
            }
            ChildEncoding::Hashed(hash) => {
                output.extend_from_slice(hash);
                Ok(())
            }
        }
    }
}

fn read_array<const N: usize>(payload: &[u8], cursor: &mut usize) -> Option<[u8; N]> {
    let end = cursor.checked_add(N).filter(|end| *end <= payload.len())?;
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(&payload[*cursor..end]);
    *cursor = end;
    Some(bytes)
}

fn read_hash(payload: &[u8], cursor: &mut usize) -> Result<TrieHash, TrieError> {
    read_array::<HASH_SIZE>(payload, cursor)
        .ok_or_else(|| TrieError::malformed("hash field is truncated"))
}

fn read_u24(payload: &[u8], cursor: &mut usize) -> Result<usize, TrieError> {
    let bytes: [u8; 3] = read_array(payload, cursor)
        .ok_or_else(|| TrieError::malformed("uint24 field is truncated"))?;
    Ok(((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | bytes[2] as usize)
}

fn encode_u24(value: usize) -> Result<[u8; 3], TrieError> {
    if value > crate::node::MAX_VALUE_LENGTH {
        return Err(TrieError::InvalidValueLength {
            declared: value,
            actual: value,
        });
    }
    Ok([
        ((value >> 16) & 0xff) as u8,
        ((value >> 8) & 0xff) as u8,
        (value & 0xff) as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::{ChildEncoding, CompactCodec, LONG_VALUE_FLAG, V1_FLAG, V2_FLAG};
    use crate::hash::keccak256;
    use crate::node::{Node, NodeReference, NodeValue, NodeVersion};
    use crate::path::KeySlice;

    fn terminal(path_bits: &[u8], value: &[u8]) -> Node {
        Node::new(
            KeySlice::from_bits(path_bits).unwrap(),
            NodeValue::from_bytes(value),
            NodeReference::empty(),
            NodeReference::empty(),
            NodeVersion::V1,
            None,
        )
        .unwrap()
    }

    fn encode_terminal(node: &Node) -> Vec<u8> {
        CompactCodec::encode_node(node, &ChildEncoding::Empty, &ChildEncoding::Empty, None)
            .unwrap()
    }

    #[test]
    fn round_trip_terminal_with_short_value() {
        let node = terminal(&[1, 0, 1], &[1, 2, 3, 4]);
        let decoded = CompactCodec::decode_node(&encode_terminal(&node)).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn round_trip_v2_terminal_keeps_the_timestamp() {
        let node = Node::new(
            KeySlice::from_bits(&[0, 1]).unwrap(),
            NodeValue::from_bytes(b"rentpaid"),
            NodeReference::empty(),
            NodeReference::empty(),
            NodeVersion::V2,
            Some(1_700_000_000),
        )
        .unwrap();

        let encoded = encode_terminal(&node);
        assert_eq!(encoded[0] & V2_FLAG, V2_FLAG);
        assert_eq!(&encoded[1..9], &1_700_000_000i64.to_be_bytes());

        let decoded = CompactCodec::decode_node(&encoded).unwrap();
        assert_eq!(decoded.rent_timestamp(), Some(1_700_000_000));
        assert_eq!(decoded, node);
    }

    #[test]
    fn long_value_encodes_hash_and_uint24_length() {
        let value = vec![7u8; 40];
        let node = terminal(&[], &value);
        let encoded = encode_terminal(&node);

        assert_eq!(encoded[0] & LONG_VALUE_FLAG, LONG_VALUE_FLAG);
        assert!(!encoded
            .windows(value.len())
            .any(|window| window == value.as_slice()));

        let decoded = CompactCodec::decode_node(&encoded).unwrap();
        assert_eq!(decoded.value_hash(), Some(keccak256(&value)));
        assert_eq!(decoded.value_length(), Some(40));
    }

    #[test]
    fn internal_node_round_trips_hashed_and_embedded_children() {
        let store = crate::store::MemoryStore::default();
        let embedded = terminal(&[1], b"small");
        let embedded_payload = embedded.encode(&store).unwrap().to_vec();

        let node = Node::new(
            KeySlice::from_bits(&[0, 0, 1]).unwrap(),
            NodeValue::Empty,
            NodeReference::node(embedded),
            NodeReference::hash([0x55; 32]),
            NodeVersion::V1,
            None,
        )
        .unwrap();

        let encoded = CompactCodec::encode_node(
            &node,
            &ChildEncoding::Embedded(embedded_payload),
            &ChildEncoding::Hashed([0x55; 32]),
            Some(123),
        )
        .unwrap();

        let decoded = CompactCodec::decode_node(&encoded).unwrap();
        assert_eq!(decoded, node);
        assert_eq!(decoded.children_size(&store).unwrap(), 123);
    }

    #[test]
    fn rejects_unknown_version_flags() {
        assert!(CompactCodec::decode_node(&[0b0000_0000]).is_err());
        assert!(CompactCodec::decode_node(&[0b1100_0000]).is_err());
        assert!(CompactCodec::decode_node(&[]).is_err());
    }

    #[test]
    fn rejects_sentinel_rent_timestamp_on_the_wire() {
        let mut payload = vec![V2_FLAG];
        payload.extend_from_slice(&(-1i64).to_be_bytes());
        assert!(CompactCodec::decode_node(&payload).is_err());
    }

    #[test]
    fn rejects_trailing_bytes_after_a_long_value() {
        let node = terminal(&[], &vec![9u8; 40]);
        let mut encoded = encode_terminal(&node);
        encoded.push(0x00);
        assert!(CompactCodec::decode_node(&encoded).is_err());
    }

    #[test]
    fn rejects_oversized_inline_value() {
        let mut payload = vec![V1_FLAG];
        payload.extend_from_slice(&[0xaa; 40]);
        assert!(CompactCodec::decode_node(&payload).is_err());
    }

    #[test]
    fn version_marker_is_exactly_one_top_bit() {
        let encoded = encode_terminal(&terminal(&[1], b"v"));
        assert_eq!(encoded[0] & V1_FLAG, V1_FLAG);
        assert_eq!(encoded[0] & V2_FLAG, 0);
    }
}
