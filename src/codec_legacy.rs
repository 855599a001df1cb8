//! Legacy v0 node format, read and written only to re-derive historical
//! roots. Fixed header: arity byte, flags (secure bit 0, long value bit 1),
//! a Uint16 bitmask over the two children and a Uint16 shared-path bit
//! length; then the packed path bytes, each present child hash, and either a
//! 32-byte value hash or the inline value.

use crate::error::TrieError;
use crate::hash::{TrieHash, HASH_SIZE};
use crate::node::{Node, NodeReference, NodeValue, NodeVersion};
use crate::path::{codec as path_codec, KeySlice};

pub const ARITY: u8 = 2;

const MESSAGE_HEADER_LEN: usize = 6;
const SECURE_FLAG: u8 = 0x01;
const LONG_VALUE_FLAG: u8 = 0x02;
const LEFT_MASK: u16 = 0b01;
const RIGHT_MASK: u16 = 0b10;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct LegacyCodec;

impl LegacyCodec {
    pub fn is_legacy_message(payload: &[u8]) -> bool {
        payload.first().copied() == Some(ARITY)
    }

    /// Decodes a v0 payload, returning the node and its secure flag.
    pub fn decode_node(payload: &[u8]) -> Result<(Node, bool), TrieError> {
        if payload.len() < MESSAGE_HEADER_LEN {
            return Err(TrieError::malformed("legacy payload is too short"));
        }

        let mut cursor = 0usize;
        if payload[cursor] != ARITY {
            return Err(TrieError::malformed("wrong arity byte"));
        }
        cursor += 1;

        let flags = payload[cursor];
        cursor += 1;
        let is_secure = flags & SECURE_FLAG != 0;
        let has_long_value = flags & LONG_VALUE_FLAG != 0;

        let child_mask = read_u16(payload, &mut cursor)?;
        let path_bit_len = usize::from(read_u16(payload, &mut cursor)?);

        let shared_path = if path_bit_len > 0 {
            path_codec::read_packed(payload, &mut cursor, path_bit_len)?
        } else {
            KeySlice::empty()
        };

        let left = if child_mask & LEFT_MASK != 0 {
            NodeReference::hash(read_hash(payload, &mut cursor)?)
        } else {
            NodeReference::empty()
        };
        let right = if child_mask & RIGHT_MASK != 0 {
            NodeReference::hash(read_hash(payload, &mut cursor)?)
        } else {
            NodeReference::empty()
        };

        let value = if has_long_value {
            // The v0 format does not carry the value length; it is learned
            // when the value is materialized.
            let hash = read_hash(payload, &mut cursor)?;
            if cursor != payload.len() {
                return Err(TrieError::malformed("trailing bytes after value"));
            }
            NodeValue::long(hash, None)
        } else {
            NodeValue::from_bytes(&payload[cursor..])
        };

        let node = Node::new(shared_path, value, left, right, NodeVersion::Legacy, None)?;
        Ok((node, is_secure))
    }

    pub fn encode_node(
        node: &Node,
        left_hash: Option<TrieHash>,
        right_hash: Option<TrieHash>,
        is_secure: bool,
    ) -> Result<Vec<u8>, TrieError> {
        let has_long_value = node.has_long_value();

        let mut flags = 0u8;
        if is_secure {
            flags |= SECURE_FLAG;
        }
        if has_long_value {
            flags |= LONG_VALUE_FLAG;
        }

        let mut child_mask = 0u16;
        if left_hash.is_some() {
            child_mask |= LEFT_MASK;
        }
        if right_hash.is_some() {
            child_mask |= RIGHT_MASK;
        }

        let path_bit_len = node.shared_path().len();
        let path_bit_len = u16::try_from(path_bit_len)
            .map_err(|_| TrieError::InvariantViolation("legacy path length exceeds uint16"))?;

        let mut encoded = Vec::new();
        encoded.push(ARITY);
        encoded.push(flags);
        encoded.extend_from_slice(&child_mask.to_be_bytes());
        encoded.extend_from_slice(&path_bit_len.to_be_bytes());
        if path_bit_len > 0 {
            encoded.extend_from_slice(&node.shared_path().encode());
        }

        if let Some(hash) = left_hash {
            encoded.extend_from_slice(&hash);
        }
        if let Some(hash) = right_hash {
            encoded.extend_from_slice(&hash);
        }

        if has_long_value {
            let hash = node.value_hash().ok_or(TrieError::InvariantViolation(
                "long value is missing its hash",
            ))?;
            encoded.extend_from_slice(&hash);
        } else if let Some(inline) = node.value().bytes_in_memory() {
            encoded.extend_from_slice(inline);
        }

        Ok(encoded)
    }
}

fn read_hash(payload: &[u8], cursor: &mut usize) -> Result<TrieHash, TrieError> {
    let end = *cursor + HASH_SIZE;
    if end > payload.len() {
        return Err(TrieError::malformed("hash field is truncated"));
    }

    let mut hash = [0u8; HASH_SIZE];
    hash.copy_from_slice(&payload[*cursor..end]);
    *cursor = end;
    Ok(hash)
}

fn read_u16(payload: &[u8], cursor: &mut usize) -> Result<u16, TrieError> {
    let end = *cursor + 2;
    if end > payload.len() {
        return Err(TrieError::malformed("uint16 field is truncated"));
    }

    let mut bytes = [0u8; 2];
    bytes.copy_from_slice(&payload[*cursor..end]);
    *cursor = end;
    Ok(u16::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::LegacyCodec;
    use crate::node::{Node, NodeReference, NodeValue, NodeVersion};
    use crate::path::KeySlice;

    fn legacy_terminal(path_bits: &[u8], value: &[u8]) -> Node {
        Node::new(
            KeySlice::from_bits(path_bits).unwrap(),
            NodeValue::from_bytes(value),
            NodeReference::empty(),
            NodeReference::empty(),
            NodeVersion::Legacy,
            None,
        )
        .unwrap()
    }

    #[test]
    fn rejects_wrong_arity() {
        let payload = [0x01, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert!(LegacyCodec::decode_node(&payload).is_err());
    }

    #[test]
    fn round_trips_terminal_with_inline_value() {
        let node = legacy_terminal(&[1, 0, 1, 0], &[1, 2, 3, 4]);
        let encoded = LegacyCodec::encode_node(&node, None, None, false).unwrap();
        let (decoded, is_secure) = LegacyCodec::decode_node(&encoded).unwrap();
        assert!(!is_secure);
        assert_eq!(decoded, node);
    }

    #[test]
    fn long_value_is_replaced_by_its_hash() {
        let node = legacy_terminal(&[], &[9u8; 40]);
        let encoded = LegacyCodec::encode_node(&node, None, None, true).unwrap();
        assert_eq!(encoded[0], super::ARITY);
        assert_eq!(encoded[1] & super::LONG_VALUE_FLAG, super::LONG_VALUE_FLAG);
        assert_eq!(encoded[1] & super::SECURE_FLAG, super::SECURE_FLAG);

        let (decoded, is_secure) = LegacyCodec::decode_node(&encoded).unwrap();
        assert!(is_secure);
        assert_eq!(decoded.value_hash(), node.value_hash());
        // Length is unknown until the value is materialized.
        assert_eq!(decoded.value_length(), None);
    }

    #[test]
    fn child_hashes_follow_the_bitmask() {
        let node = Node::new(
            KeySlice::empty(),
            NodeValue::Empty,
            NodeReference::hash([0xaa; 32]),
            NodeReference::hash([0xbb; 32]),
            NodeVersion::Legacy,
            None,
        )
        .unwrap();

        let encoded =
            LegacyCodec::encode_node(&node, Some([0xaa; 32]), Some([0xbb; 32]), false).unwrap();
        let (decoded, _) = LegacyCodec::decode_node(&encoded).unwrap();
        assert_eq!(decoded.left().known_hash(), Some([0xaa; 32]));
        assert_eq!(decoded.right().known_hash(), Some([0xbb; 32]));
    }
}
