//! Bit-addressable key views. A [`KeySlice`] is a zero-copy window of
//! `len` bits starting `offset` bits into a shared byte buffer; slicing and
//! prefix extraction never copy, only path concatenation repacks.

pub mod codec;

use std::fmt;
use std::sync::Arc;

use crate::error::TrieError;

#[derive(Clone)]
pub struct KeySlice {
    bytes: Arc<[u8]>,
    offset: usize,
    len: usize,
}

impl KeySlice {
    pub fn empty() -> Self {
        Self::from_key(&[])
    }

    /// Full-length view of a byte key: bit length is `8 * key.len()`.
    pub fn from_key(key: &[u8]) -> Self {
        Self {
            bytes: Arc::from(key),
            offset: 0,
            len: key.len() * 8,
        }
    }

    /// View over an already packed buffer. The buffer must be exactly
    /// `ceil(bit_len / 8)` bytes with unused trailing bits zeroed.
    pub fn from_packed(packed: Vec<u8>, bit_len: usize) -> Result<Self, TrieError> {
        if packed.len() != packed_len(bit_len) {
            return Err(TrieError::malformed("shared path byte length mismatch"));
        }

        let spare_bits = bit_len % 8;
        if spare_bits != 0 {
            let padding = packed[packed.len() - 1] & (0xff >> spare_bits);
            if padding != 0 {
                return Err(TrieError::malformed("shared path has nonzero padding bits"));
            }
        }

        Ok(Self {
            bytes: packed.into(),
            offset: 0,
            len: bit_len,
        })
    }

    /// Builds a slice from individual 0/1 bit values.
    pub fn from_bits(bits: &[u8]) -> Result<Self, TrieError> {
        if bits.iter().any(|bit| *bit > 1) {
            return Err(TrieError::InvariantViolation(
                "key slice bits must be 0 or 1",
            ));
        }

        let mut packed = vec![0u8; packed_len(bits.len())];
        for (index, bit) in bits.iter().enumerate() {
            if *bit == 1 {
                packed[index / 8] |= 0x80 >> (index % 8);
            }
        }

        Ok(Self {
            bytes: packed.into(),
            offset: 0,
            len: bits.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bit at position `index`. Panics when out of range, like slice indexing.
    pub fn get(&self, index: usize) -> u8 {
        assert!(index < self.len, "bit index {index} out of range {}", self.len);
        let position = self.offset + index;
        (self.bytes[position / 8] >> (7 - position % 8)) & 1
    }

    /// Sub-view of bits `[lo, hi)`, sharing the backing buffer.
    pub fn slice(&self, lo: usize, hi: usize) -> Self {
        assert!(lo <= hi && hi <= self.len, "slice [{lo}, {hi}) out of range");
        Self {
            bytes: Arc::clone(&self.bytes),
            offset: self.offset + lo,
            len: hi - lo,
        }
    }

    /// Sub-view of every bit from `lo` to the end.
    pub fn tail(&self, lo: usize) -> Self {
        self.slice(lo, self.len)
    }

    pub fn common_prefix_len(&self, other: &KeySlice) -> usize {
        let max = self.len.min(other.len);
        let mut shared = 0usize;
        while shared < max && self.get(shared) == other.get(shared) {
            shared += 1;
        }
        shared
    }

    pub fn common_prefix(&self, other: &KeySlice) -> Self {
        self.slice(0, self.common_prefix_len(other))
    }

    /// Concatenation `self || bit || child_path` into a freshly packed buffer.
    /// Used when folding a child into its parent and when walking down paths.
    pub fn rebuild_shared_path(&self, bit: u8, child_path: &KeySlice) -> Self {
        debug_assert!(bit <= 1);

        let total = self.len + 1 + child_path.len();
        let mut packed = vec![0u8; packed_len(total)];
        let mut write = |index: usize, value: u8| {
            if value == 1 {
                packed[index / 8] |= 0x80 >> (index % 8);
            }
        };

        for index in 0..self.len {
            write(index, self.get(index));
        }
        write(self.len, bit);
        for index in 0..child_path.len() {
            write(self.len + 1 + index, child_path.get(index));
        }

        Self {
            bytes: packed.into(),
            offset: 0,
            len: total,
        }
    }

    /// Canonical packed encoding: big-endian bit order, unused trailing bits
    /// of the final byte zeroed.
    pub fn encode(&self) -> Vec<u8> {
        let mut packed = vec![0u8; packed_len(self.len)];
        for index in 0..self.len {
            if self.get(index) == 1 {
                packed[index / 8] |= 0x80 >> (index % 8);
            }
        }
        packed
    }

    /// The byte key this slice spells, when byte-aligned.
    pub fn to_key_bytes(&self) -> Option<Vec<u8>> {
        if self.len % 8 != 0 {
            return None;
        }
        Some(self.encode())
    }
}

pub(crate) fn packed_len(bit_len: usize) -> usize {
    bit_len / 8 + usize::from(bit_len % 8 != 0)
}

impl PartialEq for KeySlice {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && (0..self.len).all(|index| self.get(index) == other.get(index))
    }
}

impl Eq for KeySlice {}

impl fmt::Debug for KeySlice {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "KeySlice[{}](", self.len)?;
        for index in 0..self.len.min(64) {
            write!(formatter, "{}", self.get(index))?;
        }
        if self.len > 64 {
            write!(formatter, "…")?;
        }
        write!(formatter, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::KeySlice;

    #[test]
    fn from_key_exposes_bits_most_significant_first() {
        let slice = KeySlice::from_key(&[0b1010_0001]);
        assert_eq!(slice.len(), 8);
        assert_eq!(slice.get(0), 1);
        assert_eq!(slice.get(1), 0);
        assert_eq!(slice.get(2), 1);
        assert_eq!(slice.get(7), 1);
    }

    #[test]
    fn slicing_shares_the_buffer_and_shifts_the_offset() {
        let slice = KeySlice::from_key(&[0b1100_1100, 0b0011_0011]);
        let middle = slice.slice(4, 12);
        assert_eq!(middle.len(), 8);
        assert_eq!(middle.get(0), 1);
        assert_eq!(middle.get(1), 1);
        assert_eq!(middle.get(4), 0);
        assert_eq!(middle.get(6), 1);
    }

    #[test]
    fn common_prefix_stops_at_first_divergence() {
        let first = KeySlice::from_bits(&[1, 0, 1, 1]).unwrap();
        let second = KeySlice::from_bits(&[1, 0, 0, 1]).unwrap();
        let prefix = first.common_prefix(&second);
        assert_eq!(prefix, KeySlice::from_bits(&[1, 0]).unwrap());
    }

    #[test]
    fn rebuild_shared_path_concatenates_with_the_implicit_bit() {
        let parent = KeySlice::from_bits(&[1, 1]).unwrap();
        let child = KeySlice::from_bits(&[0, 0, 1]).unwrap();
        let rebuilt = parent.rebuild_shared_path(1, &child);
        assert_eq!(rebuilt, KeySlice::from_bits(&[1, 1, 1, 0, 0, 1]).unwrap());
    }

    #[test]
    fn encode_zeroes_unused_trailing_bits() {
        let slice = KeySlice::from_key(&[0xff, 0xff]).slice(0, 9);
        assert_eq!(slice.encode(), vec![0xff, 0x80]);
    }

    #[test]
    fn encode_of_unaligned_view_repacks_from_bit_zero() {
        let slice = KeySlice::from_key(&[0b0000_1111]).tail(4);
        assert_eq!(slice.encode(), vec![0b1111_0000]);
    }

    #[test]
    fn from_packed_rejects_dirty_padding() {
        assert!(KeySlice::from_packed(vec![0b1010_0001], 4).is_err());
        assert!(KeySlice::from_packed(vec![0b1010_0000], 4).is_ok());
        assert!(KeySlice::from_packed(vec![0b1010_0000, 0x00], 4).is_err());
    }

    #[test]
    fn to_key_bytes_requires_byte_alignment() {
        let aligned = KeySlice::from_key(b"ab");
        assert_eq!(aligned.to_key_bytes(), Some(b"ab".to_vec()));
        assert_eq!(aligned.slice(0, 9).to_key_bytes(), None);
    }
}
