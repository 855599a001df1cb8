//! Shared-path serialization inside node encodings.
//!
//! A path of bit length `L` is written as one tag byte followed by the
//! packed bits: tag in `[0, 31]` means `L = tag + 1`, tag in `[32, 254]`
//! means `L = tag + 128`, and tag 255 is followed by `L` as a VarInt. The
//! carved-out ranges keep the most common lengths in a single byte. An empty
//! path is written as nothing; presence is governed by the node header flag.

use crate::error::TrieError;
use crate::path::{packed_len, KeySlice};
use crate::varint;

const SHORT_TAG_MAX_LEN: usize = 32;
const MID_TAG_MIN_LEN: usize = 160;
const MID_TAG_MAX_LEN: usize = 382;
const VARINT_ESCAPE: u8 = 0xff;

fn tag_len(bit_len: usize) -> usize {
    if (1..=SHORT_TAG_MAX_LEN).contains(&bit_len)
        || (MID_TAG_MIN_LEN..=MID_TAG_MAX_LEN).contains(&bit_len)
    {
        1
    } else {
        1 + varint::encoded_len(bit_len as u64)
    }
}

/// Total encoded length of a path, zero for the empty path.
pub fn serialized_len(path: &KeySlice) -> usize {
    if path.is_empty() {
        return 0;
    }
    tag_len(path.len()) + packed_len(path.len())
}

pub fn write(path: &KeySlice, output: &mut Vec<u8>) {
    if path.is_empty() {
        return;
    }

    let bit_len = path.len();
    if (1..=SHORT_TAG_MAX_LEN).contains(&bit_len) {
        output.push((bit_len - 1) as u8);
    } else if (MID_TAG_MIN_LEN..=MID_TAG_MAX_LEN).contains(&bit_len) {
        output.push((bit_len - 128) as u8);
    } else {
        output.push(VARINT_ESCAPE);
        varint::write(bit_len as u64, output);
    }

    output.extend_from_slice(&path.encode());
}

/// Reads a non-empty path at `cursor`; callers skip this entirely when the
/// header says no path is present.
pub fn read(input: &[u8], cursor: &mut usize) -> Result<KeySlice, TrieError> {
    let bit_len = read_bit_len(input, cursor)?;
    read_packed(input, cursor, bit_len)
}

pub fn read_bit_len(input: &[u8], cursor: &mut usize) -> Result<usize, TrieError> {
    let tag = *input
        .get(*cursor)
        .ok_or_else(|| TrieError::malformed("shared path tag is truncated"))?;
    *cursor += 1;

    match tag {
        0..=31 => Ok(usize::from(tag) + 1),
        VARINT_ESCAPE => {
            let bit_len = varint::read(input, cursor)?;
            usize::try_from(bit_len)
                .map_err(|_| TrieError::malformed("shared path length overflows"))
        }
        mid => Ok(usize::from(mid) + 128),
    }
}

/// Reads `ceil(bit_len / 8)` packed path bytes.
pub fn read_packed(
    input: &[u8],
    cursor: &mut usize,
    bit_len: usize,
) -> Result<KeySlice, TrieError> {
    let end = cursor
        .checked_add(packed_len(bit_len))
        .filter(|end| *end <= input.len())
        .ok_or_else(|| TrieError::malformed("shared path bytes are truncated"))?;

    let packed = input[*cursor..end].to_vec();
    *cursor = end;
    KeySlice::from_packed(packed, bit_len)
}

#[cfg(test)]
mod tests {
    use super::{read, read_bit_len, serialized_len, write};
    use crate::path::KeySlice;

    fn round_trip(bit_len: usize) {
        let path = KeySlice::from_bits(&vec![1u8; bit_len]).unwrap();
        let mut output = Vec::new();
        write(&path, &mut output);
        assert_eq!(output.len(), serialized_len(&path));

        let mut cursor = 0usize;
        let decoded = read(&output, &mut cursor).unwrap();
        assert_eq!(cursor, output.len());
        assert_eq!(decoded, path);
    }

    #[test]
    fn single_tag_byte_covers_the_compact_ranges() {
        let short = KeySlice::from_bits(&[1; 8]).unwrap();
        let mut output = Vec::new();
        write(&short, &mut output);
        assert_eq!(output[0], 7);

        let mid = KeySlice::from_bits(&vec![0u8; 160]).unwrap();
        output.clear();
        write(&mid, &mut output);
        assert_eq!(output[0], 32);
    }

    #[test]
    fn gap_lengths_take_the_varint_escape() {
        let path = KeySlice::from_bits(&vec![1u8; 120]).unwrap();
        let mut output = Vec::new();
        write(&path, &mut output);
        assert_eq!(output[0], 0xff);
        assert_eq!(read_bit_len(&output, &mut 0usize).unwrap(), 120);
    }

    #[test]
    fn round_trips_across_all_tag_forms() {
        for bit_len in [1, 3, 8, 32, 33, 120, 159, 160, 382, 383, 1000] {
            round_trip(bit_len);
        }
    }

    #[test]
    fn truncated_path_bytes_are_rejected() {
        let path = KeySlice::from_bits(&[1; 16]).unwrap();
        let mut output = Vec::new();
        write(&path, &mut output);
        output.truncate(output.len() - 1);

        let mut cursor = 0usize;
        assert!(read(&output, &mut cursor).is_err());
    }

    #[test]
    fn empty_path_serializes_to_nothing() {
        let mut output = Vec::new();
        write(&KeySlice::empty(), &mut output);
        assert!(output.is_empty());
        assert_eq!(serialized_len(&KeySlice::empty()), 0);
    }
}
