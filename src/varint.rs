//! Bitcoin-style variable-length integers (1, 3, 5 or 9 bytes), used for
//! shared-path lengths and the children-size field of node encodings.

use crate::error::TrieError;

pub fn encoded_len(value: u64) -> usize {
    if value < 0xfd {
        1
    } else if value <= 0xffff {
        3
    } else if value <= 0xffff_ffff {
        5
    } else {
        9
    }
}

pub fn write(value: u64, output: &mut Vec<u8>) {
    if value < 0xfd {
        output.push(value as u8);
    } else if value <= 0xffff {
        output.push(0xfd);
        output.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= 0xffff_ffff {
        output.push(0xfe);
        output.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        output.push(0xff);
        output.extend_from_slice(&value.to_le_bytes());
    }
}

pub fn encode(value: u64) -> Vec<u8> {
    let mut output = Vec::with_capacity(encoded_len(value));
    write(value, &mut output);
    output
}

pub fn read(input: &[u8], cursor: &mut usize) -> Result<u64, TrieError> {
    let first = *input
        .get(*cursor)
        .ok_or_else(|| TrieError::malformed("varint is truncated"))?;
    *cursor += 1;

    match first {
        0xfd => Ok(u64::from(u16::from_le_bytes(read_array(input, cursor)?))),
        0xfe => Ok(u64::from(u32::from_le_bytes(read_array(input, cursor)?))),
        0xff => Ok(u64::from_le_bytes(read_array(input, cursor)?)),
        small => Ok(u64::from(small)),
    }
}

fn read_array<const N: usize>(input: &[u8], cursor: &mut usize) -> Result<[u8; N], TrieError> {
    let end = *cursor + N;
    if end > input.len() {
        return Err(TrieError::malformed("varint payload is truncated"));
    }

    let mut bytes = [0u8; N];
    bytes.copy_from_slice(&input[*cursor..end]);
    *cursor = end;
    Ok(bytes)
}
