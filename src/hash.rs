use tiny_keccak::{Hasher, Keccak};

pub const HASH_SIZE: usize = 32;

pub type TrieHash = [u8; HASH_SIZE];

// RLP encoding of the empty byte string; its Keccak-256 is the root of the
// empty trie.
pub const EMPTY_TRIE_RLP: [u8; 1] = [0x80];

pub fn keccak256(input: &[u8]) -> TrieHash {
    let mut hasher = Keccak::v256();
    hasher.update(input);
    let mut output = [0u8; HASH_SIZE];
    hasher.finalize(&mut output);
    output
}

pub fn empty_trie_hash() -> TrieHash {
    keccak256(&EMPTY_TRIE_RLP)
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(output, "{byte:02x}");
    }
    output
}
