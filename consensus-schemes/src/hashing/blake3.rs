//! BLAKE3 hashing.

use blake3::Hasher;

pub fn hash_blake3(data: &[u8]) -> [u8; 32] {
    blake3::hash(data).into()
}

/// Hash several segments as one logical message without concatenating them
/// first, used to hash block fields and validator-set entries in place.
pub fn hash_blake3_multiple(segments: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Hasher::new();
    for segment in segments {
        hasher.update(segment);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_segments_match_concatenation() {
        let whole = hash_blake3(b"hello world");
        let split = hash_blake3_multiple(&[b"hello", b" ", b"world"]);
        assert_eq!(whole, split);
    }
}
