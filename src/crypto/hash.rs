//! Hash utilities and functions

use sha2::{Digest, Sha256};

/// Hash several fields as one concatenated message, hex encoded.
///
/// Fields are fed back to back with no separator.
pub fn hash_fields_hex(fields: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update(field);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            hash_fields_hex(&[b"abc"]),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_fields_hash_like_concatenation() {
        assert_eq!(hash_fields_hex(&[b"a", b"bc"]), hash_fields_hex(&[b"abc"]));
        assert_eq!(hash_fields_hex(&[b"abc", b""]), hash_fields_hex(&[b"abc"]));
    }
}
