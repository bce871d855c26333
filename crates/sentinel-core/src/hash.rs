//! SHA-256 hashing helpers.
//!
//! Single source of truth for the digest algorithm used by the audit chain
//! and the approval payload hashes. Changing the algorithm here changes it
//! system-wide.

use sha2::{Digest, Sha256};

/// Hex form of the all-zero digest that anchors an audit chain.
pub const ZERO_HASH_HEX: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Hash arbitrary bytes to a 32-byte SHA-256 digest.
#[inline]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash arbitrary bytes and return the lowercase hex digest.
#[inline]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(sha256(b"sentinel"), sha256(b"sentinel"));
        assert_ne!(sha256(b"a"), sha256(b"b"));
    }

    #[test]
    fn known_vector() {
        // SHA256("") from FIPS 180-4
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn zero_hash_is_64_hex_zeros() {
        assert_eq!(ZERO_HASH_HEX.len(), 64);
        assert!(ZERO_HASH_HEX.chars().all(|c| c == '0'));
    }
}
