//! Digest helpers
//!
//! All commitment hashing in KS works over lowercase hex strings,
//! built from SHA-256 and BLAKE3.

use sha2::{Digest, Sha256};

/// Key-derivation context for keyed signing
const SIGN_CONTEXT: &str = "KS ledger-core v1 keyed sign";

/// SHA-256 of arbitrary bytes as lowercase hex
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// BLAKE3 of arbitrary bytes as lowercase hex
pub fn blake3_hex(data: &[u8]) -> String {
    hex::encode(blake3::hash(data).as_bytes())
}

/// Keyed BLAKE3 digest as lowercase hex
///
/// The key material is stretched through `derive_key` so callers can
/// pass variable-length wallet keys.
pub fn keyed_hex(key: &str, data: &[u8]) -> String {
    let derived = blake3::derive_key(SIGN_CONTEXT, key.as_bytes());
    hex::encode(blake3::keyed_hash(&derived, data).as_bytes())
}

/// Content-addressed dedup key: two independent digests concatenated
pub fn dedup_key(payload: &[u8]) -> String {
    let mut key = sha256_hex(payload);
    key.push_str(&blake3_hex(payload));
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_deterministic() {
        assert_eq!(sha256_hex(b"hello"), sha256_hex(b"hello"));
        assert_ne!(sha256_hex(b"hello"), sha256_hex(b"world"));
    }

    #[test]
    fn test_keyed_hex_depends_on_key() {
        let a = keyed_hex("wallet-a", b"payload");
        let b = keyed_hex("wallet-b", b"payload");
        assert_ne!(a, b);
    }

    #[test]
    fn test_dedup_key_length() {
        // sha256 (64 hex) + blake3 (64 hex)
        assert_eq!(dedup_key(b"payload").len(), 128);
    }

    #[test]
    fn test_dedup_key_unique_per_payload() {
        assert_ne!(dedup_key(b"a"), dedup_key(b"b"));
    }
}
