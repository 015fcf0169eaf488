// Credential hashing and comparison primitives

use sha2::{Digest, Sha256};
use std::hash::Hasher;
use twox_hash::XxHash64;

/// SHA-256 of a secret, lowercase hex.
///
/// Unsalted and deterministic so the digest can be used as a storage key.
/// Callers must only feed high-entropy random secrets through this, never
/// human-chosen passwords.
pub fn hash_secure(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Short non-cryptographic digest for display and bucketing.
///
/// Never use this for an authentication decision.
pub fn hash_fast(value: &str) -> String {
    format!("{:016x}", fast_u64(value))
}

pub(crate) fn fast_u64(value: &str) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(value.as_bytes());
    hasher.finish()
}

/// Compare two strings without short-circuiting on the first differing byte.
///
/// A length mismatch returns `false` immediately; length is not treated as secret.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// True when `value` looks like a digest produced by [`hash_secure`].
pub fn is_secure_digest(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_secure_consistency() {
        let hash1 = hash_secure("sk-live-abc123");
        let hash2 = hash_secure("sk-live-abc123");
        let hash3 = hash_secure("sk-live-abc124");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert!(is_secure_digest(&hash1));
    }

    #[test]
    fn test_hash_secure_known_vector() {
        assert_eq!(
            hash_secure("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash_fast_is_short_and_stable() {
        let a = hash_fast("some-key");
        assert_eq!(a.len(), 16);
        assert_eq!(a, hash_fast("some-key"));
        assert_ne!(a, hash_fast("other-key"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("secret", "secret"));
        assert!(constant_time_eq("", ""));
        assert!(!constant_time_eq("secret", "secreT"));
        assert!(!constant_time_eq("secret", "secret2"));
        assert!(!constant_time_eq("a", ""));
    }

    #[test]
    fn test_is_secure_digest() {
        assert!(!is_secure_digest("not-a-hash"));
        assert!(!is_secure_digest(&"A".repeat(64)));
        assert!(is_secure_digest(&"0".repeat(64)));
    }
}
