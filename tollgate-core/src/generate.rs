//! Identifier and token generation, and the token hashing primitive.
//!
//! Mirrors `pkg/generate` of the system this crate's domain is modeled on:
//! lowercase nonces for IDs, a wider alphabet for raw tokens, SHA-256 for
//! the hash stored at rest.

use rand::Rng;
use sha2::{Digest, Sha256};

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const TOKEN_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789*$%+&";

fn nonce(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

/// A 22-character lowercase identifier nonce, without its type prefix.
pub fn id_nonce() -> String {
    nonce(ID_ALPHABET, 22)
}

/// A 64-character raw token nonce.
pub fn token() -> String {
    nonce(TOKEN_ALPHABET, 64)
}

/// Hex-encoded SHA-256 digest of `raw`, used as the at-rest representation
/// of every token. Hashing is infallible, so unlike the source this never
/// needs to forward a write error that cannot occur in memory.
pub fn hash(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_nonce_is_22_lowercase_chars() {
        let id = id_nonce();
        assert_eq!(id.len(), 22);
        assert!(id.chars().all(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn token_is_64_chars_from_alphabet() {
        let t = token();
        assert_eq!(t.len(), 64);
        assert!(t.bytes().all(|b| TOKEN_ALPHABET.contains(&b)));
    }

    #[test]
    fn hash_is_deterministic_hex_sha256() {
        let h1 = hash("hello");
        let h2 = hash("hello");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_eq!(
            h1,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn distinct_inputs_hash_differently() {
        assert_ne!(hash("a"), hash("b"));
    }
}
