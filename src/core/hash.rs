// Hashing utilities

use crate::core::{Hash256, KeyHash};
use sha2::{Digest, Sha256};

/// Single SHA256, the digest behind every block hash and transaction identity
pub fn sha256(data: &[u8]) -> Hash256 {
    Hash256::new(Sha256::digest(data).into())
}

/// SHA256(SHA256(data)), only used for address checksums
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// RIPEMD160(SHA256(data)) - used for owner key hashes
pub fn hash160(data: &[u8]) -> KeyHash {
    use ripemd::{Digest as RipemdDigest, Ripemd160};
    let sha = Sha256::digest(data);
    KeyHash::new(Ripemd160::digest(sha).into())
}

/// First four bytes of the double SHA256 of `payload`
pub fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = double_sha256(payload);
    [digest[0], digest[1], digest[2], digest[3]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        let hash = sha256(b"abc");
        assert_eq!(
            hash.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sha256_deterministic() {
        assert_eq!(sha256(b"hello world"), sha256(b"hello world"));
        assert_ne!(sha256(b"hello world"), sha256(b"hello worle"));
    }

    #[test]
    fn test_hash160() {
        let hash = hash160(b"test data");
        assert_eq!(hash.as_bytes().len(), 20);
        assert_eq!(hash, hash160(b"test data"));
    }

    #[test]
    fn test_checksum_prefix_of_double_sha() {
        let payload = b"payload";
        assert_eq!(checksum(payload)[..], double_sha256(payload)[..4]);
    }
}
