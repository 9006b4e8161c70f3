// Keys, signatures and addresses

use crate::core::{checksum, hash160, Hash256, KeyHash};
use crate::error::{LedgerError, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Version byte prefixed to the key hash inside an address
pub const ADDRESS_VERSION: u8 = 0x00;

const CHECKSUM_LEN: usize = 4;
const ADDRESS_PAYLOAD_LEN: usize = 1 + 20 + CHECKSUM_LEN;

/// Base58Check address: version ‖ key hash ‖ checksum
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Create address from an owner key hash
    pub fn from_key_hash(key_hash: &KeyHash) -> Self {
        let mut payload = Vec::with_capacity(ADDRESS_PAYLOAD_LEN);
        payload.push(ADDRESS_VERSION);
        payload.extend_from_slice(key_hash.as_bytes());
        let check = checksum(&payload);
        payload.extend_from_slice(&check);
        Self(bs58::encode(payload).into_string())
    }

    /// Parse and validate address text
    pub fn parse(text: &str) -> Result<Self> {
        let address = Self(text.to_string());
        address.to_key_hash()?;
        Ok(address)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover the key hash, checking length, version and checksum
    pub fn to_key_hash(&self) -> Result<KeyHash> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| LedgerError::InvalidAddress(format!("{}: {}", self.0, e)))?;

        if bytes.len() != ADDRESS_PAYLOAD_LEN {
            return Err(LedgerError::InvalidAddress(format!(
                "{}: expected {} bytes, got {}",
                self.0,
                ADDRESS_PAYLOAD_LEN,
                bytes.len()
            )));
        }
        if bytes[0] != ADDRESS_VERSION {
            return Err(LedgerError::InvalidAddress(format!(
                "{}: unknown version {}",
                self.0, bytes[0]
            )));
        }

        let (versioned, check) = bytes.split_at(1 + 20);
        if checksum(versioned)[..] != check[..] {
            return Err(LedgerError::InvalidAddress(format!("{}: bad checksum", self.0)));
        }

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&versioned[1..]);
        Ok(KeyHash::new(hash))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owner key hash of a public key: RIPEMD160(SHA256(x-coordinate))
pub fn owner_key_hash(public_key: &PublicKey) -> KeyHash {
    let uncompressed = public_key.serialize_uncompressed();
    hash160(&uncompressed[1..33])
}

/// Owner key hash of an encoded public key, `None` if the bytes are not a key
pub fn owner_key_hash_from_bytes(public_key: &[u8]) -> Option<KeyHash> {
    PublicKey::from_slice(public_key)
        .ok()
        .map(|key| owner_key_hash(&key))
}

/// ECDSA-sign a 32-byte digest, DER encoded
pub fn sign_digest(secret_key: &SecretKey, digest: &Hash256) -> Vec<u8> {
    let secp = Secp256k1::signing_only();
    let message = Message::from_digest(digest.0);
    secp.sign_ecdsa(&message, secret_key).serialize_der().to_vec()
}

/// Check a DER signature over `digest`. Malformed keys or signatures are
/// reported as `false`, never as errors.
pub fn verify_signature(public_key: &[u8], digest: &Hash256, signature: &[u8]) -> bool {
    let Ok(public_key) = PublicKey::from_slice(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_der(signature) else {
        return false;
    };
    let secp = Secp256k1::verification_only();
    let message = Message::from_digest(digest.0);
    secp.verify_ecdsa(&message, &signature, &public_key).is_ok()
}

/// A spending identity. Holds its keypair privately and only exposes the
/// public identity and the ability to sign.
#[derive(Clone)]
pub struct Wallet {
    secret_key: SecretKey,
    public_key: PublicKey,
    key_hash: KeyHash,
}

impl Wallet {
    /// Generate a fresh keypair from the OS random source
    pub fn generate() -> Result<Self> {
        let mut rng = OsRng;
        loop {
            let mut bytes = [0u8; 32];
            rng.try_fill_bytes(&mut bytes)
                .map_err(|e| LedgerError::Entropy(e.to_string()))?;
            // Out-of-range scalars are astronomically rare; draw again
            if let Ok(secret_key) = SecretKey::from_slice(&bytes) {
                return Ok(Self::from_secret_key(secret_key));
            }
        }
    }

    /// Restore a wallet from its 32 secret key bytes
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secret_key = SecretKey::from_slice(bytes)
            .map_err(|e| LedgerError::Keystore(format!("Invalid secret key: {}", e)))?;
        Ok(Self::from_secret_key(secret_key))
    }

    fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::signing_only();
        let public_key = secret_key.public_key(&secp);
        let key_hash = owner_key_hash(&public_key);
        Self {
            secret_key,
            public_key,
            key_hash,
        }
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret_key.secret_bytes()
    }

    /// Uncompressed SEC1 public key, as embedded in transaction inputs
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public_key.serialize_uncompressed().to_vec()
    }

    pub fn key_hash(&self) -> KeyHash {
        self.key_hash
    }

    pub fn address(&self) -> Address {
        Address::from_key_hash(&self.key_hash)
    }

    pub fn sign(&self, digest: &Hash256) -> Vec<u8> {
        sign_digest(&self.secret_key, digest)
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}
