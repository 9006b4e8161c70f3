// Block data structures

use crate::core::serialize::{read_array, read_u64, DecodeError, Serializable};
use crate::core::{Hash256, Transaction};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::time::{SystemTime, UNIX_EPOCH};

/// Block header
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BlockHeader {
    /// Block timestamp (Unix epoch seconds)
    pub timestamp: u64,
    /// Nonce for proof-of-work
    pub nonce: u64,
    /// Proof-of-work hash of this block, zero until mined
    pub hash: Hash256,
    /// Hash of the previous block, zero for the first block
    pub prev_hash: Hash256,
}

impl BlockHeader {
    pub fn new(timestamp: u64, prev_hash: Hash256) -> Self {
        Self {
            timestamp,
            nonce: 0,
            hash: Hash256::zero(),
            prev_hash,
        }
    }

    /// Header for a block extending `prev_hash`, stamped with the current time
    pub fn now(prev_hash: Hash256) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self::new(timestamp, prev_hash)
    }

    /// Canonical header bytes with the hash field treated as empty:
    /// timestamp, nonce, prev hash
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(48);
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(self.prev_hash.as_bytes());
        buf
    }

    /// Hash of a block with this header at `nonce` whose transactions encode
    /// to `tx_bytes`. The stored hash field never takes part.
    pub fn digest_with_nonce(&self, nonce: u64, tx_bytes: &[u8]) -> Hash256 {
        let mut hasher = Sha256::new();
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(nonce.to_le_bytes());
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(tx_bytes);
        Hash256::new(hasher.finalize().into())
    }
}

/// Block - contains header and transactions
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    /// Canonical bytes of every transaction, concatenated in block order
    pub fn transactions_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for tx in &self.transactions {
            tx.write_canonical(&mut buf);
        }
        buf
    }

    /// Recompute the block hash from content, ignoring the stored hash
    pub fn compute_hash(&self) -> Hash256 {
        self.header
            .digest_with_nonce(self.header.nonce, &self.transactions_bytes())
    }

    /// The stored proof-of-work hash
    pub fn hash(&self) -> Hash256 {
        self.header.hash
    }

    /// Check if this is the first block of a chain
    pub fn is_genesis(&self) -> bool {
        self.header.prev_hash.is_zero()
    }
}

impl Serializable for BlockHeader {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(80);
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(self.hash.as_bytes());
        buf.extend_from_slice(self.prev_hash.as_bytes());
        buf
    }

    fn from_reader(reader: &mut dyn Read) -> Result<Self, DecodeError> {
        let timestamp = read_u64(reader)?;
        let nonce = read_u64(reader)?;
        let hash = Hash256::new(read_array(reader)?);
        let prev_hash = Hash256::new(read_array(reader)?);
        Ok(Self {
            timestamp,
            nonce,
            hash,
            prev_hash,
        })
    }
}

impl Serializable for Block {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = self.header.serialize();
        buf.extend_from_slice(&self.transactions.serialize());
        buf
    }

    fn from_reader(reader: &mut dyn Read) -> Result<Self, DecodeError> {
        let header = BlockHeader::from_reader(reader)?;
        let transactions = Vec::<Transaction>::from_reader(reader)?;
        Ok(Self {
            header,
            transactions,
        })
    }
}
