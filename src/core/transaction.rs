// Transaction data structures

use crate::core::serialize::{
    read_array, read_u64, read_var_bytes, write_var_bytes, DecodeError, Serializable,
};
use crate::core::{sha256, Hash256, KeyHash};
use std::io::Read;

/// Output index carried by the single input of a reward transaction
pub const COINBASE_INDEX: u64 = u64::MAX;

/// Transaction input - references a previous transaction output
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TxInput {
    /// Hash of the transaction holding the spent output
    pub prev_tx_hash: Hash256,
    /// Index of the output in that transaction
    pub prev_index: u64,
    /// DER-encoded ECDSA signature over the trimmed digest.
    /// For a reward input this carries the block height instead.
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
    /// Uncompressed SEC1 public key of the spender, empty for a reward input
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
}

impl TxInput {
    /// Create an unsigned input spending `prev_tx_hash:prev_index`
    pub fn new(prev_tx_hash: Hash256, prev_index: u64) -> Self {
        Self {
            prev_tx_hash,
            prev_index,
            signature: Vec::new(),
            public_key: Vec::new(),
        }
    }

    /// Create a reward input; the height makes every reward unique
    pub fn coinbase(height: u64) -> Self {
        Self {
            prev_tx_hash: Hash256::zero(),
            prev_index: COINBASE_INDEX,
            signature: height.to_le_bytes().to_vec(),
            public_key: Vec::new(),
        }
    }

    /// Check if this is a reward input
    pub fn is_coinbase(&self) -> bool {
        self.prev_tx_hash.is_zero() && self.prev_index == COINBASE_INDEX
    }

    /// Canonical bytes: prev hash, index, signature, public key
    pub fn canonical_bytes(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.prev_tx_hash.as_bytes());
        buf.extend_from_slice(&self.prev_index.to_le_bytes());
        buf.extend_from_slice(&self.signature);
        buf.extend_from_slice(&self.public_key);
    }
}

impl Serializable for TxInput {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.prev_tx_hash.as_bytes());
        buf.extend_from_slice(&self.prev_index.to_le_bytes());
        let _ = write_var_bytes(&mut buf, &self.signature);
        let _ = write_var_bytes(&mut buf, &self.public_key);
        buf
    }

    fn from_reader(reader: &mut dyn Read) -> Result<Self, DecodeError> {
        let prev_tx_hash = Hash256::new(read_array(reader)?);
        let prev_index = read_u64(reader)?;
        let signature = read_var_bytes(reader)?;
        let public_key = read_var_bytes(reader)?;

        Ok(Self {
            prev_tx_hash,
            prev_index,
            signature,
            public_key,
        })
    }
}

/// Transaction output - a value locked to an owner key hash
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TxOutput {
    pub value: u64,
    pub owner_key_hash: KeyHash,
}

impl TxOutput {
    pub fn new(value: u64, owner_key_hash: KeyHash) -> Self {
        Self {
            value,
            owner_key_hash,
        }
    }

    /// Whether this output can be spent by the owner of `key_hash`
    pub fn is_locked_to(&self, key_hash: &KeyHash) -> bool {
        self.owner_key_hash == *key_hash
    }

    /// Canonical bytes: value, owner key hash
    pub fn canonical_bytes(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.value.to_le_bytes());
        buf.extend_from_slice(self.owner_key_hash.as_bytes());
    }
}

impl Serializable for TxOutput {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(28);
        buf.extend_from_slice(&self.value.to_le_bytes());
        buf.extend_from_slice(self.owner_key_hash.as_bytes());
        buf
    }

    fn from_reader(reader: &mut dyn Read) -> Result<Self, DecodeError> {
        let value = read_u64(reader)?;
        let owner_key_hash = KeyHash::new(read_array(reader)?);
        Ok(Self {
            value,
            owner_key_hash,
        })
    }
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Transaction {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self { inputs, outputs }
    }

    /// Create a reward transaction minting `value` to `to` in the block at `height`
    pub fn reward(to: KeyHash, value: u64, height: u64) -> Self {
        Self {
            inputs: vec![TxInput::coinbase(height)],
            outputs: vec![TxOutput::new(value, to)],
        }
    }

    /// Check if this is a reward transaction
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// Canonical bytes: every input, then every output
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_canonical(&mut buf);
        buf
    }

    pub fn write_canonical(&self, buf: &mut Vec<u8>) {
        for input in &self.inputs {
            input.canonical_bytes(buf);
        }
        for output in &self.outputs {
            output.canonical_bytes(buf);
        }
    }

    /// Transaction identity, signatures and public keys included
    pub fn hash(&self) -> Hash256 {
        sha256(&self.canonical_bytes())
    }

    /// Copy with every input's signature and public key cleared
    pub fn trimmed(&self) -> Self {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxInput::new(input.prev_tx_hash, input.prev_index))
            .collect();
        Self {
            inputs,
            outputs: self.outputs.clone(),
        }
    }

    /// The digest that gets signed and verified
    pub fn trimmed_digest(&self) -> Hash256 {
        self.trimmed().hash()
    }

    /// Sum of all output values, `None` on overflow
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |sum, out| sum.checked_add(out.value))
    }
}

impl Serializable for Transaction {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = self.inputs.serialize();
        buf.extend_from_slice(&self.outputs.serialize());
        buf
    }

    fn from_reader(reader: &mut dyn Read) -> Result<Self, DecodeError> {
        let inputs = Vec::<TxInput>::from_reader(reader)?;
        let outputs = Vec::<TxOutput>::from_reader(reader)?;
        Ok(Self { inputs, outputs })
    }
}

mod hex_bytes {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }
}
