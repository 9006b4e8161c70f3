// Blockchain database using sled
//
// Everything lives in the default tree, namespaced by key:
//   b‖hash        -> block
//   h‖height (LE) -> block hash
//   u‖tx hash     -> unspent outputs of that transaction
//   tip, height, pool, config

use crate::config::LedgerConfig;
use crate::consensus::ChainError;
use crate::core::{Block, DecodeError, Hash256, Serializable, Transaction};
use crate::error::Result;
use crate::storage::{UnspentOutput, UtxoDelta, UtxoSet};
use sled::{Batch, Db};
use std::path::Path;

const TIP_KEY: &[u8] = b"tip";
const HEIGHT_KEY: &[u8] = b"height";
const POOL_KEY: &[u8] = b"pool";
const CONFIG_KEY: &[u8] = b"config";

const BLOCK_PREFIX: u8 = b'b';
const HEIGHT_PREFIX: u8 = b'h';
const UTXO_PREFIX: u8 = b'u';

/// Blockchain database
pub struct BlockchainDB {
    db: Db,
}

impl BlockchainDB {
    /// Open (or create) the database at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Create an in-memory database (for testing)
    pub fn memory() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Store the chain parameters
    pub fn store_config(&self, config: &LedgerConfig) -> Result<()> {
        self.db.insert(CONFIG_KEY, config.to_json()?)?;
        Ok(())
    }

    /// Parameters the chain was created with, if any
    pub fn load_config(&self) -> Result<Option<LedgerConfig>> {
        match self.db.get(CONFIG_KEY)? {
            Some(data) => Ok(Some(LedgerConfig::from_json(&data)?)),
            None => Ok(None),
        }
    }

    /// Get a block by hash
    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>> {
        match self.db.get(Self::block_key(hash))? {
            Some(data) => Ok(Some(Block::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    /// Check if a block exists
    pub fn has_block(&self, hash: &Hash256) -> Result<bool> {
        Ok(self.db.contains_key(Self::block_key(hash))?)
    }

    /// Get block hash by height
    pub fn get_hash_by_height(&self, height: u64) -> Result<Option<Hash256>> {
        match self.db.get(Self::height_key(height))? {
            Some(data) => Ok(Some(Self::decode_hash(&data)?)),
            None => Ok(None),
        }
    }

    /// Get block by height
    pub fn get_block_by_height(&self, height: u64) -> Result<Option<Block>> {
        match self.get_hash_by_height(height)? {
            Some(hash) => self.get_block(&hash),
            None => Ok(None),
        }
    }

    /// Get the chain tip (hash of the last block)
    pub fn get_tip(&self) -> Result<Option<Hash256>> {
        match self.db.get(TIP_KEY)? {
            Some(data) => Ok(Some(Self::decode_hash(&data)?)),
            None => Ok(None),
        }
    }

    /// Number of stored blocks
    pub fn get_chain_height(&self) -> Result<u64> {
        match self.db.get(HEIGHT_KEY)? {
            Some(data) => {
                let bytes = <[u8; 8]>::try_from(&data[..]).map_err(|_| {
                    DecodeError(format!("Invalid height data length: {}", data.len()))
                })?;
                Ok(u64::from_le_bytes(bytes))
            }
            None => Ok(0), // No blocks stored yet
        }
    }

    /// Every stored block, lowest height first
    pub fn blocks(&self) -> Result<impl Iterator<Item = Result<Block>> + '_> {
        let height = self.get_chain_height()?;
        Ok((0..height).map(move |h| -> Result<Block> {
            self.get_block_by_height(h)?
                .ok_or_else(|| ChainError::MissingBlock { height: h }.into())
        }))
    }

    /// Transactions waiting for the next block, in arrival order
    pub fn load_pool(&self) -> Result<Vec<Transaction>> {
        match self.db.get(POOL_KEY)? {
            Some(data) => Ok(Vec::<Transaction>::deserialize(&data)?),
            None => Ok(Vec::new()),
        }
    }

    /// Read the persisted unspent-output index
    pub fn load_utxo_set(&self) -> Result<UtxoSet> {
        let mut utxo = UtxoSet::new();
        for entry in self.db.scan_prefix([UTXO_PREFIX]) {
            let (key, value) = entry?;
            let tx_hash = Self::decode_hash(&key[1..])?;
            let outputs = Vec::<UnspentOutput>::deserialize(&value)?;
            utxo.insert_entry(tx_hash, outputs);
        }
        Ok(utxo)
    }

    /// Atomically store a mined block as the new tip, drain the pool and
    /// write the index entries in `delta`
    pub fn append_block(&self, block: &Block, height: u64, utxo: &UtxoSet, delta: &UtxoDelta) -> Result<()> {
        let hash = block.hash();
        let mut batch = Batch::default();

        batch.insert(Self::block_key(&hash), block.serialize());
        batch.insert(Self::height_key(height), hash.as_bytes().as_slice());
        batch.insert(TIP_KEY, hash.as_bytes().as_slice());
        batch.insert(HEIGHT_KEY, (height + 1).to_le_bytes().as_slice());
        batch.remove(POOL_KEY);
        Self::write_delta(&mut batch, utxo, delta);

        self.db.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    /// Atomically store the pending pool and the index entries in `delta`
    pub fn record_pending(&self, pool: &[Transaction], utxo: &UtxoSet, delta: &UtxoDelta) -> Result<()> {
        let mut batch = Batch::default();
        batch.insert(POOL_KEY, pool.to_vec().serialize());
        Self::write_delta(&mut batch, utxo, delta);
        self.db.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    /// Atomically replace the whole persisted index with `utxo`
    pub fn replace_utxo_set(&self, utxo: &UtxoSet) -> Result<()> {
        let mut batch = Batch::default();
        for key in self.db.scan_prefix([UTXO_PREFIX]).keys() {
            batch.remove(key?);
        }
        for (tx_hash, outputs) in utxo.iter() {
            batch.insert(Self::utxo_key(tx_hash), outputs.to_vec().serialize());
        }
        self.db.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    /// Rewrite the stored bytes of a block in place
    #[cfg(test)]
    pub(crate) fn tamper_block(&self, hash: &Hash256, edit: impl FnOnce(&mut Vec<u8>)) -> Result<()> {
        let key = Self::block_key(hash);
        if let Some(data) = self.db.get(&key)? {
            let mut bytes = data.to_vec();
            edit(&mut bytes);
            self.db.insert(key, bytes)?;
        }
        Ok(())
    }

    fn write_delta(batch: &mut Batch, utxo: &UtxoSet, delta: &UtxoDelta) {
        for tx_hash in delta {
            match utxo.get(tx_hash) {
                Some(outputs) => batch.insert(Self::utxo_key(tx_hash), outputs.to_vec().serialize()),
                None => batch.remove(Self::utxo_key(tx_hash)),
            }
        }
    }

    fn decode_hash(data: &[u8]) -> std::result::Result<Hash256, DecodeError> {
        Hash256::from_slice(data)
            .ok_or_else(|| DecodeError(format!("Invalid hash length: {}", data.len())))
    }

    // Helper: create key for block storage
    fn block_key(hash: &Hash256) -> Vec<u8> {
        Self::prefixed(BLOCK_PREFIX, hash.as_bytes())
    }

    // Helper: create key for height index
    fn height_key(height: u64) -> Vec<u8> {
        Self::prefixed(HEIGHT_PREFIX, &height.to_le_bytes())
    }

    fn utxo_key(tx_hash: &Hash256) -> Vec<u8> {
        Self::prefixed(UTXO_PREFIX, tx_hash.as_bytes())
    }

    fn prefixed(prefix: u8, body: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + body.len());
        key.push(prefix);
        key.extend_from_slice(body);
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BlockHeader, KeyHash, TxInput, TxOutput};
    use crate::error::LedgerError;

    fn owner(byte: u8) -> KeyHash {
        KeyHash::new([byte; 20])
    }

    fn block_at(height: u64, prev: Hash256) -> Block {
        let mut block = Block::new(
            BlockHeader::new(1_700_000_000 + height, prev),
            vec![Transaction::reward(owner(1), 10, height)],
        );
        // Storage does not check proof of work
        block.header.hash = block.compute_hash();
        block
    }

    fn append(db: &BlockchainDB, utxo: &mut UtxoSet, block: &Block, height: u64) {
        let mut delta = UtxoDelta::new();
        for tx in &block.transactions {
            delta.extend(utxo.apply_transaction(tx));
        }
        db.append_block(block, height, utxo, &delta).unwrap();
    }

    #[test]
    fn test_append_and_get_block() {
        let db = BlockchainDB::memory().unwrap();
        let mut utxo = UtxoSet::new();
        let block = block_at(0, Hash256::zero());

        append(&db, &mut utxo, &block, 0);

        assert_eq!(db.get_block(&block.hash()).unwrap().unwrap(), block);
        assert!(db.has_block(&block.hash()).unwrap());
        assert_eq!(db.get_hash_by_height(0).unwrap(), Some(block.hash()));
        assert_eq!(db.get_block_by_height(0).unwrap().unwrap(), block);
        assert_eq!(db.get_tip().unwrap(), Some(block.hash()));
        assert_eq!(db.get_chain_height().unwrap(), 1);
    }

    #[test]
    fn test_empty_database() {
        let db = BlockchainDB::memory().unwrap();
        assert_eq!(db.get_chain_height().unwrap(), 0);
        assert_eq!(db.get_tip().unwrap(), None);
        assert!(db.load_pool().unwrap().is_empty());
        assert!(db.load_utxo_set().unwrap().is_empty());
        assert!(db.load_config().unwrap().is_none());
        assert_eq!(db.blocks().unwrap().count(), 0);
    }

    #[test]
    fn test_blocks_in_height_order() {
        let db = BlockchainDB::memory().unwrap();
        let mut utxo = UtxoSet::new();
        let first = block_at(0, Hash256::zero());
        let second = block_at(1, first.hash());
        append(&db, &mut utxo, &first, 0);
        append(&db, &mut utxo, &second, 1);

        let blocks: Vec<Block> = db.blocks().unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(blocks, vec![first, second.clone()]);
        assert_eq!(db.get_tip().unwrap(), Some(second.hash()));
        assert_eq!(db.load_utxo_set().unwrap(), utxo);
    }

    #[test]
    fn test_pending_pool_and_delta() {
        let db = BlockchainDB::memory().unwrap();
        let mut utxo = UtxoSet::new();
        let block = block_at(0, Hash256::zero());
        append(&db, &mut utxo, &block, 0);

        let reward = &block.transactions[0];
        let transfer = Transaction::new(
            vec![TxInput::new(reward.hash(), 0)],
            vec![TxOutput::new(4, owner(2)), TxOutput::new(6, owner(1))],
        );
        let delta = utxo.apply_transaction(&transfer);
        db.record_pending(&[transfer.clone()], &utxo, &delta).unwrap();

        assert_eq!(db.load_pool().unwrap(), vec![transfer]);
        let stored = db.load_utxo_set().unwrap();
        assert_eq!(stored, utxo);
        assert!(stored.get(&reward.hash()).is_none());

        // Mining the next block drains the pool
        let next = block_at(1, block.hash());
        append(&db, &mut utxo, &next, 1);
        assert!(db.load_pool().unwrap().is_empty());
    }

    #[test]
    fn test_pending_pool_survives_reopen() {
        let suffix: u64 = rand::random();
        let path = std::env::temp_dir().join(format!("utxo-ledger-db-{:x}", suffix));
        let mut utxo = UtxoSet::new();
        let block = block_at(0, Hash256::zero());
        let transfer = Transaction::new(
            vec![TxInput::new(block.transactions[0].hash(), 0)],
            vec![TxOutput::new(10, owner(2))],
        );
        {
            let db = BlockchainDB::new(&path).unwrap();
            append(&db, &mut utxo, &block, 0);
            let delta = utxo.apply_transaction(&transfer);
            db.record_pending(&[transfer.clone()], &utxo, &delta).unwrap();
        }

        let db = BlockchainDB::new(&path).unwrap();
        assert_eq!(db.load_pool().unwrap(), vec![transfer]);
        assert_eq!(db.load_utxo_set().unwrap(), utxo);
        drop(db);
        let _ = std::fs::remove_dir_all(&path);
    }

    #[test]
    fn test_replace_utxo_set() {
        let db = BlockchainDB::memory().unwrap();
        let mut utxo = UtxoSet::new();
        append(&db, &mut utxo, &block_at(0, Hash256::zero()), 0);

        let mut replacement = UtxoSet::new();
        replacement.apply_transaction(&Transaction::reward(owner(5), 10, 42));
        db.replace_utxo_set(&replacement).unwrap();

        assert_eq!(db.load_utxo_set().unwrap(), replacement);
    }

    #[test]
    fn test_config_storage() {
        let db = BlockchainDB::memory().unwrap();
        let config = LedgerConfig::new(12, 50).unwrap();
        db.store_config(&config).unwrap();
        assert_eq!(db.load_config().unwrap(), Some(config));
    }

    #[test]
    fn test_corrupt_block_is_decode_error() {
        let db = BlockchainDB::memory().unwrap();
        let hash = Hash256::new([3; 32]);
        db.db.insert(BlockchainDB::block_key(&hash), &[1u8, 2, 3][..]).unwrap();

        assert!(matches!(db.get_block(&hash), Err(LedgerError::Decode(_))));
    }

    #[test]
    fn test_missing_block_reported() {
        let db = BlockchainDB::memory().unwrap();
        db.db.insert(HEIGHT_KEY, 1u64.to_le_bytes().as_slice()).unwrap();

        let first = db.blocks().unwrap().next().unwrap();
        assert!(matches!(
            first,
            Err(LedgerError::Chain(ChainError::MissingBlock { height: 0 }))
        ));
    }
}
