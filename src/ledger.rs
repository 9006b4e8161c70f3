// Ledger: the persisted chain, its pending pool and its unspent-output index

use crate::config::LedgerConfig;
use crate::consensus::{CancelToken, ChainError, ChainVerifier, Miner, TransactionValidator, TxError};
use crate::core::{Block, BlockHeader, Hash256, KeyHash, Transaction};
use crate::error::{LedgerError, Result};
use crate::storage::{BlockchainDB, UtxoSet};
use crate::wallet::{build_transfer, Wallet};
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Where a transaction was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxLocation {
    Block { height: u64, hash: Hash256 },
    Pending,
}

impl fmt::Display for TxLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TxLocation::Block { height, hash } => write!(f, "block {} ({})", height, hash),
            TxLocation::Pending => write!(f, "pending pool"),
        }
    }
}

#[derive(serde::Serialize)]
struct TxView<'a> {
    hash: Hash256,
    #[serde(flatten)]
    transaction: &'a Transaction,
}

#[derive(serde::Serialize)]
struct BlockView<'a> {
    height: u64,
    header: &'a BlockHeader,
    transactions: Vec<TxView<'a>>,
}

#[derive(serde::Serialize)]
struct ChainView<'a> {
    config: &'a LedgerConfig,
    height: u64,
    tip: Option<Hash256>,
    valid: Option<bool>,
    blocks: Vec<BlockView<'a>>,
    pending: Vec<TxView<'a>>,
}

fn tx_views(transactions: &[Transaction]) -> Vec<TxView<'_>> {
    transactions
        .iter()
        .map(|transaction| TxView {
            hash: transaction.hash(),
            transaction,
        })
        .collect()
}

/// A single chain with its pending pool and unspent-output index.
///
/// Every mutation is persisted in one atomic batch before the in-memory
/// state changes, so a failed write leaves both sides as they were.
pub struct Blockchain {
    config: LedgerConfig,
    db: BlockchainDB,
    pool: Vec<Transaction>,
    utxo: UtxoSet,
    /// Outcome of the last `verify`, `None` until one has run
    valid: Option<bool>,
}

impl Blockchain {
    /// Open the chain stored at `path`, creating it with `config` if empty.
    /// An existing chain keeps the parameters it was created with.
    pub fn open<P: AsRef<Path>>(path: P, config: LedgerConfig) -> Result<Self> {
        log::info!("Opening ledger at {}", path.as_ref().display());
        Self::with_db(BlockchainDB::new(path)?, config)
    }

    /// A chain backed by a temporary database
    pub fn memory(config: LedgerConfig) -> Result<Self> {
        Self::with_db(BlockchainDB::memory()?, config)
    }

    fn with_db(db: BlockchainDB, requested: LedgerConfig) -> Result<Self> {
        requested.validate()?;
        let config = match db.load_config()? {
            Some(stored) => {
                if stored != requested {
                    log::info!(
                        "Chain was created with difficulty {} and reward {}; keeping those",
                        stored.difficulty,
                        stored.reward
                    );
                }
                stored
            }
            None => {
                db.store_config(&requested)?;
                requested
            }
        };

        let pool = db.load_pool()?;
        let utxo = db.load_utxo_set()?;
        let mut chain = Self {
            config,
            db,
            pool,
            utxo,
            valid: None,
        };

        let height = chain.height()?;
        if chain.utxo.is_empty() && height > 0 {
            log::info!("No stored unspent-output index, rebuilding");
            chain.reindex()?;
        }

        log::info!(
            "Ledger ready: {} blocks, {} pending transactions, {} unspent outputs",
            height,
            chain.pool.len(),
            chain.utxo.output_count()
        );
        Ok(chain)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Number of blocks in the chain
    pub fn height(&self) -> Result<u64> {
        self.db.get_chain_height()
    }

    pub fn tip(&self) -> Result<Option<Hash256>> {
        self.db.get_tip()
    }

    /// Transactions waiting for the next block
    pub fn pool(&self) -> &[Transaction] {
        &self.pool
    }

    /// The live index: every block, then every pending transaction
    pub fn utxo(&self) -> &UtxoSet {
        &self.utxo
    }

    /// Cached outcome of the last verification
    pub fn is_valid(&self) -> Option<bool> {
        self.valid
    }

    pub fn balance(&self, owner: &KeyHash) -> Result<u64> {
        self.utxo
            .balance_of(owner)
            .ok_or_else(|| TxError::ValueOverflow.into())
    }

    /// Build, check and pool a transfer of `amount` from `from` to `to`
    pub fn send(&mut self, from: &Wallet, to: &KeyHash, amount: u64) -> Result<Transaction> {
        let tx = build_transfer(from, to, amount, &self.utxo)?;
        TransactionValidator::check(&tx, &self.utxo)?;

        let mut utxo = self.utxo.clone();
        let delta = utxo.apply_transaction(&tx);
        let mut pool = self.pool.clone();
        pool.push(tx.clone());

        self.db.record_pending(&pool, &utxo, &delta)?;
        self.utxo = utxo;
        self.pool = pool;

        log::info!(
            "Pooled transaction {}: {} from {} to {}",
            tx.hash(),
            amount,
            from.key_hash(),
            to
        );
        Ok(tx)
    }

    /// Mine the pending pool into a new block that rewards `miner`.
    ///
    /// On any mining error the chain, the pool and the index are unchanged.
    pub fn mine(&mut self, miner: &KeyHash, cancel: &CancelToken, timeout: Option<Duration>) -> Result<Block> {
        let height = self.height()?;
        let prev_hash = self.tip()?.unwrap_or_else(Hash256::zero);

        let supply = self
            .utxo
            .total_value()
            .and_then(|total| total.checked_add(self.config.reward));
        if supply.is_none() {
            return Err(ChainError::SupplyOverflow { height }.into());
        }

        let mut transactions = Vec::with_capacity(1 + self.pool.len());
        transactions.push(Transaction::reward(*miner, self.config.reward, height));
        transactions.extend(self.pool.iter().cloned());
        let mut block = Block::new(BlockHeader::now(prev_hash), transactions);

        let mut pow = Miner::new(self.config.difficulty);
        if let Some(timeout) = timeout {
            pow = pow.with_timeout(timeout);
        }
        log::info!(
            "Mining block {} with {} transactions at difficulty {}",
            height,
            block.transactions.len(),
            self.config.difficulty
        );
        let result = pow.mine(&mut block, cancel)?;

        // Pending transfers are already in the index; only the reward is new
        let mut utxo = self.utxo.clone();
        let delta = utxo.apply_transaction(&block.transactions[0]);
        self.db.append_block(&block, height, &utxo, &delta)?;
        self.utxo = utxo;
        self.pool.clear();

        log::info!(
            "Mined block {} at height {} ({} attempts, {:.1} KH/s)",
            block.hash(),
            height,
            result.attempts,
            result.hash_rate() / 1000.0
        );
        Ok(block)
    }

    /// Replay the whole chain and report whether it is intact.
    ///
    /// Integrity failures are logged and yield `Ok(false)`; storage failures
    /// propagate.
    pub fn verify(&mut self) -> Result<bool> {
        let valid = match self.check_integrity()? {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Chain verification failed: {}", e);
                false
            }
        };
        self.valid = Some(valid);
        log::info!("Chain verification finished: {}", if valid { "valid" } else { "invalid" });
        Ok(valid)
    }

    fn check_integrity(&self) -> Result<std::result::Result<(), ChainError>> {
        let mut verifier = ChainVerifier::new(&self.config);

        for block in self.db.blocks()? {
            let block = match block {
                Ok(block) => block,
                Err(LedgerError::Decode(e)) => {
                    return Ok(Err(ChainError::CorruptBlock {
                        height: verifier.height(),
                        reason: e.to_string(),
                    }));
                }
                Err(LedgerError::Chain(e)) => return Ok(Err(e)),
                Err(e) => return Err(e),
            };
            if let Err(e) = verifier.push(&block) {
                return Ok(Err(e));
            }
        }

        let mut replayed = match verifier.finish(self.tip()?) {
            Ok(utxo) => utxo,
            Err(e) => return Ok(Err(e)),
        };
        if let Err(e) = ChainVerifier::check_pending(&mut replayed, &self.pool) {
            return Ok(Err(e));
        }
        if replayed != self.utxo {
            return Ok(Err(ChainError::IndexMismatch));
        }
        Ok(Ok(()))
    }

    /// Full rebuild of the index: every block in order, then the pool
    pub fn rebuild_utxo(&self) -> Result<UtxoSet> {
        let blocks = self.blocks()?;
        let mut utxo = UtxoSet::index(&blocks);
        for tx in &self.pool {
            utxo.apply_transaction(tx);
        }
        Ok(utxo)
    }

    /// Rebuild the index from the chain and replace the stored one
    pub fn reindex(&mut self) -> Result<()> {
        let utxo = self.rebuild_utxo()?;
        self.db.replace_utxo_set(&utxo)?;
        log::info!(
            "Reindexed {} unspent outputs across {} transactions",
            utxo.output_count(),
            utxo.len()
        );
        self.utxo = utxo;
        Ok(())
    }

    /// Every block, lowest height first
    pub fn blocks(&self) -> Result<Vec<Block>> {
        self.db.blocks()?.collect()
    }

    /// Look a transaction up by hash, in the pool first and then in the chain
    pub fn find_transaction(&self, hash: &Hash256) -> Result<Option<(Transaction, TxLocation)>> {
        if let Some(tx) = self.pool.iter().find(|tx| tx.hash() == *hash) {
            return Ok(Some((tx.clone(), TxLocation::Pending)));
        }

        for (height, block) in self.db.blocks()?.enumerate() {
            let block = block?;
            if let Some(tx) = block.transactions.iter().find(|tx| tx.hash() == *hash) {
                let location = TxLocation::Block {
                    height: height as u64,
                    hash: block.hash(),
                };
                return Ok(Some((tx.clone(), location)));
            }
        }
        Ok(None)
    }

    /// Pretty JSON view of the parameters, every block and the pool
    pub fn to_json(&self) -> Result<String> {
        let blocks = self.blocks()?;
        let view = ChainView {
            config: &self.config,
            height: blocks.len() as u64,
            tip: self.tip()?,
            valid: self.valid,
            blocks: blocks
                .iter()
                .enumerate()
                .map(|(height, block)| BlockView {
                    height: height as u64,
                    header: &block.header,
                    transactions: tx_views(&block.transactions),
                })
                .collect(),
            pending: tx_views(&self.pool),
        };
        Ok(serde_json::to_string_pretty(&view)?)
    }
}

/// Thread-safe handle: every operation runs under one writer lock, so
/// "select, build, verify, pool, index" and "reward, mine, append, index"
/// are never interleaved.
pub struct Ledger {
    chain: Mutex<Blockchain>,
}

impl Ledger {
    pub fn new(chain: Blockchain) -> Self {
        Self {
            chain: Mutex::new(chain),
        }
    }

    pub fn open<P: AsRef<Path>>(path: P, config: LedgerConfig) -> Result<Self> {
        Ok(Self::new(Blockchain::open(path, config)?))
    }

    pub fn memory(config: LedgerConfig) -> Result<Self> {
        Ok(Self::new(Blockchain::memory(config)?))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Blockchain>> {
        self.chain.lock().map_err(|_| LedgerError::LockPoisoned)
    }

    pub fn send(&self, from: &Wallet, to: &KeyHash, amount: u64) -> Result<Transaction> {
        self.lock()?.send(from, to, amount)
    }

    pub fn mine(&self, miner: &KeyHash, cancel: &CancelToken, timeout: Option<Duration>) -> Result<Block> {
        self.lock()?.mine(miner, cancel, timeout)
    }

    pub fn verify(&self) -> Result<bool> {
        self.lock()?.verify()
    }

    pub fn reindex(&self) -> Result<()> {
        self.lock()?.reindex()
    }

    pub fn balance(&self, owner: &KeyHash) -> Result<u64> {
        self.lock()?.balance(owner)
    }

    pub fn find_transaction(&self, hash: &Hash256) -> Result<Option<(Transaction, TxLocation)>> {
        self.lock()?.find_transaction(hash)
    }

    pub fn to_json(&self) -> Result<String> {
        self.lock()?.to_json()
    }

    /// Run `f` with shared access to the chain
    pub fn read<R>(&self, f: impl FnOnce(&Blockchain) -> R) -> Result<R> {
        Ok(f(&*self.lock()?))
    }
}
