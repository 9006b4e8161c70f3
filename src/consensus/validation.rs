// Transaction and chain validation

use crate::config::LedgerConfig;
use crate::consensus::pow::Miner;
use crate::core::{Block, Hash256, Transaction};
use crate::storage::UtxoSet;
use crate::wallet::{owner_key_hash_from_bytes, verify_signature};
use std::collections::BTreeSet;
use thiserror::Error;

/// Why a transfer transaction was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("transaction has no inputs")]
    NoInputs,

    #[error("transaction has no outputs")]
    NoOutputs,

    #[error("input {input} spends {prev_tx_hash}:{prev_index}, which is not unspent")]
    MissingOutput {
        input: usize,
        prev_tx_hash: Hash256,
        prev_index: u64,
    },

    #[error("input {input} spends an output already spent by an earlier input")]
    DuplicateInput { input: usize },

    /// The embedded public key does not hash to the referenced output's owner
    #[error("input {input} public key does not own the referenced output")]
    OwnerMismatch { input: usize },

    #[error("input {input} signature does not verify")]
    InvalidSignature { input: usize },

    #[error("outputs total {outputs} exceeds inputs total {inputs}")]
    OutputsExceedInputs { inputs: u64, outputs: u64 },

    #[error("value total overflows")]
    ValueOverflow,

    #[error("reward transaction outside a block")]
    UnexpectedReward,
}

/// The first integrity check a stored chain failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("block {height}: stored hash {stored} does not match computed {computed}")]
    HashMismatch {
        height: u64,
        stored: Hash256,
        computed: Hash256,
    },

    #[error("block {height}: hash does not meet difficulty {difficulty}")]
    InsufficientWork { height: u64, difficulty: u32 },

    #[error("block {height}: previous hash {found} does not link to {expected}")]
    BrokenLink {
        height: u64,
        expected: Hash256,
        found: Hash256,
    },

    #[error("block {height}: no transactions")]
    NoTransactions { height: u64 },

    #[error("block {height}: first transaction is not a reward")]
    MissingReward { height: u64 },

    #[error("block {height}: extra reward transaction at position {position}")]
    MisplacedReward { height: u64, position: usize },

    #[error("block {height}: reward mints {found}, expected {expected}")]
    WrongReward { height: u64, expected: u64, found: u64 },

    #[error("block {height}: reward pushes the total supply past the value range")]
    SupplyOverflow { height: u64 },

    #[error("block {height}: transaction {position} invalid: {source}")]
    InvalidTransaction {
        height: u64,
        position: usize,
        source: TxError,
    },

    #[error("block {height} is missing")]
    MissingBlock { height: u64 },

    #[error("block {height} cannot be decoded: {reason}")]
    CorruptBlock { height: u64, reason: String },

    #[error("pending transaction {position} invalid: {source}")]
    InvalidPending { position: usize, source: TxError },

    #[error("unspent-output index does not match the replayed chain")]
    IndexMismatch,

    #[error("tip {tip} does not name the last block {last}")]
    TipMismatch { tip: Hash256, last: Hash256 },
}

/// Transfer validator: ownership proofs and value conservation against an index
pub struct TransactionValidator;

impl TransactionValidator {
    /// Whether `tx` may be applied on top of `utxo`
    pub fn verify(tx: &Transaction, utxo: &UtxoSet) -> bool {
        Self::check(tx, utxo).is_ok()
    }

    /// Validate `tx` against `utxo`, reporting the first failed rule.
    ///
    /// Reward transactions are trivially valid. For a transfer, every input
    /// must reference an unspent output exactly once, carry a public key whose
    /// owner hash matches that output, and carry a signature over the trimmed
    /// digest. Outputs may not total more than the inputs.
    pub fn check(tx: &Transaction, utxo: &UtxoSet) -> Result<(), TxError> {
        if tx.is_coinbase() {
            return Ok(());
        }
        if tx.inputs.is_empty() {
            return Err(TxError::NoInputs);
        }
        if tx.outputs.is_empty() {
            return Err(TxError::NoOutputs);
        }

        let digest = tx.trimmed_digest();
        let mut spent = BTreeSet::new();
        let mut input_total = 0u64;

        for (i, input) in tx.inputs.iter().enumerate() {
            if !spent.insert((input.prev_tx_hash, input.prev_index)) {
                return Err(TxError::DuplicateInput { input: i });
            }

            let referenced = utxo
                .find_output(&input.prev_tx_hash, input.prev_index)
                .ok_or(TxError::MissingOutput {
                    input: i,
                    prev_tx_hash: input.prev_tx_hash,
                    prev_index: input.prev_index,
                })?;

            if owner_key_hash_from_bytes(&input.public_key) != Some(referenced.owner_key_hash) {
                return Err(TxError::OwnerMismatch { input: i });
            }
            if !verify_signature(&input.public_key, &digest, &input.signature) {
                return Err(TxError::InvalidSignature { input: i });
            }

            input_total = input_total
                .checked_add(referenced.value)
                .ok_or(TxError::ValueOverflow)?;
        }

        let output_total = tx.total_output_value().ok_or(TxError::ValueOverflow)?;
        if output_total > input_total {
            return Err(TxError::OutputsExceedInputs {
                inputs: input_total,
                outputs: output_total,
            });
        }

        Ok(())
    }
}

/// Replays a chain block by block, re-deriving every hash and re-checking
/// every transaction against the index rebuilt so far.
///
/// Feed blocks in height order with [`ChainVerifier::push`], then call
/// [`ChainVerifier::finish`] with the stored tip.
pub struct ChainVerifier {
    miner: Miner,
    reward: u64,
    height: u64,
    prev_hash: Hash256,
    supply: u64,
    utxo: UtxoSet,
}

impl ChainVerifier {
    pub fn new(config: &LedgerConfig) -> Self {
        Self {
            miner: Miner::new(config.difficulty),
            reward: config.reward,
            height: 0,
            prev_hash: Hash256::zero(),
            supply: 0,
            utxo: UtxoSet::new(),
        }
    }

    /// Check the next block and fold it into the replayed index
    pub fn push(&mut self, block: &Block) -> Result<(), ChainError> {
        let height = self.height;

        let computed = block.compute_hash();
        if computed != block.header.hash {
            return Err(ChainError::HashMismatch {
                height,
                stored: block.header.hash,
                computed,
            });
        }
        if !self.miner.target.is_valid_hash(&computed) {
            return Err(ChainError::InsufficientWork {
                height,
                difficulty: self.miner.target.difficulty(),
            });
        }
        if block.header.prev_hash != self.prev_hash {
            return Err(ChainError::BrokenLink {
                height,
                expected: self.prev_hash,
                found: block.header.prev_hash,
            });
        }

        self.check_transactions(block)?;

        self.prev_hash = computed;
        self.height += 1;
        Ok(())
    }

    fn check_transactions(&mut self, block: &Block) -> Result<(), ChainError> {
        let height = self.height;
        let Some((reward, transfers)) = block.transactions.split_first() else {
            return Err(ChainError::NoTransactions { height });
        };

        if !reward.is_coinbase() {
            return Err(ChainError::MissingReward { height });
        }
        let minted = reward.total_output_value().unwrap_or(u64::MAX);
        if reward.outputs.len() != 1 || minted != self.reward {
            return Err(ChainError::WrongReward {
                height,
                expected: self.reward,
                found: minted,
            });
        }
        self.supply = self
            .supply
            .checked_add(minted)
            .ok_or(ChainError::SupplyOverflow { height })?;
        self.utxo.apply_transaction(reward);

        for (offset, tx) in transfers.iter().enumerate() {
            let position = offset + 1;
            if tx.is_coinbase() {
                return Err(ChainError::MisplacedReward { height, position });
            }
            TransactionValidator::check(tx, &self.utxo).map_err(|source| {
                ChainError::InvalidTransaction {
                    height,
                    position,
                    source,
                }
            })?;
            self.utxo.apply_transaction(tx);
        }

        Ok(())
    }

    /// Number of blocks accepted so far
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Confirm the stored tip names the last accepted block, and hand back
    /// the index replayed from the chain
    pub fn finish(self, tip: Option<Hash256>) -> Result<UtxoSet, ChainError> {
        let tip = tip.unwrap_or_else(Hash256::zero);
        if tip != self.prev_hash {
            return Err(ChainError::TipMismatch {
                tip,
                last: self.prev_hash,
            });
        }
        Ok(self.utxo)
    }

    /// Re-check pending transactions, in arrival order, on top of the index
    /// replayed from the chain
    pub fn check_pending(utxo: &mut UtxoSet, pool: &[Transaction]) -> Result<(), ChainError> {
        for (position, tx) in pool.iter().enumerate() {
            if tx.is_coinbase() {
                return Err(ChainError::InvalidPending {
                    position,
                    source: TxError::UnexpectedReward,
                });
            }
            TransactionValidator::check(tx, utxo)
                .map_err(|source| ChainError::InvalidPending { position, source })?;
            utxo.apply_transaction(tx);
        }
        Ok(())
    }

    /// Verify a complete in-memory chain whose tip is its last block
    pub fn verify_blocks<'a, I>(config: &LedgerConfig, blocks: I) -> Result<UtxoSet, ChainError>
    where
        I: IntoIterator<Item = &'a Block>,
    {
        let mut verifier = Self::new(config);
        let mut tip = None;
        for block in blocks {
            verifier.push(block)?;
            tip = Some(block.header.hash);
        }
        verifier.finish(tip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::pow;
    use crate::core::{BlockHeader, KeyHash, TxInput, TxOutput};
    use crate::wallet::{build_transfer, Wallet};

    const REWARD: u64 = 10;

    fn config() -> LedgerConfig {
        LedgerConfig::new(8, REWARD).unwrap()
    }

    fn mine_block(prev: Hash256, height: u64, miner: KeyHash, transfers: Vec<Transaction>) -> Block {
        let mut transactions = vec![Transaction::reward(miner, REWARD, height)];
        transactions.extend(transfers);
        let candidate = Block::new(BlockHeader::new(1_700_000_000 + height, prev), transactions);
        pow::mine(candidate, 8).unwrap()
    }

    /// Index holding one reward output for `wallet`, plus that reward
    fn funded(wallet: &Wallet) -> (UtxoSet, Transaction) {
        let reward = Transaction::reward(wallet.key_hash(), REWARD, 0);
        let mut utxo = UtxoSet::new();
        utxo.apply_transaction(&reward);
        (utxo, reward)
    }

    fn sign_all(tx: &mut Transaction, wallet: &Wallet) {
        let digest = tx.trimmed_digest();
        for input in &mut tx.inputs {
            input.signature = wallet.sign(&digest);
            input.public_key = wallet.public_key_bytes();
        }
    }

    #[test]
    fn test_transfer_verifies() {
        let alice = Wallet::generate().unwrap();
        let bob = Wallet::generate().unwrap();
        let (utxo, _) = funded(&alice);

        let tx = build_transfer(&alice, &bob.key_hash(), 4, &utxo).unwrap();
        assert!(TransactionValidator::verify(&tx, &utxo));
    }

    #[test]
    fn test_reward_is_trivially_valid() {
        let reward = Transaction::reward(KeyHash::new([1; 20]), REWARD, 3);
        assert!(TransactionValidator::verify(&reward, &UtxoSet::new()));
    }

    #[test]
    fn test_mutated_output_fails() {
        let alice = Wallet::generate().unwrap();
        let bob = Wallet::generate().unwrap();
        let (utxo, _) = funded(&alice);

        let mut tx = build_transfer(&alice, &bob.key_hash(), 4, &utxo).unwrap();
        tx.outputs[0].value = 3;

        assert_eq!(
            TransactionValidator::check(&tx, &utxo),
            Err(TxError::InvalidSignature { input: 0 })
        );
    }

    #[test]
    fn test_foreign_key_fails_despite_valid_signature() {
        let alice = Wallet::generate().unwrap();
        let mallory = Wallet::generate().unwrap();
        let (utxo, reward) = funded(&alice);

        let mut tx = Transaction::new(
            vec![TxInput::new(reward.hash(), 0)],
            vec![TxOutput::new(REWARD, mallory.key_hash())],
        );
        sign_all(&mut tx, &mallory);

        let digest = tx.trimmed_digest();
        assert!(verify_signature(
            &tx.inputs[0].public_key,
            &digest,
            &tx.inputs[0].signature
        ));
        assert_eq!(
            TransactionValidator::check(&tx, &utxo),
            Err(TxError::OwnerMismatch { input: 0 })
        );
    }

    #[test]
    fn test_rejects_missing_and_duplicate_inputs() {
        let alice = Wallet::generate().unwrap();
        let (utxo, reward) = funded(&alice);

        let mut missing = Transaction::new(
            vec![TxInput::new(reward.hash(), 1)],
            vec![TxOutput::new(1, alice.key_hash())],
        );
        sign_all(&mut missing, &alice);
        assert!(matches!(
            TransactionValidator::check(&missing, &utxo),
            Err(TxError::MissingOutput { input: 0, prev_index: 1, .. })
        ));

        let mut duplicate = Transaction::new(
            vec![TxInput::new(reward.hash(), 0), TxInput::new(reward.hash(), 0)],
            vec![TxOutput::new(20, alice.key_hash())],
        );
        sign_all(&mut duplicate, &alice);
        assert_eq!(
            TransactionValidator::check(&duplicate, &utxo),
            Err(TxError::DuplicateInput { input: 1 })
        );
    }

    #[test]
    fn test_rejects_inflation() {
        let alice = Wallet::generate().unwrap();
        let (utxo, reward) = funded(&alice);

        let mut tx = Transaction::new(
            vec![TxInput::new(reward.hash(), 0)],
            vec![TxOutput::new(REWARD + 1, alice.key_hash())],
        );
        sign_all(&mut tx, &alice);

        assert_eq!(
            TransactionValidator::check(&tx, &utxo),
            Err(TxError::OutputsExceedInputs {
                inputs: REWARD,
                outputs: REWARD + 1
            })
        );
    }

    #[test]
    fn test_rejects_empty_sides() {
        let utxo = UtxoSet::new();
        let no_inputs = Transaction::new(vec![], vec![TxOutput::new(1, KeyHash::new([1; 20]))]);
        assert_eq!(TransactionValidator::check(&no_inputs, &utxo), Err(TxError::NoInputs));

        let no_outputs = Transaction::new(vec![TxInput::new(Hash256::new([1; 32]), 0)], vec![]);
        assert_eq!(TransactionValidator::check(&no_outputs, &utxo), Err(TxError::NoOutputs));
    }

    fn sample_chain() -> (Vec<Block>, Wallet, Wallet) {
        let alice = Wallet::generate().unwrap();
        let bob = Wallet::generate().unwrap();

        let first = mine_block(Hash256::zero(), 0, alice.key_hash(), vec![]);
        let utxo = UtxoSet::index([&first]);
        let transfer = build_transfer(&alice, &bob.key_hash(), 4, &utxo).unwrap();
        let second = mine_block(first.header.hash, 1, alice.key_hash(), vec![transfer]);

        (vec![first, second], alice, bob)
    }

    #[test]
    fn test_mined_chain_verifies() {
        let (blocks, alice, bob) = sample_chain();
        let utxo = ChainVerifier::verify_blocks(&config(), &blocks).unwrap();

        assert_eq!(utxo.balance_of(&alice.key_hash()), Some(16));
        assert_eq!(utxo.balance_of(&bob.key_hash()), Some(4));
        assert_eq!(utxo, UtxoSet::index(&blocks));
    }

    #[test]
    fn test_empty_chain_verifies() {
        assert!(ChainVerifier::verify_blocks(&config(), &[]).unwrap().is_empty());
    }

    #[test]
    fn test_tampered_transaction_detected() {
        let (mut blocks, _, _) = sample_chain();
        blocks[1].transactions[1].outputs[0].value = 9;

        assert!(matches!(
            ChainVerifier::verify_blocks(&config(), &blocks),
            Err(ChainError::HashMismatch { height: 1, .. })
        ));
    }

    #[test]
    fn test_remined_forgery_detected_by_signature() {
        let (mut blocks, _, _) = sample_chain();
        let mut forged = blocks[1].clone();
        forged.transactions[1].outputs[0].value = 9;
        forged.header.hash = Hash256::zero();
        blocks[1] = pow::mine(forged, 8).unwrap();

        assert!(matches!(
            ChainVerifier::verify_blocks(&config(), &blocks),
            Err(ChainError::InvalidTransaction {
                height: 1,
                position: 1,
                source: TxError::InvalidSignature { input: 0 },
            })
        ));
    }

    #[test]
    fn test_broken_link_detected() {
        let miner = KeyHash::new([7; 20]);
        let first = mine_block(Hash256::zero(), 0, miner, vec![]);
        let orphan = mine_block(Hash256::new([9; 32]), 1, miner, vec![]);

        assert!(matches!(
            ChainVerifier::verify_blocks(&config(), &[first, orphan]),
            Err(ChainError::BrokenLink { height: 1, .. })
        ));
    }

    #[test]
    fn test_first_block_must_link_to_zero() {
        let block = mine_block(Hash256::new([1; 32]), 0, KeyHash::new([7; 20]), vec![]);
        assert!(matches!(
            ChainVerifier::verify_blocks(&config(), &[block]),
            Err(ChainError::BrokenLink { height: 0, .. })
        ));
    }

    #[test]
    fn test_wrong_reward_detected() {
        let miner = KeyHash::new([7; 20]);
        let candidate = Block::new(
            BlockHeader::new(1_700_000_000, Hash256::zero()),
            vec![Transaction::reward(miner, REWARD * 2, 0)],
        );
        let block = pow::mine(candidate, 8).unwrap();

        assert!(matches!(
            ChainVerifier::verify_blocks(&config(), &[block]),
            Err(ChainError::WrongReward { found: 20, .. })
        ));
    }

    #[test]
    fn test_supply_overflow_detected() {
        let miner = KeyHash::new([7; 20]);
        let oversized = LedgerConfig {
            difficulty: 8,
            reward: u64::MAX,
        };
        let mint = |prev: Hash256, height: u64| {
            let candidate = Block::new(
                BlockHeader::new(1_700_000_000 + height, prev),
                vec![Transaction::reward(miner, u64::MAX, height)],
            );
            pow::mine(candidate, 8).unwrap()
        };
        let first = mint(Hash256::zero(), 0);
        let second = mint(first.hash(), 1);

        assert!(ChainVerifier::verify_blocks(&oversized, &[first.clone()]).is_ok());
        assert!(matches!(
            ChainVerifier::verify_blocks(&oversized, &[first, second]),
            Err(ChainError::SupplyOverflow { height: 1 })
        ));
    }

    #[test]
    fn test_insufficient_work_detected() {
        let miner = KeyHash::new([7; 20]);
        let block = mine_block(Hash256::zero(), 0, miner, vec![]);
        let strict = LedgerConfig::new(200, REWARD).unwrap();

        assert!(matches!(
            ChainVerifier::verify_blocks(&strict, &[block]),
            Err(ChainError::InsufficientWork { height: 0, difficulty: 200 })
        ));
    }

    #[test]
    fn test_check_pending() {
        let (blocks, alice, bob) = sample_chain();
        let mut utxo = ChainVerifier::verify_blocks(&config(), &blocks).unwrap();

        let first = build_transfer(&alice, &bob.key_hash(), 3, &utxo).unwrap();
        let mut applied = utxo.clone();
        applied.apply_transaction(&first);
        let second = build_transfer(&bob, &alice.key_hash(), 7, &applied).unwrap();

        // The second transfer spends an output the first one created
        let pool = vec![first.clone(), second];
        assert!(ChainVerifier::check_pending(&mut utxo.clone(), &pool).is_ok());

        let reversed = vec![pool[1].clone(), first];
        assert!(matches!(
            ChainVerifier::check_pending(&mut utxo, &reversed),
            Err(ChainError::InvalidPending { position: 0, .. })
        ));

        let reward = vec![Transaction::reward(alice.key_hash(), REWARD, 9)];
        assert_eq!(
            ChainVerifier::check_pending(&mut UtxoSet::new(), &reward),
            Err(ChainError::InvalidPending {
                position: 0,
                source: TxError::UnexpectedReward
            })
        );
    }

    #[test]
    fn test_tip_mismatch_detected() {
        let (blocks, _, _) = sample_chain();
        let mut verifier = ChainVerifier::new(&config());
        for block in &blocks {
            verifier.push(block).unwrap();
        }
        assert_eq!(verifier.height(), 2);

        assert!(matches!(
            verifier.finish(Some(blocks[0].header.hash)),
            Err(ChainError::TipMismatch { .. })
        ));
    }
}
