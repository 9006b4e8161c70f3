// Proof of Work implementation

use crate::core::{Block, Hash256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// How many nonces are tried between cancellation and deadline checks
pub const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// Why a mining attempt ended without a block
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MiningError {
    #[error("nonce space exhausted after {attempts} attempts")]
    NonceExhausted { attempts: u64 },

    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u64 },

    #[error("gave up after {elapsed:?} ({attempts} attempts)")]
    TimedOut { attempts: u64, elapsed: Duration },
}

/// Shared flag used to abort a running mining loop from another thread
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Difficulty target: a block hash, read as a big-endian integer, must be
/// strictly below 2^(256 - difficulty)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    difficulty: u32,
}

impl Target {
    pub fn from_difficulty(difficulty: u32) -> Self {
        Self {
            difficulty: difficulty.min(256),
        }
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// The target as 32 big-endian bytes. `None` for difficulty zero,
    /// whose target 2^256 does not fit.
    pub fn to_hash256(&self) -> Option<Hash256> {
        if self.difficulty == 0 {
            return None;
        }
        let bit = (256 - self.difficulty) as usize;
        let mut target = [0u8; 32];
        target[31 - bit / 8] = 1 << (bit % 8);
        Some(Hash256::new(target))
    }

    /// Check if a hash meets this target (hash < target)
    pub fn is_valid_hash(&self, hash: &Hash256) -> bool {
        match self.to_hash256() {
            Some(target) => hash.as_bytes() < target.as_bytes(),
            None => true,
        }
    }
}

/// Proof of Work miner
pub struct Miner {
    pub target: Target,
    /// Cached target bytes for the hot loop
    target_hash: Option<Hash256>,
    timeout: Option<Duration>,
}

impl Miner {
    pub fn new(difficulty: u32) -> Self {
        let target = Target::from_difficulty(difficulty);
        Self {
            target,
            target_hash: target.to_hash256(),
            timeout: None,
        }
    }

    /// Give up with `MiningError::TimedOut` once `timeout` has elapsed
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Search nonces upward from the header's current nonce until the block
    /// hash meets the target. On success the header's nonce and hash are
    /// set; on any error the block is left untouched.
    pub fn mine(&self, block: &mut Block, cancel: &CancelToken) -> Result<MiningResult, MiningError> {
        let start_time = Instant::now();
        let tx_bytes = block.transactions_bytes();
        let mut nonce = block.header.nonce;
        let mut attempts = 0u64;

        loop {
            if attempts % CANCEL_CHECK_INTERVAL == 0 {
                if cancel.is_cancelled() {
                    log::info!("Mining cancelled after {} attempts", attempts);
                    return Err(MiningError::Cancelled { attempts });
                }
                if let Some(timeout) = self.timeout {
                    let elapsed = start_time.elapsed();
                    if elapsed >= timeout {
                        return Err(MiningError::TimedOut { attempts, elapsed });
                    }
                }
            }

            let hash = block.header.digest_with_nonce(nonce, &tx_bytes);
            attempts += 1;

            if self.is_valid_hash_fast(&hash) {
                block.header.nonce = nonce;
                block.header.hash = hash;
                return Ok(MiningResult {
                    nonce,
                    hash,
                    attempts,
                    duration: start_time.elapsed(),
                });
            }

            // Progress indicator every 100k attempts
            if attempts % 100_000 == 0 {
                let elapsed = start_time.elapsed();
                log::debug!(
                    "Mining attempts: {} ({:.1} KH/s)",
                    attempts,
                    attempts as f64 / elapsed.as_secs_f64() / 1000.0
                );
            }

            nonce = nonce
                .checked_add(1)
                .ok_or(MiningError::NonceExhausted { attempts })?;
        }
    }

    #[inline]
    fn is_valid_hash_fast(&self, hash: &Hash256) -> bool {
        match &self.target_hash {
            Some(target) => hash.as_bytes() < target.as_bytes(),
            None => true,
        }
    }
}

/// Mine `block` at `difficulty` without cancellation or time bound
pub fn mine(mut block: Block, difficulty: u32) -> Result<Block, MiningError> {
    Miner::new(difficulty).mine(&mut block, &CancelToken::new())?;
    Ok(block)
}

/// Mining result
#[derive(Debug)]
pub struct MiningResult {
    pub nonce: u64,
    pub hash: Hash256,
    pub attempts: u64,
    pub duration: Duration,
}

impl MiningResult {
    /// Calculate hash rate (hashes per second)
    pub fn hash_rate(&self) -> f64 {
        self.attempts as f64 / self.duration.as_secs_f64()
    }
}
