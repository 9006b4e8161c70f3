// Ledger error taxonomy

use crate::consensus::{ChainError, MiningError, TxError};
use crate::core::DecodeError;
use thiserror::Error;

/// Every failure the ledger can report to its caller.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The sender's indexed outputs do not cover the requested amount
    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("invalid amount: transfers must move a positive value")]
    InvalidAmount,

    /// A transaction was rejected before entering the pool
    #[error("invalid transaction: {0}")]
    InvalidTransaction(#[from] TxError),

    #[error("chain integrity violated: {0}")]
    Chain(#[from] ChainError),

    #[error("mining aborted: {0}")]
    Mining(#[from] MiningError),

    #[error("storage failure: {0}")]
    Persistence(#[from] sled::Error),

    #[error("corrupt record: {0}")]
    Decode(#[from] DecodeError),

    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("random source unavailable: {0}")]
    Entropy(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("unknown wallet: {0}")]
    UnknownWallet(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("keystore error: {0}")]
    Keystore(String),

    #[error("ledger lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, LedgerError>;
