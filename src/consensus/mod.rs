// Consensus: proof of work and validation

pub mod pow;
pub mod validation;

pub use pow::{mine, CancelToken, Miner, MiningError, MiningResult, Target};
pub use validation::{ChainError, ChainVerifier, TransactionValidator, TxError};
