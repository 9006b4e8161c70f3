// Single-node UTXO ledger with proof-of-work

pub mod cli;
pub mod config;
pub mod consensus;
pub mod core;
pub mod error;
pub mod ledger;
pub mod storage;
pub mod wallet;

// Re-exports for convenience
pub use crate::cli::{Cli, CliHandler, Commands, WalletCommands};
pub use crate::config::LedgerConfig;
pub use crate::consensus::{CancelToken, ChainError, ChainVerifier, Miner, MiningError, TxError};
pub use crate::core::{Block, BlockHeader, Hash256, KeyHash, Transaction, TxInput, TxOutput};
pub use crate::error::{LedgerError, Result};
pub use crate::ledger::{Blockchain, Ledger, TxLocation};
pub use crate::storage::{BlockchainDB, UtxoSet};
pub use crate::wallet::{build_transfer, Address, Keystore, Wallet};
