// Storage layer: persisted chain and the unspent-output index

mod blockchain_db;
mod utxo_set;

pub use blockchain_db::BlockchainDB;
pub use utxo_set::{Selection, UnspentOutput, UtxoDelta, UtxoSet};
