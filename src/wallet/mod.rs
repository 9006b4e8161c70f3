// Wallets, address book and transaction building

mod keys;
mod keystore;
mod tx_builder;

pub use keys::{
    owner_key_hash, owner_key_hash_from_bytes, sign_digest, verify_signature, Address, Wallet,
    ADDRESS_VERSION,
};
pub use keystore::Keystore;
pub use tx_builder::{build_transfer, sign_transaction};
