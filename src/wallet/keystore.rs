// Wallet address book

use crate::error::{LedgerError, Result};
use crate::wallet::{Address, Wallet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// On-disk form of the keystore: address -> hex secret key
#[derive(Serialize, Deserialize, Default)]
struct StoredKeystore {
    wallets: BTreeMap<Address, String>,
}

/// Keystore - named collection of wallets, keyed by address
#[derive(Debug, Default)]
pub struct Keystore {
    wallets: BTreeMap<Address, Wallet>,
}

impl Keystore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a new wallet and remember it
    pub fn create(&mut self) -> Result<Address> {
        let wallet = Wallet::generate()?;
        let address = wallet.address();
        self.wallets.insert(address.clone(), wallet);
        Ok(address)
    }

    pub fn get(&self, address: &Address) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    /// Look up a wallet by address text, failing with `UnknownWallet`
    pub fn wallet(&self, address: &str) -> Result<&Wallet> {
        self.wallets
            .get(&Address::parse(address)?)
            .ok_or_else(|| LedgerError::UnknownWallet(address.to_string()))
    }

    /// Forget a wallet. Returns whether it existed.
    pub fn delete(&mut self, address: &Address) -> bool {
        self.wallets.remove(address).is_some()
    }

    /// All addresses, in sorted order
    pub fn list(&self) -> Vec<Address> {
        self.wallets.keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.wallets.len()
    }

    /// Save keystore to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let stored = StoredKeystore {
            wallets: self
                .wallets
                .iter()
                .map(|(address, wallet)| (address.clone(), hex::encode(wallet.secret_bytes())))
                .collect(),
        };

        let json = serde_json::to_string_pretty(&stored)
            .map_err(|e| LedgerError::Keystore(format!("Failed to serialize keystore: {}", e)))?;

        fs::write(path, json)
            .map_err(|e| LedgerError::Keystore(format!("Failed to write keystore file: {}", e)))
    }

    /// Load keystore from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)
            .map_err(|e| LedgerError::Keystore(format!("Failed to read keystore file: {}", e)))?;

        let stored: StoredKeystore = serde_json::from_str(&json)
            .map_err(|e| LedgerError::Keystore(format!("Failed to parse keystore: {}", e)))?;

        let mut wallets = BTreeMap::new();
        for (address, secret_hex) in stored.wallets {
            let secret = hex::decode(&secret_hex)
                .map_err(|e| LedgerError::Keystore(format!("Invalid secret for {}: {}", address, e)))?;
            let wallet = Wallet::from_secret_bytes(&secret)?;
            if wallet.address() != address {
                return Err(LedgerError::Keystore(format!(
                    "Secret stored under {} belongs to {}",
                    address,
                    wallet.address()
                )));
            }
            wallets.insert(address, wallet);
        }

        Ok(Self { wallets })
    }

    /// Load the keystore at `path`, or start an empty one if it does not exist
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            log::info!("Loading keystore from {}", path.as_ref().display());
            Self::load(path)
        } else {
            log::info!("Creating new keystore");
            Ok(Self::new())
        }
    }
}
