// CLI commands

use crate::config::{LedgerConfig, DEFAULT_DIFFICULTY, DEFAULT_REWARD};
use crate::consensus::CancelToken;
use crate::core::{Hash256, KeyHash};
use crate::error::{LedgerError, Result};
use crate::ledger::Ledger;
use crate::wallet::{Address, Keystore};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "utxo-ledger")]
#[command(about = "Single-node UTXO ledger with proof-of-work", long_about = None)]
pub struct Cli {
    /// Directory holding the chain database and the keystore
    #[arg(long, global = true, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Leading zero bits required of block hashes (new chains only)
    #[arg(long, global = true, default_value_t = DEFAULT_DIFFICULTY)]
    pub difficulty: u32,

    /// Value minted by each block (new chains only)
    #[arg(long, global = true, default_value_t = DEFAULT_REWARD)]
    pub reward: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Wallet commands
    #[command(subcommand)]
    Wallet(WalletCommands),

    /// Send value from a wallet in the keystore to an address
    Send {
        /// Sender address (must be in the keystore)
        from: String,
        /// Recipient address
        to: String,
        amount: u64,
    },

    /// Mine the pending transactions into a new block
    Mine {
        /// Address receiving the block reward
        miner: String,
        /// Give up after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Print the whole chain as JSON
    Print,

    /// Replay the chain and check its integrity
    Verify,

    /// Rebuild the unspent-output index from the chain
    Reindex,

    /// Look up a transaction by hash
    Tx {
        /// Transaction hash (hex)
        hash: String,
    },
}

#[derive(Subcommand)]
pub enum WalletCommands {
    /// Create a new wallet
    Create,

    /// List all wallet addresses
    List,

    /// Remove a wallet from the keystore
    Delete { address: String },

    /// Get balance for an address
    Balance { address: String },
}

/// CLI handler
pub struct CliHandler {
    ledger: Ledger,
    keystore: Keystore,
    keystore_path: PathBuf,
    cancel: CancelToken,
}

impl CliHandler {
    /// Open the ledger and keystore under the configured data directory.
    /// `cancel` aborts a running `mine`.
    pub fn new(cli: &Cli, cancel: CancelToken) -> Result<Self> {
        let config = LedgerConfig::new(cli.difficulty, cli.reward)?;
        std::fs::create_dir_all(&cli.data_dir).map_err(|e| {
            LedgerError::Config(format!("Cannot create {}: {}", cli.data_dir.display(), e))
        })?;
        let ledger = Ledger::open(cli.data_dir.join("chain"), config)?;

        let keystore_path = cli.data_dir.join("keystore.json");
        let keystore = Keystore::open(&keystore_path)?;

        Ok(Self {
            ledger,
            keystore,
            keystore_path,
            cancel,
        })
    }

    /// Save keystore to disk
    fn save_keystore(&self) -> Result<()> {
        self.keystore.save(&self.keystore_path)
    }

    /// Handle CLI command
    pub fn handle(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Wallet(cmd) => self.handle_wallet(cmd),
            Commands::Send { from, to, amount } => self.send(&from, &to, amount),
            Commands::Mine {
                miner,
                timeout_secs,
            } => self.mine(&miner, timeout_secs.map(Duration::from_secs)),
            Commands::Print => {
                println!("{}", self.ledger.to_json()?);
                Ok(())
            }
            Commands::Verify => self.verify(),
            Commands::Reindex => {
                self.ledger.reindex()?;
                println!("✓ Unspent-output index rebuilt");
                Ok(())
            }
            Commands::Tx { hash } => self.show_transaction(&hash),
        }
    }

    /// Handle wallet commands
    fn handle_wallet(&mut self, cmd: WalletCommands) -> Result<()> {
        match cmd {
            WalletCommands::Create => {
                let address = self.keystore.create()?;
                self.save_keystore()?;
                println!("New address: {}", address);
                Ok(())
            }
            WalletCommands::List => {
                let addresses = self.keystore.list();
                println!("Addresses ({}):", addresses.len());
                for address in addresses {
                    println!("  {}", address);
                }
                Ok(())
            }
            WalletCommands::Delete { address } => {
                let address = Address::parse(&address)?;
                if !self.keystore.delete(&address) {
                    return Err(LedgerError::UnknownWallet(address.to_string()));
                }
                self.save_keystore()?;
                println!("✓ Deleted {}", address);
                Ok(())
            }
            WalletCommands::Balance { address } => {
                let key_hash = Self::key_hash(&address)?;
                let balance = self.ledger.balance(&key_hash)?;
                println!("Balance for {}: {}", address, balance);
                Ok(())
            }
        }
    }

    fn send(&self, from: &str, to: &str, amount: u64) -> Result<()> {
        let wallet = self.keystore.wallet(from)?;
        let recipient = Self::key_hash(to)?;

        let tx = self.ledger.send(wallet, &recipient, amount)?;

        println!("✓ Transaction pooled");
        println!("  Hash: {}", tx.hash());
        println!("  Inputs: {}", tx.inputs.len());
        println!("  Outputs: {}", tx.outputs.len());
        Ok(())
    }

    fn mine(&self, miner: &str, timeout: Option<Duration>) -> Result<()> {
        let key_hash = Self::key_hash(miner)?;

        let block = self.ledger.mine(&key_hash, &self.cancel, timeout)?;

        println!("✓ Block mined");
        println!("  Hash: {}", block.hash());
        println!("  Previous: {}", block.header.prev_hash);
        println!("  Nonce: {}", block.header.nonce);
        println!("  Transactions: {}", block.transactions.len());
        Ok(())
    }

    fn verify(&self) -> Result<()> {
        if self.ledger.verify()? {
            println!("✓ Chain is valid");
        } else {
            println!("✗ Chain is INVALID (run with RUST_LOG=warn for details)");
        }
        Ok(())
    }

    fn show_transaction(&self, hash: &str) -> Result<()> {
        let hash = Hash256::from_hex(hash).map_err(LedgerError::InvalidHash)?;
        match self.ledger.find_transaction(&hash)? {
            Some((tx, location)) => {
                println!("Transaction {} in {}", hash, location);
                println!("{}", serde_json::to_string_pretty(&tx)?);
                Ok(())
            }
            None => {
                println!("Transaction not found: {}", hash);
                Ok(())
            }
        }
    }

    fn key_hash(address: &str) -> Result<KeyHash> {
        Address::parse(address)?.to_key_hash()
    }
}
