// Ledger parameters

use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};

/// Leading zero bits a block hash needs when nothing else is configured
pub const DEFAULT_DIFFICULTY: u32 = 16;

/// Value minted by every reward transaction when nothing else is configured
pub const DEFAULT_REWARD: u64 = 10;

/// Largest reward a chain may mint per block
pub const MAX_REWARD: u64 = 21_000_000 * 100_000_000;

/// Chain-wide parameters, fixed when a chain is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Required number of leading zero bits in every block hash
    pub difficulty: u32,
    /// Value of the reward output minted by each mined block
    pub reward: u64,
}

impl LedgerConfig {
    pub fn new(difficulty: u32, reward: u64) -> Result<Self> {
        let config = Self { difficulty, reward };
        config.validate()?;
        Ok(config)
    }

    /// Reject parameters the miner or the verifier cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.difficulty == 0 || self.difficulty > 255 {
            return Err(LedgerError::Config(format!(
                "difficulty must be between 1 and 255 bits, got {}",
                self.difficulty
            )));
        }
        if self.reward == 0 {
            return Err(LedgerError::Config("reward must be positive".to_string()));
        }
        if self.reward > MAX_REWARD {
            return Err(LedgerError::Config(format!(
                "reward must not exceed {}, got {}",
                MAX_REWARD, self.reward
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| LedgerError::Config(e.to_string()))
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        let config: Self =
            serde_json::from_slice(data).map_err(|e| LedgerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            reward: DEFAULT_REWARD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LedgerConfig::default();
        assert_eq!(config.difficulty, 16);
        assert_eq!(config.reward, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_difficulty() {
        assert!(LedgerConfig::new(0, 10).is_err());
        assert!(LedgerConfig::new(256, 10).is_err());
        assert!(LedgerConfig::new(255, 10).is_ok());
    }

    #[test]
    fn test_rejects_zero_reward() {
        assert!(matches!(LedgerConfig::new(8, 0), Err(LedgerError::Config(_))));
    }

    #[test]
    fn test_rejects_reward_above_max() {
        assert!(LedgerConfig::new(8, MAX_REWARD).is_ok());
        assert!(matches!(
            LedgerConfig::new(8, MAX_REWARD + 1),
            Err(LedgerError::Config(_))
        ));
        assert!(LedgerConfig::new(8, u64::MAX).is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = LedgerConfig::new(12, 25).unwrap();
        let json = config.to_json().unwrap();
        assert_eq!(LedgerConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_stored_config_is_validated() {
        let json = br#"{"difficulty":0,"reward":10}"#;
        assert!(LedgerConfig::from_json(json).is_err());
    }
}
