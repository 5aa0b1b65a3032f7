// Chain parameters and node configuration

use crate::core::Block;
use crate::error::ChainError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Consensus parameters. Every node on a network must agree on these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainParams {
    pub genesis_timestamp: u64,
    pub initial_difficulty: u32,
    pub min_difficulty: u32,
    pub max_difficulty: u32,
    pub target_block_time_secs: u64,
    /// Number of most recent block timestamps the retarget looks at
    pub retarget_window: usize,
    /// Coinbase reward at height 1, in base units
    pub initial_reward: u64,
    pub halving_interval: u64,
    /// Hard cap on transactions in an accepted block
    pub max_block_transactions: usize,
    /// Mempool transactions offered per work template
    pub template_max_transactions: usize,
    /// How many recent blocks can be reverted from the UTXO set
    pub undo_depth: usize,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            genesis_timestamp: 1_700_000_000,
            initial_difficulty: 1,
            min_difficulty: 1,
            max_difficulty: 255,
            target_block_time_secs: 60,
            retarget_window: 10,
            initial_reward: 50 * 100_000_000,
            halving_interval: 210_000,
            max_block_transactions: 1_000,
            template_max_transactions: 10,
            undo_depth: 100,
        }
    }
}

impl ChainParams {
    /// Coinbase reward for a block at `height`
    pub fn block_reward(&self, height: u64) -> u64 {
        if height == 0 {
            return 0;
        }
        if self.halving_interval == 0 {
            return self.initial_reward;
        }
        let halvings = height / self.halving_interval;
        if halvings >= 64 {
            0
        } else {
            self.initial_reward >> halvings
        }
    }

    pub fn genesis_block(&self) -> Block {
        Block::genesis(self.genesis_timestamp, self.initial_difficulty)
    }

    pub fn validate(&self) -> Result<(), ChainError> {
        if self.min_difficulty == 0 || self.min_difficulty > self.max_difficulty {
            return Err(ChainError::Config(format!(
                "difficulty bounds {}..={} are invalid",
                self.min_difficulty, self.max_difficulty
            )));
        }
        if self.max_difficulty > 255 {
            return Err(ChainError::Config("max_difficulty cannot exceed 255".to_string()));
        }
        if !(self.min_difficulty..=self.max_difficulty).contains(&self.initial_difficulty) {
            return Err(ChainError::Config("initial_difficulty outside bounds".to_string()));
        }
        if self.retarget_window < 2 {
            return Err(ChainError::Config("retarget_window must be at least 2".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    pub max_entries: usize,
    /// Entries older than this are evicted by housekeeping
    pub max_age_secs: u64,
    pub eviction_interval_secs: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_age_secs: 300,
            eviction_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    pub threads: usize,
    /// Caller-side pacing: hold a found block until this many seconds have
    /// passed since the tip. Not a consensus rule.
    pub min_block_interval_secs: u64,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            threads: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            min_block_interval_secs: 0,
        }
    }
}

/// Node configuration, loaded from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub data_dir: PathBuf,
    pub chain: ChainParams,
    pub mempool: MempoolConfig,
    pub mining: MiningConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            chain: ChainParams::default(),
            mempool: MempoolConfig::default(),
            mining: MiningConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ChainError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ChainError::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ChainError> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| ChainError::Config(format!("invalid config: {}", e)))?;
        config.chain.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reward_schedule() {
        let params = ChainParams::default();
        assert_eq!(params.block_reward(0), 0);
        assert_eq!(params.block_reward(1), 5_000_000_000);
        assert_eq!(params.block_reward(209_999), 5_000_000_000);
        assert_eq!(params.block_reward(210_000), 2_500_000_000);
        assert_eq!(params.block_reward(420_000), 1_250_000_000);
        assert_eq!(params.block_reward(210_000 * 64), 0);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = NodeConfig::from_json(
            r#"{ "data_dir": "/tmp/x", "chain": { "target_block_time_secs": 30 } }"#,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/x"));
        assert_eq!(config.chain.target_block_time_secs, 30);
        assert_eq!(config.chain.retarget_window, 10);
        assert_eq!(config.mempool.max_age_secs, 300);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let result = NodeConfig::from_json(r#"{ "chain": { "min_difficulty": 0 } }"#);
        assert!(matches!(result, Err(ChainError::Config(_))));

        let result = NodeConfig::from_json(r#"{ "chain": { "retarget_window": 1 } }"#);
        assert!(matches!(result, Err(ChainError::Config(_))));
    }

    #[test]
    fn test_genesis_from_params() {
        let params = ChainParams::default();
        let genesis = params.genesis_block();
        assert_eq!(genesis.header.timestamp, params.genesis_timestamp);
        assert_eq!(genesis.header.difficulty, params.initial_difficulty);
    }
}
