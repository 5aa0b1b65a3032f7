// CLI commands

use crate::config::NodeConfig;
use crate::consensus::{CancelToken, ChainPhase, ConsensusEngine};
use crate::core::{Block, KeyPair, Secp256k1Verifier};
use crate::error::{ChainError, Result};
use crate::node::{mine_blocks, Node};
use crate::storage::ChainStore;
use crate::wallet::TransactionBuilder;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

/// Base units per coin, for display only
const UNITS_PER_COIN: f64 = 100_000_000.0;

#[derive(Parser)]
#[command(name = "talant-chain")]
#[command(about = "Single-node proof-of-work ledger", long_about = None)]
pub struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory (overrides the config file)
    #[arg(short, long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new chain with its genesis block
    Init,

    /// Get chain info
    Info,

    /// Get balance for an address
    Balance {
        address: String,
    },

    /// Get block by height
    Block {
        height: u64,
    },

    /// Print a work template as JSON
    Template {
        /// Address credited by the coinbase
        address: String,
    },

    /// Mine blocks paying the given address
    Mine {
        address: String,
        /// Number of blocks to mine
        #[arg(short, long, default_value = "1")]
        blocks: u64,
    },

    /// Generate a key pair and print its address
    Keygen,

    /// Send coins from the key's outputs to an address
    Send {
        /// Sender secret key (hex)
        #[arg(short, long)]
        key: String,
        to: String,
        amount: u64,
        /// Amount left unclaimed by the outputs
        #[arg(short, long, default_value = "0")]
        fee: u64,
        /// Mine one block to this address so the spend confirms
        #[arg(long)]
        mine: Option<String>,
    },

    /// Run the node until ctrl-c
    Run {
        /// Mine to this address while running
        #[arg(long)]
        mine: Option<String>,
    },
}

impl Cli {
    /// Configuration from `--config` (or defaults) with CLI overrides applied
    pub fn node_config(&self) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        Ok(config)
    }
}

/// CLI handler
pub struct CliHandler {
    config: NodeConfig,
    engine: Option<Arc<ConsensusEngine>>,
}

impl CliHandler {
    /// Create a new CLI handler. The chain is opened on first use.
    pub fn new(config: NodeConfig) -> Self {
        Self { config, engine: None }
    }

    /// Open the block store and replay it, writing genesis if it is empty
    fn engine(&mut self) -> Result<Arc<ConsensusEngine>> {
        if let Some(engine) = &self.engine {
            return Ok(engine.clone());
        }
        let path = self.config.data_dir.join("blocks");
        log::info!("Opening chain at {}", path.display());
        let store = ChainStore::new(&path).map_err(ChainError::StorageFailure)?;
        let engine = Arc::new(ConsensusEngine::open(
            self.config.chain.clone(),
            Box::new(store),
            Arc::new(Secp256k1Verifier),
            self.config.mempool.max_entries,
        )?);
        self.engine = Some(engine.clone());
        Ok(engine)
    }

    /// Handle CLI command
    pub fn handle(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Init => self.init(),
            Commands::Info => self.info(),
            Commands::Balance { address } => self.balance(&address),
            Commands::Block { height } => self.block(height),
            Commands::Template { address } => self.template(&address),
            Commands::Mine { address, blocks } => self.mine(&address, blocks),
            Commands::Keygen => {
                Self::keygen();
                Ok(())
            }
            Commands::Send { key, to, amount, fee, mine } => {
                self.send(&key, &to, amount, fee, mine.as_deref())
            }
            Commands::Run { mine } => self.run(mine),
        }
    }

    /// Initialize chain
    fn init(&mut self) -> Result<()> {
        let engine = self.engine()?;
        let genesis = engine.block_at(0)?.ok_or(ChainError::Uninitialized)?;

        println!("✓ Chain ready at {}", self.config.data_dir.display());
        println!("  Genesis: {}", genesis.hash());
        if let Some(tip) = engine.tip() {
            println!("  Height: {}", tip.height);
        }
        Ok(())
    }

    /// Get chain info
    fn info(&mut self) -> Result<()> {
        let engine = self.engine()?;
        let tip = engine.tip().ok_or(ChainError::Uninitialized)?;

        println!("Chain Info:");
        match engine.phase() {
            ChainPhase::Empty => println!("  Phase: empty"),
            ChainPhase::Genesis => println!("  Phase: genesis"),
            ChainPhase::Extending(height) => println!("  Phase: extending ({})", height),
        }
        println!("  Height: {}", tip.height);
        println!("  Best block: {}", tip.hash);
        println!("  Next difficulty: {}", engine.difficulty());
        println!("  Next reward: {}", engine.params().block_reward(tip.height + 1));
        println!("  UTXO count: {}", engine.utxo_count());
        Ok(())
    }

    fn balance(&mut self, address: &str) -> Result<()> {
        let engine = self.engine()?;
        let balance = engine.balance_of(address);
        let utxos = engine.utxos_for(address);

        println!("Balance for {}:", address);
        println!("  {} units ({} coins)", balance, balance as f64 / UNITS_PER_COIN);
        println!("  Unspent outputs: {}", utxos.len());
        for (outpoint, utxo) in utxos {
            println!("    {} {}", outpoint, utxo.output.amount);
        }
        Ok(())
    }

    fn block(&mut self, height: u64) -> Result<()> {
        let engine = self.engine()?;
        match engine.block_at(height)? {
            Some(block) => {
                Self::print_block(height, &block);
                Ok(())
            }
            None => Err(ChainError::NotFound(format!("block at height {}", height))),
        }
    }

    fn template(&mut self, address: &str) -> Result<()> {
        let engine = self.engine()?;
        let template = engine.create_template(address)?;
        let json = serde_json::to_string_pretty(&template)
            .map_err(|e| ChainError::Encoding(e.to_string()))?;
        println!("{}", json);
        Ok(())
    }

    fn mine(&mut self, address: &str, blocks: u64) -> Result<()> {
        let engine = self.engine()?;
        println!("Mining {} block(s) to {}...", blocks, address);

        let mined = mine_blocks(&engine, address, &self.config.mining, &CancelToken::new(), Some(blocks))?;
        let tip = engine.tip().ok_or(ChainError::Uninitialized)?;

        println!("✓ Mined {} block(s)", mined);
        println!("  Height: {}", tip.height);
        println!("  Best block: {}", tip.hash);
        println!("  Balance of {}: {}", address, engine.balance_of(address));
        Ok(())
    }

    fn keygen() {
        let keys = KeyPair::generate();
        println!("Address: {}", keys.address());
        println!("Secret key: {}", keys.secret_hex());
    }

    /// Build, sign and pool a spend. The mempool lives in this process, so
    /// `--mine` is how the spend reaches a block from the command line.
    fn send(&mut self, key: &str, to: &str, amount: u64, fee: u64, mine: Option<&str>) -> Result<()> {
        let engine = self.engine()?;
        let keys = KeyPair::from_secret_hex(key).map_err(ChainError::Wallet)?;
        let tx = TransactionBuilder::new(&keys, &engine)
            .build(to, amount, fee)
            .map_err(ChainError::Wallet)?;
        let txid = tx.txid();

        println!("Transaction created:");
        println!("  TXID: {}", txid);
        println!("  From: {}", keys.address());
        println!("  Inputs: {}", tx.inputs.len());
        println!("  Outputs: {}", tx.outputs.len());
        println!("  Raw: {}", tx.to_hex());

        let outcome = engine.submit_transaction(tx);
        if !outcome.accepted {
            return Err(ChainError::Wallet(format!(
                "Transaction {} rejected: {}",
                txid,
                outcome.reason.unwrap_or_default()
            )));
        }
        println!("✓ Accepted into mempool");

        if let Some(address) = mine {
            mine_blocks(&engine, address, &self.config.mining, &CancelToken::new(), Some(1))?;
            let confirmed = !engine.mempool_contains(&txid);
            let tip = engine.tip().ok_or(ChainError::Uninitialized)?;
            println!("✓ Mined block {} at height {}", tip.hash, tip.height);
            if !confirmed {
                log::warn!("Transaction {} is still pending", txid);
            }
        }
        println!("  Balance of {}: {}", keys.address(), engine.balance_of(&keys.address()));
        Ok(())
    }

    fn run(&mut self, miner_address: Option<String>) -> Result<()> {
        let engine = self.engine()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| ChainError::Io(format!("Failed to start runtime: {}", e)))?;

        let node = Node::new(engine, self.config.clone());
        runtime.block_on(node.run(miner_address))
    }

    /// Print block information
    fn print_block(height: u64, block: &Block) {
        println!("Block {}:", height);
        println!("  Hash: {}", block.hash());
        println!("  Previous: {}", block.header.prev_hash);
        println!("  Merkle root: {}", block.header.merkle_root);
        println!("  Timestamp: {}", block.header.timestamp);
        println!("  Difficulty: {}", block.header.difficulty);
        println!("  Nonce: {}", block.header.nonce);
        println!("  Transactions: {}", block.transactions.len());

        for (i, tx) in block.transactions.iter().enumerate() {
            let total = tx.total_output_value().unwrap_or(0);
            println!("    [{}] {} ({} units)", i, tx.txid(), total);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["talant-chain", "mine", "A", "--blocks", "3"]).unwrap();
        assert!(matches!(cli.command, Commands::Mine { ref address, blocks: 3 } if address == "A"));

        let cli = Cli::try_parse_from(["talant-chain", "run", "--mine", "B"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { mine: Some(ref a) } if a == "B"));

        let cli = Cli::try_parse_from([
            "talant-chain", "send", "--key", "00ff", "B", "500", "--fee", "5", "--mine", "M",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Send { amount: 500, fee: 5, mine: Some(ref m), ref to, .. } if m == "M" && to == "B"
        ));

        let cli = Cli::try_parse_from(["talant-chain", "--data-dir", "/tmp/chain", "info"]).unwrap();
        assert_eq!(cli.node_config().unwrap().data_dir, PathBuf::from("/tmp/chain"));
    }

    #[test]
    fn test_mine_then_query() {
        let dir = std::env::temp_dir().join(format!("talant-cli-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let mut config = NodeConfig::default();
        config.data_dir = dir.clone();
        config.mining.threads = 1;
        let mut handler = CliHandler::new(config);

        handler.handle(Commands::Init).unwrap();
        handler.handle(Commands::Mine { address: "A".to_string(), blocks: 2 }).unwrap();
        handler.handle(Commands::Block { height: 2 }).unwrap();
        assert!(matches!(
            handler.handle(Commands::Block { height: 3 }),
            Err(ChainError::NotFound(_))
        ));

        let engine = handler.engine().unwrap();
        assert_eq!(engine.tip().unwrap().height, 2);
        assert_eq!(engine.balance_of("A"), 10_000_000_000);

        drop(engine);
        drop(handler);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_send_then_mine() {
        let dir = std::env::temp_dir().join(format!("talant-cli-send-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let mut config = NodeConfig::default();
        config.data_dir = dir.clone();
        config.mining.threads = 1;
        let mut handler = CliHandler::new(config);
        let keys = KeyPair::generate();

        handler.handle(Commands::Mine { address: keys.address(), blocks: 1 }).unwrap();
        handler
            .handle(Commands::Send {
                key: keys.secret_hex(),
                to: "B".to_string(),
                amount: 1_000,
                fee: 10,
                mine: Some("M".to_string()),
            })
            .unwrap();

        let engine = handler.engine().unwrap();
        assert_eq!(engine.tip().unwrap().height, 2);
        assert_eq!(engine.balance_of("B"), 1_000);
        assert_eq!(engine.balance_of(&keys.address()), 5_000_000_000 - 1_010);
        assert_eq!(engine.balance_of("M"), 5_000_000_000);
        assert_eq!(engine.mempool_len(), 0);

        // Overspending is reported, not pooled
        let err = handler
            .handle(Commands::Send {
                key: keys.secret_hex(),
                to: "B".to_string(),
                amount: 5_000_000_000,
                fee: 0,
                mine: None,
            })
            .unwrap_err();
        assert!(matches!(err, ChainError::Wallet(_)));
        assert!(matches!(
            handler.handle(Commands::Send {
                key: "not hex".to_string(),
                to: "B".to_string(),
                amount: 1,
                fee: 0,
                mine: None,
            }),
            Err(ChainError::Wallet(_))
        ));

        drop(engine);
        drop(handler);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
