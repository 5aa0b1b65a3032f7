// Single-node proof-of-work ledger engine

pub mod cli;
pub mod config;
pub mod consensus;
pub mod core;
pub mod error;
pub mod mempool;
pub mod node;
pub mod storage;
pub mod wallet;

// Re-exports for convenience
pub use cli::{Cli, CliHandler, Commands};
pub use config::{ChainParams, MempoolConfig, MiningConfig, NodeConfig};
pub use consensus::{
    BlockValidator, CancelToken, ChainPhase, ConsensusEngine, DifficultyRetarget, Miner,
    RejectReason, SubmitResult, Target, TransactionValidator, WorkTemplate,
};
pub use crate::core::{
    Block, BlockHeader, Hash256, KeyPair, Secp256k1Verifier, SpendVerifier, Transaction, TxInput,
    TxOutput,
};
pub use error::ChainError;
pub use mempool::{Admission, Mempool};
pub use node::Node;
pub use storage::{BlockStore, ChainStore, ChainTip, OutPoint, Utxo, UtxoSet};
pub use wallet::TransactionBuilder;
