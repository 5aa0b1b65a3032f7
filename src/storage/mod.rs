// Storage layer: block persistence collaborator and the UTXO set

mod chain_store;
mod utxo_set;

pub use chain_store::ChainStore;
pub use utxo_set::{OutPoint, Utxo, UtxoError, UtxoOverlay, UtxoSet, UtxoView};

use crate::core::{Block, Hash256};

/// Pointer to the last accepted block
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChainTip {
    pub hash: Hash256,
    pub height: u64,
}

/// Crash-consistent, ordered block storage.
///
/// After a restart `read_tip` must return exactly the last block whose
/// `append` returned `Ok`.
pub trait BlockStore: Send + Sync {
    /// Append a block extending the stored tip; returns the new tip
    fn append(&self, block: &Block) -> Result<ChainTip, String>;

    /// Blocks with heights in `start..end`, stopping early at the stored tip
    fn read_range(&self, start: u64, end: u64) -> Result<Vec<Block>, String>;

    fn read_tip(&self) -> Result<Option<ChainTip>, String>;
}
