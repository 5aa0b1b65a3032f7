// UTXO (Unspent Transaction Output) set management

use crate::core::{Block, Hash256, Transaction, TxOutput};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// UTXO identifier - transaction hash + output index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// UTXO - contains the output and metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub output: TxOutput,
    pub height: u64,       // Block height where this UTXO was created
    pub is_coinbase: bool, // Whether this is a coinbase output
}

impl Utxo {
    pub fn new(output: TxOutput, height: u64, is_coinbase: bool) -> Self {
        Self {
            output,
            height,
            is_coinbase,
        }
    }
}

/// Read-only UTXO lookups, implemented by the set and by overlays on top of it
pub trait UtxoView {
    fn get(&self, outpoint: &OutPoint) -> Option<&Utxo>;

    fn contains(&self, outpoint: &OutPoint) -> bool {
        self.get(outpoint).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtxoError {
    /// An input references an output that is not in the set
    MissingInput(OutPoint),
    /// A transaction would recreate an output that is still unspent
    DuplicateOutput(OutPoint),
    /// Revert requested for a block that is not the last applied one
    NotTip(Hash256),
}

impl fmt::Display for UtxoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UtxoError::MissingInput(op) => write!(f, "Missing input {}", op),
            UtxoError::DuplicateOutput(op) => write!(f, "Duplicate output {}", op),
            UtxoError::NotTip(hash) => write!(f, "Block {} is not the applied tip", hash),
        }
    }
}

impl std::error::Error for UtxoError {}

/// What `revert` needs to undo one block
#[derive(Debug, Clone)]
struct BlockUndo {
    block_hash: Hash256,
    spent: Vec<(OutPoint, Utxo)>,
    created: Vec<OutPoint>,
}

/// In-memory UTXO set with a recipient index and a bounded undo log.
///
/// Mutated only through `apply` and `revert`, both all-or-nothing.
#[derive(Debug, Clone)]
pub struct UtxoSet {
    entries: HashMap<OutPoint, Utxo>,
    by_recipient: HashMap<Vec<u8>, HashSet<OutPoint>>,
    undo: VecDeque<BlockUndo>,
    undo_depth: usize,
}

impl UtxoView for UtxoSet {
    fn get(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        self.entries.get(outpoint)
    }
}

impl UtxoSet {
    /// Create an empty UTXO set keeping undo data for `undo_depth` blocks
    pub fn new(undo_depth: usize) -> Self {
        Self {
            entries: HashMap::new(),
            by_recipient: HashMap::new(),
            undo: VecDeque::new(),
            undo_depth,
        }
    }

    /// Look up an unspent output
    pub fn lookup(&self, txid: &Hash256, index: u32) -> Option<&Utxo> {
        self.entries.get(&OutPoint::new(*txid, index))
    }

    /// Consume every input of `block` and add every output it creates.
    /// Nothing is changed if any input is missing.
    pub fn apply(&mut self, block: &Block, height: u64) -> Result<(), UtxoError> {
        let (spent, created) = {
            let mut overlay = UtxoOverlay::new(&*self);
            for tx in &block.transactions {
                overlay.apply_transaction(tx, height)?;
            }
            overlay.into_changes()
        };

        for (outpoint, _) in &spent {
            self.remove_entry(outpoint);
        }
        let mut created_points = Vec::with_capacity(created.len());
        for (outpoint, utxo) in created {
            created_points.push(outpoint);
            self.insert_entry(outpoint, utxo);
        }

        self.undo.push_back(BlockUndo {
            block_hash: block.hash(),
            spent,
            created: created_points,
        });
        while self.undo.len() > self.undo_depth {
            self.undo.pop_front();
        }

        Ok(())
    }

    /// Inverse of `apply`; only valid for the most recently applied block
    pub fn revert(&mut self, block: &Block) -> Result<(), UtxoError> {
        let hash = block.hash();
        match self.undo.back() {
            Some(undo) if undo.block_hash == hash => {}
            _ => return Err(UtxoError::NotTip(hash)),
        }
        let Some(undo) = self.undo.pop_back() else {
            return Err(UtxoError::NotTip(hash));
        };

        for outpoint in &undo.created {
            self.remove_entry(outpoint);
        }
        for (outpoint, utxo) in undo.spent {
            self.insert_entry(outpoint, utxo);
        }

        Ok(())
    }

    /// Sum of unspent amounts committed to `recipient`
    pub fn balance(&self, recipient: &[u8]) -> u64 {
        self.by_recipient
            .get(recipient)
            .into_iter()
            .flatten()
            .filter_map(|op| self.entries.get(op))
            .fold(0u64, |acc, utxo| acc.saturating_add(utxo.output.amount))
    }

    /// All UTXOs committed to `recipient`, ordered by outpoint
    pub fn utxos_for(&self, recipient: &[u8]) -> Vec<(OutPoint, Utxo)> {
        let mut utxos: Vec<(OutPoint, Utxo)> = self
            .by_recipient
            .get(recipient)
            .into_iter()
            .flatten()
            .filter_map(|op| self.entries.get(op).map(|u| (*op, u.clone())))
            .collect();
        utxos.sort_by(|a, b| a.0.cmp(&b.0));
        utxos
    }

    /// Count total UTXOs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Same unspent outputs, ignoring undo history
    pub fn same_entries(&self, other: &UtxoSet) -> bool {
        self.entries == other.entries
    }

    fn insert_entry(&mut self, outpoint: OutPoint, utxo: Utxo) {
        self.by_recipient
            .entry(utxo.output.recipient.clone())
            .or_default()
            .insert(outpoint);
        self.entries.insert(outpoint, utxo);
    }

    fn remove_entry(&mut self, outpoint: &OutPoint) -> Option<Utxo> {
        let utxo = self.entries.remove(outpoint)?;
        if let Some(points) = self.by_recipient.get_mut(&utxo.output.recipient) {
            points.remove(outpoint);
            if points.is_empty() {
                self.by_recipient.remove(&utxo.output.recipient);
            }
        }
        Some(utxo)
    }
}

/// Copy-on-write view over a base set. Validation applies transactions here
/// so later transactions in a block can spend earlier ones without touching
/// the authoritative set.
pub struct UtxoOverlay<'a> {
    base: &'a dyn UtxoView,
    created: HashMap<OutPoint, Utxo>,
    spent_base: HashMap<OutPoint, Utxo>,
}

impl<'a> UtxoOverlay<'a> {
    pub fn new(base: &'a dyn UtxoView) -> Self {
        Self {
            base,
            created: HashMap::new(),
            spent_base: HashMap::new(),
        }
    }

    /// Mark an outpoint spent. Returns false if it is not available.
    pub fn spend(&mut self, outpoint: &OutPoint) -> bool {
        if self.created.remove(outpoint).is_some() {
            return true;
        }
        if self.spent_base.contains_key(outpoint) {
            return false;
        }
        match self.base.get(outpoint) {
            Some(utxo) => {
                self.spent_base.insert(*outpoint, utxo.clone());
                true
            }
            None => false,
        }
    }

    /// Spend the inputs and add the outputs of `tx`
    pub fn apply_transaction(&mut self, tx: &Transaction, height: u64) -> Result<(), UtxoError> {
        let is_coinbase = tx.is_coinbase();
        if !is_coinbase {
            for input in &tx.inputs {
                let outpoint = OutPoint::new(input.prev_tx_hash, input.output_index);
                if !self.spend(&outpoint) {
                    return Err(UtxoError::MissingInput(outpoint));
                }
            }
        }

        let txid = tx.txid();
        for (vout, output) in tx.outputs.iter().enumerate() {
            let outpoint = OutPoint::new(txid, vout as u32);
            if self.contains(&outpoint) {
                return Err(UtxoError::DuplicateOutput(outpoint));
            }
            self.created.insert(outpoint, Utxo::new(output.clone(), height, is_coinbase));
        }

        Ok(())
    }

    /// (base entries consumed, entries created and still unspent)
    fn into_changes(self) -> (Vec<(OutPoint, Utxo)>, Vec<(OutPoint, Utxo)>) {
        let mut spent: Vec<_> = self.spent_base.into_iter().collect();
        let mut created: Vec<_> = self.created.into_iter().collect();
        spent.sort_by(|a, b| a.0.cmp(&b.0));
        created.sort_by(|a, b| a.0.cmp(&b.0));
        (spent, created)
    }
}

impl UtxoView for UtxoOverlay<'_> {
    fn get(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        if let Some(utxo) = self.created.get(outpoint) {
            return Some(utxo);
        }
        if self.spent_base.contains_key(outpoint) {
            return None;
        }
        self.base.get(outpoint)
    }
}
