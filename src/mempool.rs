// Pending transaction pool

use crate::consensus::{RejectReason, TransactionValidator};
use crate::core::{Hash256, Transaction};
use crate::storage::{OutPoint, UtxoOverlay, UtxoView};
use std::collections::{BTreeMap, HashMap, HashSet};

/// A transaction waiting for inclusion
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub txid: Hash256,
    /// Unix seconds at admission
    pub admitted_at: u64,
}

/// Result of a successful admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Added,
    /// Same txid already pooled; nothing changed
    AlreadyPresent,
}

/// Transactions keyed by admission order, with a txid index.
///
/// Entries are validated against the committed UTXO set when admitted and
/// again when selected for a template, since blocks accepted in between may
/// have spent their inputs.
#[derive(Debug)]
pub struct Mempool {
    entries: BTreeMap<u64, MempoolEntry>,
    index: HashMap<Hash256, u64>,
    next_seq: u64,
    max_entries: usize,
}

impl Mempool {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            index: HashMap::new(),
            next_seq: 0,
            max_entries,
        }
    }

    /// Validate `tx` for inclusion at `height` and pool it
    pub fn admit(
        &mut self,
        tx: Transaction,
        view: &dyn UtxoView,
        validator: &TransactionValidator,
        height: u64,
        now: u64,
    ) -> Result<Admission, RejectReason> {
        if self.contains(&tx.txid()) {
            return Ok(Admission::AlreadyPresent);
        }
        Self::check(&tx, view, validator, height)?;
        self.insert(tx, now)
    }

    /// Admission rules that need no pool state. Callers run this without
    /// holding the pool, then `insert`.
    pub fn check(
        tx: &Transaction,
        view: &dyn UtxoView,
        validator: &TransactionValidator,
        height: u64,
    ) -> Result<(), RejectReason> {
        if tx.is_coinbase() {
            return Err(RejectReason::BadCoinbase);
        }
        validator.verify(tx, view, height)?;
        Ok(())
    }

    /// Pool an already checked transaction
    pub fn insert(&mut self, tx: Transaction, now: u64) -> Result<Admission, RejectReason> {
        let txid = tx.txid();
        if self.index.contains_key(&txid) {
            return Ok(Admission::AlreadyPresent);
        }
        if self.entries.len() >= self.max_entries {
            return Err(RejectReason::MempoolFull);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(txid, seq);
        self.entries.insert(
            seq,
            MempoolEntry {
                tx,
                txid,
                admitted_at: now,
            },
        );
        Ok(Admission::Added)
    }

    /// Up to `max_count` transactions, oldest first, that are valid together
    /// on top of `view`. Conflicting spends keep only the earliest admitted.
    pub fn select_for_block(
        &self,
        max_count: usize,
        view: &dyn UtxoView,
        validator: &TransactionValidator,
        height: u64,
    ) -> Vec<Transaction> {
        let mut overlay = UtxoOverlay::new(view);
        let mut selected = Vec::new();

        for entry in self.entries.values() {
            if selected.len() >= max_count {
                break;
            }
            if validator.verify(&entry.tx, &overlay, height).is_err() {
                continue;
            }
            if overlay.apply_transaction(&entry.tx, height).is_ok() {
                selected.push(entry.tx.clone());
            }
        }

        selected
    }

    /// Drop transactions confirmed by a block and any that spend an outpoint
    /// the block consumed. Returns how many entries were removed.
    pub fn remove_included(&mut self, transactions: &[Transaction]) -> usize {
        let confirmed: HashSet<Hash256> = transactions.iter().map(|tx| tx.txid()).collect();
        let spent: HashSet<OutPoint> = transactions
            .iter()
            .filter(|tx| !tx.is_coinbase())
            .flat_map(|tx| &tx.inputs)
            .map(|input| OutPoint::new(input.prev_tx_hash, input.output_index))
            .collect();

        self.retain(|entry| {
            !confirmed.contains(&entry.txid)
                && !entry
                    .tx
                    .inputs
                    .iter()
                    .any(|input| spent.contains(&OutPoint::new(input.prev_tx_hash, input.output_index)))
        })
    }

    /// Evict entries admitted more than `max_age_secs` before `now`
    pub fn evict_expired(&mut self, max_age_secs: u64, now: u64) -> usize {
        self.retain(|entry| now.saturating_sub(entry.admitted_at) <= max_age_secs)
    }

    fn retain(&mut self, mut keep: impl FnMut(&MempoolEntry) -> bool) -> usize {
        let before = self.entries.len();
        let index = &mut self.index;
        self.entries.retain(|_, entry| {
            let kept = keep(entry);
            if !kept {
                index.remove(&entry.txid);
            }
            kept
        });
        before - self.entries.len()
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.index.contains_key(txid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
