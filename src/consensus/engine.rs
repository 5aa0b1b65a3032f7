// Consensus engine: the single authoritative mutator of chain state

use crate::config::ChainParams;
use crate::consensus::difficulty::DifficultyRetarget;
use crate::consensus::pow::{self, CancelToken};
use crate::consensus::validation::{BlockValidator, RejectReason, TransactionValidator};
use crate::core::{Block, BlockHeader, Hash256, SpendVerifier, Transaction};
use crate::error::{ChainError, Result};
use crate::mempool::{Admission, Mempool};
use crate::storage::{BlockStore, ChainTip, OutPoint, Utxo, UtxoSet};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Block version produced by templates
pub const BLOCK_VERSION: u32 = 1;

/// Current Unix time in seconds
pub fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Lifecycle of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainPhase {
    Empty,
    Genesis,
    Extending(u64),
}

/// Outcome of a block or transaction submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResult {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SubmitResult {
    pub fn accepted() -> Self {
        Self { accepted: true, reason: None }
    }

    pub fn rejected(reason: &RejectReason) -> Self {
        Self { accepted: false, reason: Some(reason.to_string()) }
    }
}

/// Work handed to miners. Advisory: a submitted block is fully re-validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkTemplate {
    pub height: u64,
    pub prev_hash: Hash256,
    pub timestamp: u64,
    pub difficulty: u32,
    /// Coinbase first, then selected mempool transactions
    pub transactions: Vec<Transaction>,
    pub miner_address: String,
    pub reward: u64,
    pub merkle_root: Hash256,
}

impl WorkTemplate {
    pub fn header(&self, nonce: u32) -> BlockHeader {
        BlockHeader::new(
            BLOCK_VERSION,
            self.prev_hash,
            self.merkle_root,
            self.timestamp,
            self.difficulty,
            nonce,
        )
    }

    pub fn into_block(self, nonce: u32) -> Block {
        let header = self.header(nonce);
        Block::new(header, self.transactions)
    }
}

/// Everything that changes when a block is accepted
struct ChainState {
    tip: Option<ChainTip>,
    utxo: UtxoSet,
    /// Difficulty required of the next block
    difficulty: u32,
    /// Most recent block timestamps, oldest first
    timestamps: VecDeque<u64>,
}

/// Orchestrates validation, storage, the UTXO set and the mempool.
///
/// Lock order is `state` then `mempool`. `extend` holds the state write lock
/// for its whole duration, so readers see either the old tip or the new one.
pub struct ConsensusEngine {
    params: ChainParams,
    verifier: Arc<dyn SpendVerifier>,
    store: Box<dyn BlockStore>,
    retarget: DifficultyRetarget,
    state: RwLock<ChainState>,
    mempool: Mutex<Mempool>,
    work_tokens: Mutex<Vec<CancelToken>>,
}

impl ConsensusEngine {
    /// Engine in the `Empty` phase. Call `bootstrap` (or `extend` with the
    /// genesis block) before anything else.
    pub fn new(
        params: ChainParams,
        store: Box<dyn BlockStore>,
        verifier: Arc<dyn SpendVerifier>,
        mempool_capacity: usize,
    ) -> Result<Self> {
        params.validate()?;
        let state = ChainState {
            tip: None,
            utxo: UtxoSet::new(params.undo_depth),
            difficulty: params.initial_difficulty,
            timestamps: VecDeque::with_capacity(params.retarget_window),
        };
        Ok(Self {
            retarget: DifficultyRetarget::from_params(&params),
            params,
            verifier,
            store,
            state: RwLock::new(state),
            mempool: Mutex::new(Mempool::new(mempool_capacity)),
            work_tokens: Mutex::new(Vec::new()),
        })
    }

    /// `new` followed by `bootstrap`
    pub fn open(
        params: ChainParams,
        store: Box<dyn BlockStore>,
        verifier: Arc<dyn SpendVerifier>,
        mempool_capacity: usize,
    ) -> Result<Self> {
        let engine = Self::new(params, store, verifier, mempool_capacity)?;
        engine.bootstrap()?;
        Ok(engine)
    }

    /// Replay stored blocks, or write genesis into an empty store
    pub fn bootstrap(&self) -> Result<ChainTip> {
        if let Some(tip) = self.tip() {
            return Ok(tip);
        }
        match self.store.read_tip().map_err(ChainError::StorageFailure)? {
            Some(stored) => self.replay(stored),
            None => {
                let tip = self.extend(self.params.genesis_block())?;
                log::info!("Initialized chain with genesis {}", tip.hash);
                Ok(tip)
            }
        }
    }

    /// Rebuild in-memory state from the store, re-validating every block
    fn replay(&self, stored: ChainTip) -> Result<ChainTip> {
        let blocks = self
            .store
            .read_range(0, stored.height + 1)
            .map_err(ChainError::StorageFailure)?;
        if blocks.len() as u64 != stored.height + 1 {
            return Err(ChainError::StorageFailure(format!(
                "Store tip is at height {} but only {} blocks are readable",
                stored.height,
                blocks.len()
            )));
        }

        let mut state = self.state.write();
        for (height, block) in blocks.iter().enumerate() {
            if height == 0 && block.hash() != self.params.genesis_block().hash() {
                return Err(ChainError::Config(
                    "Stored genesis does not match chain parameters".to_string(),
                ));
            }
            let height = self.check_candidate(&state, block).map_err(|reason| {
                ChainError::StorageFailure(format!(
                    "Stored block {} fails validation: {}",
                    block.hash(),
                    reason
                ))
            })?;
            self.commit(&mut state, block, height)?;
        }

        let tip = state.tip.ok_or(ChainError::Uninitialized)?;
        if tip != stored {
            return Err(ChainError::StorageFailure(format!(
                "Replayed tip {} does not match stored tip {}",
                tip.hash, stored.hash
            )));
        }
        log::info!(
            "Replayed {} blocks; tip {} at height {}, difficulty {}",
            blocks.len(),
            tip.hash,
            tip.height,
            state.difficulty
        );
        Ok(tip)
    }

    /// Validate `block` against the current tip and, if valid, make it the
    /// new tip. Rejections leave all state unchanged.
    pub fn extend(&self, block: Block) -> Result<ChainTip> {
        let mut state = self.state.write();
        let height = self.check_candidate(&state, &block)?;

        let stored = self.store.append(&block).map_err(ChainError::StorageFailure)?;
        if stored.height != height {
            return Err(ChainError::StorageFailure(format!(
                "Store placed block at height {}, expected {}",
                stored.height, height
            )));
        }

        let tip = self.commit(&mut state, &block, height)?;
        let pruned = self.mempool.lock().remove_included(&block.transactions);
        drop(state);

        self.cancel_outstanding_work();
        log::info!(
            "Accepted block {} at height {} ({} txs, {} mempool entries pruned)",
            tip.hash,
            tip.height,
            block.transactions.len(),
            pruned
        );
        Ok(tip)
    }

    /// Consensus checks in order; returns the height the block would take
    fn check_candidate(
        &self,
        state: &ChainState,
        block: &Block,
    ) -> std::result::Result<u64, RejectReason> {
        let tip = match state.tip {
            Some(tip) => tip,
            None => {
                if block.hash() != self.params.genesis_block().hash() {
                    return Err(RejectReason::ForkOrStale);
                }
                return Ok(0);
            }
        };

        if block.header.prev_hash != tip.hash {
            return Err(RejectReason::ForkOrStale);
        }

        if block.header.difficulty != state.difficulty
            || !pow::meets(&block.hash(), state.difficulty)
        {
            return Err(RejectReason::InsufficientWork);
        }

        let height = tip.height + 1;
        BlockValidator::new(&self.params, &*self.verifier).validate_body(
            block,
            &state.utxo,
            height,
        )?;
        Ok(height)
    }

    /// Apply an already validated block to in-memory state
    fn commit(&self, state: &mut ChainState, block: &Block, height: u64) -> Result<ChainTip> {
        state.utxo.apply(block, height).map_err(|e| {
            ChainError::StorageFailure(format!("UTXO set out of step with validation: {}", e))
        })?;

        state.timestamps.push_back(block.header.timestamp);
        while state.timestamps.len() > self.params.retarget_window {
            state.timestamps.pop_front();
        }
        let timestamps: Vec<u64> = state.timestamps.iter().copied().collect();
        state.difficulty = self.retarget.next_difficulty(state.difficulty, &timestamps);

        let tip = ChainTip { hash: block.hash(), height };
        state.tip = Some(tip);
        Ok(tip)
    }

    /// Work submission. Rejections are reported in the result; only
    /// escalated failures surface as errors.
    pub fn submit_block(&self, block: Block) -> Result<SubmitResult> {
        let hash = block.hash();
        match self.extend(block) {
            Ok(_) => Ok(SubmitResult::accepted()),
            Err(ChainError::Rejected(reason)) => {
                log::warn!("Rejected block {}: {}", hash, reason);
                Ok(SubmitResult::rejected(&reason))
            }
            Err(e) => Err(e),
        }
    }

    /// Validate against the committed UTXO set and pool the transaction.
    /// Proofs are checked under the state read lock only; the mempool is
    /// locked just for the insert.
    pub fn admit(&self, tx: Transaction) -> std::result::Result<Admission, RejectReason> {
        let txid = tx.txid();
        let result = if self.mempool.lock().contains(&txid) {
            Ok(Admission::AlreadyPresent)
        } else {
            let state = self.state.read();
            let height = state.tip.map_or(0, |tip| tip.height + 1);
            let validator = TransactionValidator::new(&self.params, &*self.verifier);
            Mempool::check(&tx, &state.utxo, &validator, height)
                .and_then(|()| self.mempool.lock().insert(tx, unix_time()))
        };

        match &result {
            Ok(Admission::Added) => log::debug!("Admitted transaction {}", txid),
            Ok(Admission::AlreadyPresent) => log::debug!("Transaction {} already pooled", txid),
            Err(reason) => log::debug!("Rejected transaction {}: {}", txid, reason),
        }
        result
    }

    /// Transaction submission
    pub fn submit_transaction(&self, tx: Transaction) -> SubmitResult {
        match self.admit(tx) {
            Ok(_) => SubmitResult::accepted(),
            Err(reason) => SubmitResult::rejected(&reason),
        }
    }

    /// Template on top of the current tip, timestamped now
    pub fn create_template(&self, miner_address: &str) -> Result<WorkTemplate> {
        let last = self.state.read().timestamps.back().copied().unwrap_or(0);
        self.create_template_at(miner_address, unix_time().max(last))
    }

    pub fn create_template_at(&self, miner_address: &str, timestamp: u64) -> Result<WorkTemplate> {
        let state = self.state.read();
        let tip = state.tip.ok_or(ChainError::Uninitialized)?;
        let height = tip.height + 1;
        let reward = self.params.block_reward(height);

        let validator = TransactionValidator::new(&self.params, &*self.verifier);
        let max_count = self
            .params
            .template_max_transactions
            .min(self.params.max_block_transactions.saturating_sub(1));
        let selected = self
            .mempool
            .lock()
            .select_for_block(max_count, &state.utxo, &validator, height);

        let mut transactions = Vec::with_capacity(selected.len() + 1);
        transactions.push(Transaction::coinbase(height, miner_address, reward));
        transactions.extend(selected);

        Ok(WorkTemplate {
            height,
            prev_hash: tip.hash,
            timestamp,
            difficulty: state.difficulty,
            merkle_root: Block::calculate_merkle_root(&transactions),
            transactions,
            miner_address: miner_address.to_string(),
            reward,
        })
    }

    /// Sum of unspent outputs committed to `address`
    pub fn balance_of(&self, address: &str) -> u64 {
        self.state.read().utxo.balance(address.as_bytes())
    }

    pub fn utxos_for(&self, address: &str) -> Vec<(OutPoint, Utxo)> {
        self.state.read().utxo.utxos_for(address.as_bytes())
    }

    /// Copy of the UTXO set as of the current tip
    pub fn utxo_snapshot(&self) -> UtxoSet {
        self.state.read().utxo.clone()
    }

    pub fn utxo_count(&self) -> usize {
        self.state.read().utxo.len()
    }

    pub fn tip(&self) -> Option<ChainTip> {
        self.state.read().tip
    }

    pub fn phase(&self) -> ChainPhase {
        match self.state.read().tip {
            None => ChainPhase::Empty,
            Some(tip) if tip.height == 0 => ChainPhase::Genesis,
            Some(tip) => ChainPhase::Extending(tip.height),
        }
    }

    /// Difficulty required of the next block
    pub fn difficulty(&self) -> u32 {
        self.state.read().difficulty
    }

    /// Timestamp of the tip block
    pub fn tip_timestamp(&self) -> Option<u64> {
        self.state.read().timestamps.back().copied()
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn block_at(&self, height: u64) -> Result<Option<Block>> {
        let blocks = self
            .store
            .read_range(height, height.saturating_add(1))
            .map_err(ChainError::StorageFailure)?;
        Ok(blocks.into_iter().next())
    }

    pub fn mempool_len(&self) -> usize {
        self.mempool.lock().len()
    }

    pub fn mempool_contains(&self, txid: &Hash256) -> bool {
        self.mempool.lock().contains(txid)
    }

    /// Housekeeping; takes only the mempool lock
    pub fn evict_expired(&self, max_age_secs: u64) -> usize {
        let evicted = self.mempool.lock().evict_expired(max_age_secs, unix_time());
        if evicted > 0 {
            log::info!("Evicted {} expired mempool entries", evicted);
        }
        evicted
    }

    /// Token cancelled the next time the tip advances. Tokens every caller
    /// has dropped are forgotten here.
    pub fn work_token(&self) -> CancelToken {
        let token = CancelToken::new();
        let mut tokens = self.work_tokens.lock();
        tokens.retain(|t| t.is_shared() && !t.is_cancelled());
        tokens.push(token.clone());
        token
    }

    /// Cancel every outstanding work token
    pub fn cancel_outstanding_work(&self) {
        for token in self.work_tokens.lock().drain(..) {
            token.cancel();
        }
    }
}
