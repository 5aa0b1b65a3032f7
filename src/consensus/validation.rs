// Transaction and block validation

use crate::config::ChainParams;
use crate::core::{Block, SpendVerifier, Transaction};
use crate::storage::{OutPoint, UtxoError, UtxoOverlay, UtxoView};
use std::collections::HashSet;
use std::fmt;

/// Why a block or transaction was rejected. Rejections are local: the
/// offending candidate is dropped and shared state is left as it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Block does not build on the current tip
    ForkOrStale,
    /// Block hash does not meet the required target
    InsufficientWork,
    /// Merkle root doesn't match calculated value
    MerkleMismatch,
    /// Transaction at `index` in the block failed validation
    InvalidTransaction { index: usize, reason: Box<RejectReason> },
    /// Missing, misplaced, repeated or mis-paying coinbase
    BadCoinbase,
    /// Input references an output that does not exist or is already spent
    UnknownOrSpentInput,
    /// Spend proof does not verify against the output's commitment
    InvalidProof,
    /// Outputs exceed inputs
    Overspend,
    /// Coinbase amount differs from the schedule reward
    BadReward,
    /// Same transaction appears twice in a block
    DuplicateTransaction,
    /// Structurally invalid
    Malformed(String),
    /// Block carries more transactions than allowed
    Oversized,
    /// Mempool is at capacity
    MempoolFull,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RejectReason::ForkOrStale => write!(f, "Block does not extend the current tip"),
            RejectReason::InsufficientWork => write!(f, "Insufficient proof of work"),
            RejectReason::MerkleMismatch => write!(f, "Merkle root mismatch"),
            RejectReason::InvalidTransaction { index, reason } => {
                write!(f, "Invalid transaction at index {}: {}", index, reason)
            }
            RejectReason::BadCoinbase => write!(f, "Bad coinbase"),
            RejectReason::UnknownOrSpentInput => write!(f, "Unknown or spent input"),
            RejectReason::InvalidProof => write!(f, "Invalid spend proof"),
            RejectReason::Overspend => write!(f, "Outputs exceed inputs"),
            RejectReason::BadReward => write!(f, "Coinbase amount differs from block reward"),
            RejectReason::DuplicateTransaction => write!(f, "Duplicate transaction"),
            RejectReason::Malformed(msg) => write!(f, "Malformed: {}", msg),
            RejectReason::Oversized => write!(f, "Too many transactions"),
            RejectReason::MempoolFull => write!(f, "Mempool is full"),
        }
    }
}

impl std::error::Error for RejectReason {}

/// Pure transaction checks against a UTXO view. Never mutates the view, so it
/// can run against the committed set or any speculative overlay.
pub struct TransactionValidator<'a> {
    params: &'a ChainParams,
    verifier: &'a dyn SpendVerifier,
}

impl<'a> TransactionValidator<'a> {
    pub fn new(params: &'a ChainParams, verifier: &'a dyn SpendVerifier) -> Self {
        Self { params, verifier }
    }

    /// Validate `tx` for inclusion at `height`. Returns the fee on success.
    ///
    /// Checks run in order and stop at the first failure: structure, input
    /// existence, spend proofs, value balance, coinbase reward.
    pub fn verify(
        &self,
        tx: &Transaction,
        view: &dyn UtxoView,
        height: u64,
    ) -> Result<u64, RejectReason> {
        Self::check_structure(tx)?;
        let total_out = tx
            .total_output_value()
            .ok_or_else(|| RejectReason::Malformed("output total overflows".to_string()))?;

        if tx.is_coinbase() {
            if tx.coinbase_height() != Some(height) {
                return Err(RejectReason::BadCoinbase);
            }
            if total_out != self.params.block_reward(height) {
                return Err(RejectReason::BadReward);
            }
            return Ok(0);
        }

        // Resolve every input first
        let mut resolved = Vec::with_capacity(tx.inputs.len());
        for input in &tx.inputs {
            let outpoint = OutPoint::new(input.prev_tx_hash, input.output_index);
            let utxo = view.get(&outpoint).ok_or(RejectReason::UnknownOrSpentInput)?;
            resolved.push(utxo);
        }

        let message = tx.signing_message();
        for (input, utxo) in tx.inputs.iter().zip(&resolved) {
            if !self.verifier.verify(&message, &input.spend_proof, &utxo.output.recipient) {
                return Err(RejectReason::InvalidProof);
            }
        }

        let total_in = resolved
            .iter()
            .try_fold(0u64, |acc, utxo| acc.checked_add(utxo.output.amount))
            .ok_or_else(|| RejectReason::Malformed("input total overflows".to_string()))?;
        if total_in < total_out {
            return Err(RejectReason::Overspend);
        }

        Ok(total_in - total_out)
    }

    /// Context-free structural rules
    pub fn check_structure(tx: &Transaction) -> Result<(), RejectReason> {
        if tx.outputs.is_empty() {
            return Err(RejectReason::Malformed("no outputs".to_string()));
        }
        if tx.inputs.is_empty() {
            return Err(RejectReason::Malformed("no inputs".to_string()));
        }
        if tx.is_coinbase() {
            return Ok(());
        }

        let mut seen = HashSet::with_capacity(tx.inputs.len());
        for input in &tx.inputs {
            if input.is_coinbase() {
                return Err(RejectReason::Malformed(
                    "zero-hash input in a regular transaction".to_string(),
                ));
            }
            if !seen.insert((input.prev_tx_hash, input.output_index)) {
                return Err(RejectReason::Malformed("duplicate input".to_string()));
            }
        }
        Ok(())
    }
}

/// Block body validation: size, Merkle root, transactions, coinbase.
/// Tip linkage and proof of work are checked by the engine before this.
pub struct BlockValidator<'a> {
    params: &'a ChainParams,
    transactions: TransactionValidator<'a>,
}

impl<'a> BlockValidator<'a> {
    pub fn new(params: &'a ChainParams, verifier: &'a dyn SpendVerifier) -> Self {
        Self {
            params,
            transactions: TransactionValidator::new(params, verifier),
        }
    }

    /// Validate the body of `block` as the block at `height` on top of `view`
    pub fn validate_body(
        &self,
        block: &Block,
        view: &dyn UtxoView,
        height: u64,
    ) -> Result<(), RejectReason> {
        if block.transactions.len() > self.params.max_block_transactions {
            return Err(RejectReason::Oversized);
        }

        if Block::calculate_merkle_root(&block.transactions) != block.header.merkle_root {
            return Err(RejectReason::MerkleMismatch);
        }

        self.validate_transactions(block, view, height)?;
        self.validate_coinbase(block, view, height)
    }

    /// Each transaction sees the outputs of the ones before it
    fn validate_transactions(
        &self,
        block: &Block,
        view: &dyn UtxoView,
        height: u64,
    ) -> Result<(), RejectReason> {
        let mut overlay = UtxoOverlay::new(view);
        let mut seen = HashSet::with_capacity(block.transactions.len());

        for (index, tx) in block.transactions.iter().enumerate() {
            let invalid = |reason: RejectReason| RejectReason::InvalidTransaction {
                index,
                reason: Box::new(reason),
            };

            if !seen.insert(tx.txid()) {
                return Err(invalid(RejectReason::DuplicateTransaction));
            }

            if tx.is_coinbase() {
                // Placement and reward are checked afterwards
                if index == 0 {
                    overlay
                        .apply_transaction(tx, height)
                        .map_err(|e| invalid(utxo_reason(e)))?;
                }
                continue;
            }

            self.transactions
                .verify(tx, &overlay, height)
                .map_err(invalid)?;
            overlay
                .apply_transaction(tx, height)
                .map_err(|e| invalid(utxo_reason(e)))?;
        }

        Ok(())
    }

    /// Exactly one coinbase, first, paying the scheduled reward
    fn validate_coinbase(
        &self,
        block: &Block,
        view: &dyn UtxoView,
        height: u64,
    ) -> Result<(), RejectReason> {
        let coinbase = block.coinbase().ok_or(RejectReason::BadCoinbase)?;
        if block.transactions.iter().filter(|tx| tx.is_coinbase()).count() != 1 {
            return Err(RejectReason::BadCoinbase);
        }
        self.transactions
            .verify(coinbase, view, height)
            .map(|_| ())
            .map_err(|_| RejectReason::BadCoinbase)
    }
}

fn utxo_reason(err: UtxoError) -> RejectReason {
    match err {
        UtxoError::MissingInput(_) => RejectReason::UnknownOrSpentInput,
        UtxoError::DuplicateOutput(_) => RejectReason::DuplicateTransaction,
        UtxoError::NotTip(_) => RejectReason::ForkOrStale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BlockHeader, Hash256, KeyPair, Secp256k1Verifier, TxInput, TxOutput};
    use crate::storage::UtxoSet;

    const REWARD: u64 = 5_000_000_000;

    struct Fixture {
        params: ChainParams,
        keys: KeyPair,
        set: UtxoSet,
        funding: Transaction,
    }

    fn fixture() -> Fixture {
        let params = ChainParams::default();
        let keys = KeyPair::generate();
        let funding = Transaction::coinbase(1, keys.address(), REWARD);
        let mut set = UtxoSet::new(10);
        let header = BlockHeader::new(
            1,
            Hash256::zero(),
            Block::calculate_merkle_root(std::slice::from_ref(&funding)),
            0,
            1,
            0,
        );
        set.apply(&Block::new(header, vec![funding.clone()]), 1).unwrap();
        Fixture { params, keys, set, funding }
    }

    fn signed_spend(f: &Fixture, outputs: Vec<TxOutput>) -> Transaction {
        let mut tx = Transaction::new(vec![TxInput::new(f.funding.txid(), 0)], outputs);
        f.keys.sign_all(&mut tx);
        tx
    }

    fn block_with(txs: Vec<Transaction>) -> Block {
        let header = BlockHeader::new(
            1,
            Hash256::new([1; 32]),
            Block::calculate_merkle_root(&txs),
            0,
            1,
            0,
        );
        Block::new(header, txs)
    }

    #[test]
    fn test_valid_spend_returns_fee() {
        let f = fixture();
        let validator = TransactionValidator::new(&f.params, &Secp256k1Verifier);
        let tx = signed_spend(&f, vec![TxOutput::new(REWARD - 100, "bob")]);
        assert_eq!(validator.verify(&tx, &f.set, 2), Ok(100));
    }

    #[test]
    fn test_unknown_input() {
        let f = fixture();
        let validator = TransactionValidator::new(&f.params, &Secp256k1Verifier);
        let mut tx = Transaction::new(
            vec![TxInput::new(Hash256::new([42; 32]), 0)],
            vec![TxOutput::new(1, "bob")],
        );
        f.keys.sign_all(&mut tx);
        assert_eq!(validator.verify(&tx, &f.set, 2), Err(RejectReason::UnknownOrSpentInput));
    }

    #[test]
    fn test_invalid_proof() {
        let f = fixture();
        let validator = TransactionValidator::new(&f.params, &Secp256k1Verifier);
        let mut tx = Transaction::new(
            vec![TxInput::new(f.funding.txid(), 0)],
            vec![TxOutput::new(1, "bob")],
        );
        KeyPair::generate().sign_all(&mut tx);
        assert_eq!(validator.verify(&tx, &f.set, 2), Err(RejectReason::InvalidProof));
    }

    #[test]
    fn test_overspend() {
        let f = fixture();
        let validator = TransactionValidator::new(&f.params, &Secp256k1Verifier);
        let tx = signed_spend(&f, vec![TxOutput::new(REWARD + 1, "bob")]);
        assert_eq!(validator.verify(&tx, &f.set, 2), Err(RejectReason::Overspend));
    }

    #[test]
    fn test_structural_failures() {
        let f = fixture();
        let validator = TransactionValidator::new(&f.params, &Secp256k1Verifier);

        let no_outputs = signed_spend(&f, vec![]);
        assert!(matches!(validator.verify(&no_outputs, &f.set, 2), Err(RejectReason::Malformed(_))));

        let mut twice = Transaction::new(
            vec![TxInput::new(f.funding.txid(), 0), TxInput::new(f.funding.txid(), 0)],
            vec![TxOutput::new(1, "bob")],
        );
        f.keys.sign_all(&mut twice);
        assert!(matches!(validator.verify(&twice, &f.set, 2), Err(RejectReason::Malformed(_))));
    }

    #[test]
    fn test_coinbase_reward_rules() {
        let f = fixture();
        let validator = TransactionValidator::new(&f.params, &Secp256k1Verifier);

        let good = Transaction::coinbase(2, "A", REWARD);
        assert_eq!(validator.verify(&good, &f.set, 2), Ok(0));

        let greedy = Transaction::coinbase(2, "A", REWARD + 1);
        assert_eq!(validator.verify(&greedy, &f.set, 2), Err(RejectReason::BadReward));

        let wrong_height = Transaction::coinbase(3, "A", REWARD);
        assert_eq!(validator.verify(&wrong_height, &f.set, 2), Err(RejectReason::BadCoinbase));
    }

    #[test]
    fn test_validator_does_not_mutate_view() {
        let f = fixture();
        let validator = TransactionValidator::new(&f.params, &Secp256k1Verifier);
        let tx = signed_spend(&f, vec![TxOutput::new(1, "bob")]);
        validator.verify(&tx, &f.set, 2).unwrap();
        validator.verify(&tx, &f.set, 2).unwrap();
        assert_eq!(f.set.len(), 1);
    }

    #[test]
    fn test_block_intra_dependency_allowed() {
        let f = fixture();
        let validator = BlockValidator::new(&f.params, &Secp256k1Verifier);
        let first = signed_spend(&f, vec![TxOutput::new(REWARD, f.keys.address())]);
        let mut second = Transaction::new(
            vec![TxInput::new(first.txid(), 0)],
            vec![TxOutput::new(REWARD, "carol")],
        );
        f.keys.sign_all(&mut second);

        let block = block_with(vec![Transaction::coinbase(2, "M", REWARD), first, second]);
        assert_eq!(validator.validate_body(&block, &f.set, 2), Ok(()));
    }

    #[test]
    fn test_block_double_spend_reports_index() {
        let f = fixture();
        let validator = BlockValidator::new(&f.params, &Secp256k1Verifier);
        let a = signed_spend(&f, vec![TxOutput::new(10, "bob")]);
        let b = signed_spend(&f, vec![TxOutput::new(20, "carol")]);

        let block = block_with(vec![Transaction::coinbase(2, "M", REWARD), a, b]);
        assert_eq!(
            validator.validate_body(&block, &f.set, 2),
            Err(RejectReason::InvalidTransaction {
                index: 2,
                reason: Box::new(RejectReason::UnknownOrSpentInput),
            })
        );
    }

    #[test]
    fn test_block_duplicate_transaction() {
        let f = fixture();
        let validator = BlockValidator::new(&f.params, &Secp256k1Verifier);
        let a = signed_spend(&f, vec![TxOutput::new(10, "bob")]);

        let block = block_with(vec![Transaction::coinbase(2, "M", REWARD), a.clone(), a]);
        assert_eq!(
            validator.validate_body(&block, &f.set, 2),
            Err(RejectReason::InvalidTransaction {
                index: 2,
                reason: Box::new(RejectReason::DuplicateTransaction),
            })
        );
    }

    #[test]
    fn test_block_coinbase_rules() {
        let f = fixture();
        let validator = BlockValidator::new(&f.params, &Secp256k1Verifier);

        let missing = block_with(vec![signed_spend(&f, vec![TxOutput::new(1, "bob")])]);
        assert_eq!(validator.validate_body(&missing, &f.set, 2), Err(RejectReason::BadCoinbase));

        let empty = block_with(vec![]);
        assert_eq!(validator.validate_body(&empty, &f.set, 2), Err(RejectReason::BadCoinbase));

        let greedy = block_with(vec![Transaction::coinbase(2, "M", REWARD * 2)]);
        assert_eq!(validator.validate_body(&greedy, &f.set, 2), Err(RejectReason::BadCoinbase));

        let two = block_with(vec![
            Transaction::coinbase(2, "M", REWARD),
            Transaction::coinbase(2, "N", REWARD),
        ]);
        assert_eq!(validator.validate_body(&two, &f.set, 2), Err(RejectReason::BadCoinbase));
    }

    #[test]
    fn test_block_merkle_and_size() {
        let f = fixture();
        let mut block = block_with(vec![Transaction::coinbase(2, "M", REWARD)]);
        block.header.merkle_root = Hash256::new([7; 32]);
        let validator = BlockValidator::new(&f.params, &Secp256k1Verifier);
        assert_eq!(validator.validate_body(&block, &f.set, 2), Err(RejectReason::MerkleMismatch));

        let params = ChainParams { max_block_transactions: 1, ..ChainParams::default() };
        let validator = BlockValidator::new(&params, &Secp256k1Verifier);
        let block = block_with(vec![
            Transaction::coinbase(2, "M", REWARD),
            signed_spend(&f, vec![TxOutput::new(1, "bob")]),
        ]);
        assert_eq!(validator.validate_body(&block, &f.set, 2), Err(RejectReason::Oversized));
    }
}
