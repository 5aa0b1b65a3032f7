// Transaction builder

use crate::consensus::ConsensusEngine;
use crate::core::{KeyPair, Transaction, TxInput, TxOutput};
use crate::storage::{OutPoint, Utxo};

/// Builds signed spends of the outputs a key owns at the current tip
pub struct TransactionBuilder<'a> {
    keys: &'a KeyPair,
    engine: &'a ConsensusEngine,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(keys: &'a KeyPair, engine: &'a ConsensusEngine) -> Self {
        Self { keys, engine }
    }

    /// Pay `amount` to `to`, leaving `fee` unclaimed and returning any
    /// remainder to the sender
    pub fn build(&self, to: &str, amount: u64, fee: u64) -> Result<Transaction, String> {
        if amount == 0 {
            return Err("Amount must be positive".to_string());
        }
        let needed = amount
            .checked_add(fee)
            .ok_or("Amount plus fee overflows")?;

        let sender = self.keys.address();
        let utxos = self.engine.utxos_for(&sender);
        if utxos.is_empty() {
            return Err(format!("No unspent outputs for {}", sender));
        }

        let (selected, total_input) = Self::select_utxos(&utxos, needed)?;

        let inputs: Vec<TxInput> = selected
            .iter()
            .map(|outpoint| TxInput::new(outpoint.txid, outpoint.vout))
            .collect();

        let mut outputs = vec![TxOutput::new(amount, to)];
        let change = total_input - needed;
        if change > 0 {
            outputs.push(TxOutput::new(change, sender));
        }

        let mut tx = Transaction::new(inputs, outputs);
        self.keys.sign_all(&mut tx);
        Ok(tx)
    }

    /// Oldest outpoints first until `target` is covered
    fn select_utxos(utxos: &[(OutPoint, Utxo)], target: u64) -> Result<(Vec<OutPoint>, u64), String> {
        let mut selected = Vec::new();
        let mut total = 0u64;

        for (outpoint, utxo) in utxos {
            selected.push(*outpoint);
            total = total.saturating_add(utxo.output.amount);

            if total >= target {
                return Ok((selected, total));
            }
        }

        Err(format!("Insufficient funds: have {}, need {}", total, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChainParams, MiningConfig};
    use crate::consensus::CancelToken;
    use crate::core::Secp256k1Verifier;
    use crate::node::mine_blocks;
    use crate::storage::ChainStore;
    use std::sync::Arc;

    fn funded(keys: &KeyPair, blocks: u64) -> ConsensusEngine {
        let engine = ConsensusEngine::open(
            ChainParams::default(),
            Box::new(ChainStore::memory().unwrap()),
            Arc::new(Secp256k1Verifier),
            100,
        )
        .unwrap();
        let mining = MiningConfig { threads: 1, min_block_interval_secs: 0 };
        mine_blocks(&engine, &keys.address(), &mining, &CancelToken::new(), Some(blocks)).unwrap();
        engine
    }

    #[test]
    fn test_transaction_builder() {
        let keys = KeyPair::generate();
        let engine = funded(&keys, 1);

        let tx = TransactionBuilder::new(&keys, &engine)
            .build("B", 50_000, 1_000)
            .unwrap();

        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.outputs.len(), 2); // Payment + change
        assert_eq!(tx.outputs[0], TxOutput::new(50_000, "B"));
        assert_eq!(tx.outputs[1], TxOutput::new(5_000_000_000 - 51_000, keys.address()));
        assert!(engine.submit_transaction(tx).accepted);
    }

    #[test]
    fn test_exact_amount_has_no_change() {
        let keys = KeyPair::generate();
        let engine = funded(&keys, 2);

        let tx = TransactionBuilder::new(&keys, &engine)
            .build("B", 7_000_000_000, 3_000_000_000)
            .unwrap();

        assert_eq!(tx.inputs.len(), 2);
        assert_eq!(tx.outputs, vec![TxOutput::new(7_000_000_000, "B")]);
        assert!(engine.submit_transaction(tx).accepted);
    }

    #[test]
    fn test_insufficient_funds() {
        let keys = KeyPair::generate();
        let engine = funded(&keys, 1);
        let builder = TransactionBuilder::new(&keys, &engine);

        let result = builder.build("B", 5_000_000_000, 1);
        assert!(result.unwrap_err().contains("Insufficient funds"));
        assert!(builder.build("B", u64::MAX, 1).is_err());
        assert!(builder.build("B", 0, 0).is_err());
    }

    #[test]
    fn test_no_outputs_for_stranger() {
        let keys = KeyPair::generate();
        let engine = funded(&keys, 1);
        let stranger = KeyPair::generate();

        let result = TransactionBuilder::new(&stranger, &engine).build("B", 1, 0);
        assert!(result.unwrap_err().contains("No unspent outputs"));
    }
}
