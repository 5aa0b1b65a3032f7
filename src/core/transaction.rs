// Transaction data structures (UTXO model)

use crate::core::{Hash256, hash256, Serializable};
use std::io::{Read, Cursor};
use super::serialize::{write_varint, read_count, write_var_bytes, read_var_bytes, read_array};

/// Domain tag prepended to the signing message so a spend proof can never be
/// replayed as a signature over a txid or a header.
const SIGHASH_TAG: &[u8] = b"talant-chain/spend/v1";

/// Index used by the coinbase input (it references no real output)
pub const COINBASE_INDEX: u32 = u32::MAX;

/// Transaction input - references a previous transaction output
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TxInput {
    /// Hash of the transaction that created the output
    pub prev_tx_hash: Hash256,
    /// Index of the output in that transaction
    pub output_index: u32,
    /// Opaque ownership proof, checked by the pluggable verifier.
    /// For a coinbase it carries the block height instead.
    #[serde(with = "hex::serde")]
    pub spend_proof: Vec<u8>,
}

impl TxInput {
    /// Create an unsigned input
    pub fn new(prev_tx_hash: Hash256, output_index: u32) -> Self {
        Self {
            prev_tx_hash,
            output_index,
            spend_proof: Vec::new(),
        }
    }

    /// Create a coinbase input for the block at `height`
    pub fn coinbase(height: u64) -> Self {
        Self {
            prev_tx_hash: Hash256::zero(),
            output_index: COINBASE_INDEX,
            spend_proof: height.to_le_bytes().to_vec(),
        }
    }

    /// Check if this input references the zero hash
    pub fn is_coinbase(&self) -> bool {
        self.prev_tx_hash.is_zero()
    }

    fn write_to(&self, buf: &mut Vec<u8>, include_proof: bool) {
        buf.extend_from_slice(self.prev_tx_hash.as_bytes());
        buf.extend_from_slice(&self.output_index.to_le_bytes());
        if include_proof {
            // Writing into a Vec cannot fail
            let _ = write_var_bytes(buf, &self.spend_proof);
        }
    }

    /// Deserialize the input
    pub fn deserialize(reader: &mut dyn Read) -> Result<Self, String> {
        let prev_tx_hash = Hash256::new(read_array(reader).map_err(|e| e.to_string())?);
        let output_index = u32::from_le_bytes(read_array(reader).map_err(|e| e.to_string())?);
        let spend_proof = read_var_bytes(reader).map_err(|e| e.to_string())?;

        Ok(Self {
            prev_tx_hash,
            output_index,
            spend_proof,
        })
    }
}

/// Transaction output - amount and recipient commitment
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TxOutput {
    /// Amount in base units
    pub amount: u64,
    /// Recipient commitment (the address string bytes)
    #[serde(with = "hex::serde")]
    pub recipient: Vec<u8>,
}

impl TxOutput {
    /// Create a new transaction output
    pub fn new(amount: u64, recipient: impl Into<Vec<u8>>) -> Self {
        Self {
            amount,
            recipient: recipient.into(),
        }
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.amount.to_le_bytes());
        let _ = write_var_bytes(buf, &self.recipient);
    }

    /// Deserialize the output
    pub fn deserialize(reader: &mut dyn Read) -> Result<Self, String> {
        let amount = u64::from_le_bytes(read_array(reader).map_err(|e| e.to_string())?);
        let recipient = read_var_bytes(reader).map_err(|e| e.to_string())?;

        Ok(Self {
            amount,
            recipient,
        })
    }
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Transaction {
    /// Transaction version
    pub version: u32,
    /// Transaction inputs
    pub inputs: Vec<TxInput>,
    /// Transaction outputs
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Create a new transaction
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self {
            version: 1,
            inputs,
            outputs,
        }
    }

    /// Create a coinbase transaction paying `amount` to `recipient`
    pub fn coinbase(height: u64, recipient: impl Into<Vec<u8>>, amount: u64) -> Self {
        Self {
            version: 1,
            inputs: vec![TxInput::coinbase(height)],
            outputs: vec![TxOutput::new(amount, recipient)],
        }
    }

    /// Exactly one input, referencing the zero hash
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// Height embedded in a coinbase input, if any
    pub fn coinbase_height(&self) -> Option<u64> {
        if !self.is_coinbase() {
            return None;
        }
        let proof = &self.inputs[0].spend_proof;
        let bytes: [u8; 8] = proof.get(..8)?.try_into().ok()?;
        Some(u64::from_le_bytes(bytes))
    }

    /// Transaction ID: hash of the full canonical encoding, proofs included
    pub fn txid(&self) -> Hash256 {
        hash256(&self.encode(true))
    }

    /// Message the spend proofs sign. Excludes every proof field, so adding
    /// proofs does not change what was signed.
    pub fn signing_message(&self) -> Hash256 {
        let mut buf = SIGHASH_TAG.to_vec();
        buf.extend_from_slice(&self.encode(false));
        hash256(&buf)
    }

    /// Sum of outputs, `None` on overflow
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.amount))
    }

    fn encode(&self, include_proofs: bool) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.version.to_le_bytes());

        let _ = write_varint(&mut buf, self.inputs.len() as u64);
        for input in &self.inputs {
            input.write_to(&mut buf, include_proofs);
        }

        let _ = write_varint(&mut buf, self.outputs.len() as u64);
        for output in &self.outputs {
            output.write_to(&mut buf);
        }

        buf
    }

    /// Deserialize from a reader (used when decoding a block body)
    pub fn from_reader(reader: &mut dyn Read) -> Result<Self, String> {
        let version = u32::from_le_bytes(read_array(reader).map_err(|e| e.to_string())?);

        let input_count = read_count(reader).map_err(|e| e.to_string())?;
        let mut inputs = Vec::with_capacity(input_count.min(1024));
        for _ in 0..input_count {
            inputs.push(TxInput::deserialize(reader)?);
        }

        let output_count = read_count(reader).map_err(|e| e.to_string())?;
        let mut outputs = Vec::with_capacity(output_count.min(1024));
        for _ in 0..output_count {
            outputs.push(TxOutput::deserialize(reader)?);
        }

        Ok(Self {
            version,
            inputs,
            outputs,
        })
    }
}

impl Serializable for Transaction {
    fn serialize(&self) -> Vec<u8> {
        self.encode(true)
    }

    fn deserialize(data: &[u8]) -> Result<Self, String> {
        let mut cursor = Cursor::new(data);
        let tx = Self::from_reader(&mut cursor)?;
        if cursor.position() as usize != data.len() {
            return Err(format!(
                "Trailing bytes after transaction: {}",
                data.len() - cursor.position() as usize
            ));
        }
        Ok(tx)
    }
}

/// Raw hex for text interfaces
impl Transaction {
    pub fn to_hex(&self) -> String {
        hex::encode(self.serialize())
    }
}
