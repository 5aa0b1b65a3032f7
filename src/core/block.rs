// Block data structures

use crate::core::{Hash256, hash256, Transaction, Serializable};
use std::io::{Read, Cursor};
use super::serialize::{write_varint, read_count, read_array};

/// Size of the canonical header encoding
pub const HEADER_SIZE: usize = 84;

/// Block header - 84 bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block version
    pub version: u32,
    /// Hash of the previous block
    pub prev_hash: Hash256,
    /// Merkle root of all transactions in the block
    pub merkle_root: Hash256,
    /// Block timestamp (Unix seconds)
    pub timestamp: u64,
    /// Difficulty in leading-zero bits; target = 2^(256 - difficulty)
    pub difficulty: u32,
    /// Nonce for proof-of-work
    pub nonce: u32,
}

impl BlockHeader {
    /// Create a new block header
    pub fn new(
        version: u32,
        prev_hash: Hash256,
        merkle_root: Hash256,
        timestamp: u64,
        difficulty: u32,
        nonce: u32,
    ) -> Self {
        Self {
            version,
            prev_hash,
            merkle_root,
            timestamp,
            difficulty,
            nonce,
        }
    }

    /// Calculate the hash of this block header
    pub fn hash(&self) -> Hash256 {
        hash256(&self.serialize())
    }

    /// Serialize the block header (always 84 bytes)
    pub fn serialize(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.version.to_le_bytes());
        buf[4..36].copy_from_slice(self.prev_hash.as_bytes());
        buf[36..68].copy_from_slice(self.merkle_root.as_bytes());
        buf[68..76].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[76..80].copy_from_slice(&self.difficulty.to_le_bytes());
        buf[80..84].copy_from_slice(&self.nonce.to_le_bytes());
        buf
    }

    /// Read a header from a stream
    pub fn from_reader(reader: &mut dyn Read) -> Result<Self, String> {
        let bytes: [u8; HEADER_SIZE] = read_array(reader)
            .map_err(|e| format!("Block header too short: {}", e))?;
        Ok(Self::from_bytes(&bytes))
    }

    fn from_bytes(b: &[u8; HEADER_SIZE]) -> Self {
        let le_u32 = |at: usize| u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]]);
        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&b[68..76]);
        let mut prev = [0u8; 32];
        prev.copy_from_slice(&b[4..36]);
        let mut merkle = [0u8; 32];
        merkle.copy_from_slice(&b[36..68]);

        Self {
            version: le_u32(0),
            prev_hash: Hash256::new(prev),
            merkle_root: Hash256::new(merkle),
            timestamp: u64::from_le_bytes(timestamp),
            difficulty: le_u32(76),
            nonce: le_u32(80),
        }
    }

    /// Deserialize a block header
    pub fn deserialize(data: &[u8]) -> Result<Self, String> {
        if data.len() != HEADER_SIZE {
            return Err(format!("Block header must be {} bytes, got {}", HEADER_SIZE, data.len()));
        }
        let mut cursor = Cursor::new(data);
        Self::from_reader(&mut cursor)
    }
}

/// Block - contains header and transactions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Block header
    pub header: BlockHeader,
    /// Transactions in this block
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Create a new block
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    /// Create the genesis block: zero prev hash, empty body, zero Merkle root
    pub fn genesis(timestamp: u64, difficulty: u32) -> Self {
        let header = BlockHeader::new(
            1,
            Hash256::zero(),
            Self::calculate_merkle_root(&[]),
            timestamp,
            difficulty,
            0,
        );

        Self {
            header,
            transactions: Vec::new(),
        }
    }

    /// Calculate Merkle root from transactions
    pub fn calculate_merkle_root(transactions: &[Transaction]) -> Hash256 {
        let hashes: Vec<Hash256> = transactions.iter().map(|tx| tx.txid()).collect();
        merkle_root(hashes)
    }

    /// Get the block hash
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// Check if this block has the genesis shape
    pub fn is_genesis(&self) -> bool {
        self.header.prev_hash.is_zero()
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }
}

/// Pairwise Merkle root over an ordered hash list. An odd level duplicates its
/// last element; an empty list yields the zero hash.
pub fn merkle_root(mut hashes: Vec<Hash256>) -> Hash256 {
    if hashes.is_empty() {
        return Hash256::zero();
    }

    while hashes.len() > 1 {
        let mut next_level = Vec::with_capacity(hashes.len().div_ceil(2));

        for chunk in hashes.chunks(2) {
            let left = chunk[0];
            let right = if chunk.len() == 2 { chunk[1] } else { chunk[0] };

            let mut combined = [0u8; 64];
            combined[..32].copy_from_slice(left.as_bytes());
            combined[32..].copy_from_slice(right.as_bytes());
            next_level.push(hash256(&combined));
        }

        hashes = next_level;
    }

    hashes[0]
}

impl Serializable for Block {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.header.serialize());

        let _ = write_varint(&mut buf, self.transactions.len() as u64);
        for tx in &self.transactions {
            buf.extend_from_slice(&tx.serialize());
        }

        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self, String> {
        let mut cursor = Cursor::new(data);

        let header = BlockHeader::from_reader(&mut cursor)?;

        let tx_count = read_count(&mut cursor).map_err(|e| e.to_string())?;
        let mut transactions = Vec::with_capacity(tx_count.min(1024));
        for _ in 0..tx_count {
            transactions.push(Transaction::from_reader(&mut cursor)?);
        }

        if cursor.position() as usize != data.len() {
            return Err("Trailing bytes after block".to_string());
        }

        Ok(Self {
            header,
            transactions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TxInput, TxOutput};

    fn sample_header() -> BlockHeader {
        BlockHeader::new(1, Hash256::new([3; 32]), Hash256::new([4; 32]), 1_700_000_000, 12, 99)
    }

    fn spend(tag: u8) -> Transaction {
        let mut input = TxInput::new(Hash256::new([tag; 32]), 0);
        input.spend_proof = vec![tag];
        Transaction::new(vec![input], vec![TxOutput::new(10, "x")])
    }

    #[test]
    fn test_block_header_serialization() {
        let header = sample_header();
        let serialized = header.serialize();
        assert_eq!(serialized.len(), HEADER_SIZE);

        let deserialized = BlockHeader::deserialize(&serialized).unwrap();
        assert_eq!(header, deserialized);
        assert_eq!(deserialized.hash(), header.hash());
    }

    #[test]
    fn test_header_rejects_wrong_length() {
        assert!(BlockHeader::deserialize(&[0u8; 80]).is_err());
    }

    #[test]
    fn test_nonce_changes_hash() {
        let header = sample_header();
        let mut other = header.clone();
        other.nonce += 1;
        assert_ne!(header.hash(), other.hash());
    }

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis(1_700_000_000, 1);
        assert!(genesis.is_genesis());
        assert!(genesis.transactions.is_empty());
        assert_eq!(genesis.header.merkle_root, Hash256::zero());
        assert_eq!(genesis.hash(), Block::genesis(1_700_000_000, 1).hash());
    }

    #[test]
    fn test_merkle_root_single_tx() {
        let tx = Transaction::coinbase(1, "A", 50);
        let merkle = Block::calculate_merkle_root(std::slice::from_ref(&tx));
        assert_eq!(merkle, tx.txid());
    }

    #[test]
    fn test_merkle_root_odd_count_duplicates_last() {
        let txs = vec![spend(1), spend(2), spend(3)];
        let mut padded = txs.clone();
        padded.push(spend(3));
        assert_eq!(
            Block::calculate_merkle_root(&txs),
            Block::calculate_merkle_root(&padded)
        );
    }

    #[test]
    fn test_merkle_root_order_sensitive() {
        let a = spend(1);
        let b = spend(2);
        assert_ne!(
            Block::calculate_merkle_root(&[a.clone(), b.clone()]),
            Block::calculate_merkle_root(&[b, a])
        );
    }

    #[test]
    fn test_merkle_root_detects_tampering() {
        let txs = vec![spend(1), spend(2), spend(3), spend(4)];
        let root = Block::calculate_merkle_root(&txs);

        let mut tampered = txs.clone();
        tampered[2].inputs[0].spend_proof[0] ^= 0x01;
        assert_ne!(root, Block::calculate_merkle_root(&tampered));

        let mut tampered = txs;
        tampered[3].outputs[0].amount += 1;
        assert_ne!(root, Block::calculate_merkle_root(&tampered));
    }

    #[test]
    fn test_block_serialization() {
        let txs = vec![Transaction::coinbase(5, "A", 50), spend(7)];
        let block = Block::new(sample_header(), txs);
        let bytes = block.serialize();
        assert_eq!(Block::deserialize(&bytes).unwrap(), block);

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(Block::deserialize(&trailing).is_err());
        assert!(Block::deserialize(&bytes[..bytes.len() - 2]).is_err());
    }
}
