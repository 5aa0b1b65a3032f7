// Block storage using sled

use crate::core::{Block, Hash256, Serializable};
use crate::storage::{BlockStore, ChainTip};
use sled::Db;
use std::path::Path;

/// Append-only block database.
///
/// Layout: `b<hash>` -> block bytes, `h<height BE>` -> hash, `tip` ->
/// height BE ++ hash. Each append writes all three keys in one batch, so a
/// crash leaves either the old tip or the new one.
pub struct ChainStore {
    db: Db,
}

impl ChainStore {
    /// Open (or create) a block database at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let db = sled::open(path).map_err(|e| format!("Failed to open database: {}", e))?;
        Ok(Self { db })
    }

    /// Create an in-memory database (for testing)
    pub fn memory() -> Result<Self, String> {
        let config = sled::Config::new().temporary(true);
        let db = config.open().map_err(|e| format!("Failed to create memory db: {}", e))?;
        Ok(Self { db })
    }

    /// Get a block by hash
    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, String> {
        match self.db.get(Self::block_key(hash)).map_err(|e| format!("Database error: {}", e))? {
            Some(data) => Ok(Some(Block::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    /// Get block hash by height
    pub fn get_hash_by_height(&self, height: u64) -> Result<Option<Hash256>, String> {
        match self.db.get(Self::height_key(height)).map_err(|e| format!("Database error: {}", e))? {
            Some(data) => Ok(Some(Hash256::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    // Helper: create key for block storage
    fn block_key(hash: &Hash256) -> Vec<u8> {
        let mut key = Vec::with_capacity(33);
        key.push(b'b'); // 'b' for block
        key.extend_from_slice(hash.as_bytes());
        key
    }

    // Helper: create key for height index (big-endian keeps keys ordered)
    fn height_key(height: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(9);
        key.push(b'h'); // 'h' for height
        key.extend_from_slice(&height.to_be_bytes());
        key
    }

    fn decode_tip(data: &[u8]) -> Result<ChainTip, String> {
        if data.len() != 40 {
            return Err(format!("Invalid tip record length: {}", data.len()));
        }
        let mut height = [0u8; 8];
        height.copy_from_slice(&data[..8]);
        Ok(ChainTip {
            height: u64::from_be_bytes(height),
            hash: Hash256::from_slice(&data[8..])?,
        })
    }
}

impl BlockStore for ChainStore {
    fn append(&self, block: &Block) -> Result<ChainTip, String> {
        let hash = block.hash();
        let height = match self.read_tip()? {
            Some(tip) if tip.hash == block.header.prev_hash => tip.height + 1,
            Some(tip) => {
                return Err(format!(
                    "Block {} does not extend stored tip {}",
                    hash, tip.hash
                ))
            }
            None if block.is_genesis() => 0,
            None => return Err("First stored block must be genesis".to_string()),
        };

        let mut tip_record = Vec::with_capacity(40);
        tip_record.extend_from_slice(&height.to_be_bytes());
        tip_record.extend_from_slice(hash.as_bytes());

        let mut batch = sled::Batch::default();
        batch.insert(Self::block_key(&hash), block.serialize());
        batch.insert(Self::height_key(height), hash.as_bytes().to_vec());
        batch.insert(b"tip".to_vec(), tip_record);

        self.db
            .apply_batch(batch)
            .map_err(|e| format!("Failed to store block: {}", e))?;
        self.db
            .flush()
            .map_err(|e| format!("Failed to flush: {}", e))?;

        Ok(ChainTip { hash, height })
    }

    fn read_range(&self, start: u64, end: u64) -> Result<Vec<Block>, String> {
        let mut blocks = Vec::new();
        for height in start..end {
            let hash = match self.get_hash_by_height(height)? {
                Some(hash) => hash,
                None => break,
            };
            let block = self
                .get_block(&hash)?
                .ok_or_else(|| format!("Height {} indexes missing block {}", height, hash))?;
            blocks.push(block);
        }
        Ok(blocks)
    }

    fn read_tip(&self) -> Result<Option<ChainTip>, String> {
        match self.db.get(b"tip").map_err(|e| format!("Database error: {}", e))? {
            Some(data) => Ok(Some(Self::decode_tip(&data)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BlockHeader, Transaction};

    fn child_of(parent: &Block, height: u64) -> Block {
        let txs = vec![Transaction::coinbase(height, "A", 50)];
        let header = BlockHeader::new(
            1,
            parent.hash(),
            Block::calculate_merkle_root(&txs),
            parent.header.timestamp + 60,
            1,
            0,
        );
        Block::new(header, txs)
    }

    #[test]
    fn test_append_and_read() {
        let db = ChainStore::memory().unwrap();
        assert_eq!(db.read_tip().unwrap(), None);

        let genesis = Block::genesis(1_700_000_000, 1);
        let tip = db.append(&genesis).unwrap();
        assert_eq!(tip, ChainTip { hash: genesis.hash(), height: 0 });

        let b1 = child_of(&genesis, 1);
        let tip = db.append(&b1).unwrap();
        assert_eq!(tip.height, 1);
        assert_eq!(db.read_tip().unwrap(), Some(tip));

        let blocks = db.read_range(0, 10).unwrap();
        assert_eq!(blocks, vec![genesis.clone(), b1.clone()]);
        assert_eq!(db.read_range(1, 2).unwrap(), vec![b1.clone()]);
        assert_eq!(db.get_block(&b1.hash()).unwrap(), Some(b1));
    }

    #[test]
    fn test_append_rejects_non_extending_block() {
        let db = ChainStore::memory().unwrap();
        let genesis = Block::genesis(1_700_000_000, 1);
        let orphan = child_of(&Block::genesis(5, 1), 1);

        assert!(db.append(&orphan).is_err());
        db.append(&genesis).unwrap();
        assert!(db.append(&orphan).is_err());
        assert!(db.append(&genesis).is_err());
        assert_eq!(db.read_tip().unwrap().unwrap().height, 0);
    }

    #[test]
    fn test_reopen_recovers_tip() {
        let dir = std::env::temp_dir().join(format!("talant-chain-store-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let genesis = Block::genesis(1_700_000_000, 1);
        let b1 = child_of(&genesis, 1);
        {
            let db = ChainStore::new(&dir).unwrap();
            db.append(&genesis).unwrap();
            db.append(&b1).unwrap();
        }
        let db = ChainStore::new(&dir).unwrap();
        assert_eq!(db.read_tip().unwrap(), Some(ChainTip { hash: b1.hash(), height: 1 }));
        drop(db);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
