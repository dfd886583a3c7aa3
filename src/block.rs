//! Immutable ledger entries

use crate::crypto::hash_fields_hex;
use crate::types::{BlockHash, MagicNumber};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single block in the chain.
///
/// The hash is computed once, at construction, over index, previous hash,
/// timestamp, data and miner. Fields are read-only after that; a block
/// received from a peer keeps the hash it was sent with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    index: u64,
    previous_hash: BlockHash,
    timestamp: DateTime<Utc>,
    data: MagicNumber,
    mined_by: String,
    hash: BlockHash,
}

impl Block {
    /// Create a block stamped with the current time
    pub fn new(
        index: u64,
        previous_hash: BlockHash,
        data: MagicNumber,
        mined_by: impl Into<String>,
    ) -> Self {
        Self::with_timestamp(index, previous_hash, Utc::now(), data, mined_by)
    }

    /// Create a block with an explicit timestamp
    pub fn with_timestamp(
        index: u64,
        previous_hash: BlockHash,
        timestamp: DateTime<Utc>,
        data: MagicNumber,
        mined_by: impl Into<String>,
    ) -> Self {
        let mined_by = mined_by.into();
        let hash = Self::calculate_hash(index, &previous_hash, &timestamp, data, &mined_by);
        Self {
            index,
            previous_hash,
            timestamp,
            data,
            mined_by,
            hash,
        }
    }

    /// Create the genesis block for the given target
    pub fn genesis(data: MagicNumber, mined_by: impl Into<String>) -> Self {
        Self::new(0, BlockHash::genesis_sentinel(), data, mined_by)
    }

    /// Create the block that would follow `self`, if its index has room
    pub fn successor(&self, data: MagicNumber, mined_by: impl Into<String>) -> Option<Self> {
        let index = self.index.checked_add(1)?;
        Some(Self::new(index, self.hash.clone(), data, mined_by))
    }

    /// Digest over all content fields
    pub fn calculate_hash(
        index: u64,
        previous_hash: &BlockHash,
        timestamp: &DateTime<Utc>,
        data: MagicNumber,
        mined_by: &str,
    ) -> BlockHash {
        let index = index.to_string();
        let timestamp = timestamp.to_rfc3339();
        let data = data.to_string();
        BlockHash(hash_fields_hex(&[
            index.as_bytes(),
            previous_hash.as_str().as_bytes(),
            timestamp.as_bytes(),
            data.as_bytes(),
            mined_by.as_bytes(),
        ]))
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn previous_hash(&self) -> &BlockHash {
        &self.previous_hash
    }

    pub fn data(&self) -> MagicNumber {
        self.data
    }

    pub fn mined_by(&self) -> &str {
        &self.mined_by
    }

    pub fn hash(&self) -> &BlockHash {
        &self.hash
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ index: {}, previous hash: {}, timestamp: {}, data: {}, hash: {}, mined by: {} }}",
            self.index,
            self.previous_hash,
            self.timestamp.to_rfc3339(),
            self.data,
            self.hash,
            self.mined_by
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_hash_is_deterministic() {
        let a = Block::with_timestamp(0, BlockHash::genesis_sentinel(), fixed_time(), 7, "n:1");
        let b = Block::with_timestamp(0, BlockHash::genesis_sentinel(), fixed_time(), 7, "n:1");
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_covers_every_field() {
        let base = Block::with_timestamp(0, BlockHash::genesis_sentinel(), fixed_time(), 7, "n:1");
        let variants = [
            Block::with_timestamp(1, BlockHash::genesis_sentinel(), fixed_time(), 7, "n:1"),
            Block::with_timestamp(0, BlockHash("ab".into()), fixed_time(), 7, "n:1"),
            Block::with_timestamp(
                0,
                BlockHash::genesis_sentinel(),
                fixed_time() + chrono::Duration::seconds(1),
                7,
                "n:1",
            ),
            Block::with_timestamp(0, BlockHash::genesis_sentinel(), fixed_time(), 8, "n:1"),
            Block::with_timestamp(0, BlockHash::genesis_sentinel(), fixed_time(), 7, "n:2"),
        ];
        for v in &variants {
            assert_ne!(v.hash(), base.hash());
        }
    }

    #[test]
    fn test_successor_links_to_parent() {
        let genesis = Block::genesis(3, "n:1");
        let next = genesis.successor(3, "n:2").unwrap();
        assert_eq!(genesis.index(), 0);
        assert!(genesis.previous_hash().is_genesis_sentinel());
        assert_eq!(next.index(), 1);
        assert_eq!(next.previous_hash(), genesis.hash());
        assert_eq!(next.mined_by(), "n:2");
    }

    #[test]
    fn test_last_index_has_no_successor() {
        let last = Block::new(u64::MAX, BlockHash("ff".into()), 3, "n:1");
        assert!(last.successor(3, "n:1").is_none());
    }

    #[test]
    fn test_serialized_block_keeps_its_hash() {
        let block = Block::genesis(5, "n:1");
        let bytes = bincode::serialize(&block).unwrap();
        let decoded: Block = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, block);
    }
}
