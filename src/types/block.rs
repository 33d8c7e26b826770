/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definition of the [Block] type, the unit of the hash-chained ledger.
//!
//! A block's hash is the lowercase hex encoding of the SHA-256 digest of its index, timestamp, payload,
//! previous hash and nonce concatenated in that order without separators. Blocks are never mutated
//! after they are hashed: sealing produces a new value and signing only fills in the two signature
//! fields, which are not covered by the hash.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::Digest;

use super::basic::Difficulty;

pub use sha2::Sha256 as CryptoHasher;

/// Timestamp of the genesis block. Fixed so that every node derives the identical genesis block.
pub const GENESIS_TIMESTAMP: &str = "1970-01-01T00:00:00Z";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    #[serde(default)]
    pub pub_key: String,
    #[serde(default)]
    pub signature: String,
    pub index: u64,
    pub timestamp: String,
    pub data: String,
    pub prev_hash: String,
    pub hash: String,
    pub nonce: u64,
}

impl Block {
    /// The index-0 block: empty payload and previous hash, no proof-of-work, unsigned.
    pub fn genesis() -> Block {
        Block::new(0, GENESIS_TIMESTAMP.to_string(), String::new(), String::new(), 0)
    }

    /// Create a block from its hashed fields, computing its hash. The block is unsigned.
    pub fn new(index: u64, timestamp: String, data: String, prev_hash: String, nonce: u64) -> Block {
        let hash = Block::hash(index, &timestamp, &data, &prev_hash, nonce);
        Block {
            pub_key: String::new(),
            signature: String::new(),
            index,
            timestamp,
            data,
            prev_hash,
            hash,
            nonce,
        }
    }

    /// Create an unsealed candidate that extends `parent`, timestamped now.
    pub fn candidate(parent: &Block, data: String) -> Block {
        Block::new(
            parent.index + 1,
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            data,
            parent.hash.clone(),
            0,
        )
    }

    /// Hash the given block fields.
    pub fn hash(index: u64, timestamp: &str, data: &str, prev_hash: &str, nonce: u64) -> String {
        let mut hasher = CryptoHasher::new();
        hasher.update(index.to_string());
        hasher.update(timestamp);
        hasher.update(data);
        hasher.update(prev_hash);
        hasher.update(nonce.to_string());
        hex::encode(hasher.finalize())
    }

    /// Recompute this block's hash from its fields.
    pub fn compute_hash(&self) -> String {
        Block::hash(self.index, &self.timestamp, &self.data, &self.prev_hash, self.nonce)
    }

    pub fn hash_is_correct(&self) -> bool {
        self.compute_hash() == self.hash
    }

    pub fn is_sealed(&self, difficulty: Difficulty) -> bool {
        difficulty.is_met_by(&self.hash)
    }

    /// Whether this block directly extends `parent`.
    pub fn extends(&self, parent: &Block) -> bool {
        self.index == parent.index + 1 && self.prev_hash == parent.hash
    }

    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty() && !self.pub_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_covers_every_hashed_field() {
        let block = Block::new(3, "2024-05-01T10:00:00Z".into(), "pay".into(), "abc".into(), 7);
        assert!(block.hash_is_correct());
        assert_eq!(block.hash.len(), 64);

        let mut altered = block.clone();
        altered.data = "pay!".into();
        assert!(!altered.hash_is_correct());

        let mut altered = block.clone();
        altered.nonce += 1;
        assert!(!altered.hash_is_correct());

        let mut signed = block.clone();
        signed.signature = "ff".into();
        signed.pub_key = "ee".into();
        assert!(signed.hash_is_correct());
    }

    #[test]
    fn hash_concatenates_fields_without_separators() {
        let mut hasher = CryptoHasher::new();
        hasher.update("12024-05-01T10:00:00Zhelloprev42");
        let expected = hex::encode(hasher.finalize());
        assert_eq!(
            Block::hash(1, "2024-05-01T10:00:00Z", "hello", "prev", 42),
            expected
        );
    }

    #[test]
    fn genesis_is_deterministic() {
        let genesis = Block::genesis();
        assert_eq!(genesis, Block::genesis());
        assert_eq!(genesis.index, 0);
        assert!(genesis.prev_hash.is_empty());
        assert!(genesis.data.is_empty());
        assert!(!genesis.is_signed());
    }

    #[test]
    fn block_json_uses_wire_field_names() {
        let json = serde_json::to_value(Block::genesis()).unwrap();
        for field in ["pub_key", "signature", "index", "timestamp", "data", "prev_hash", "hash", "nonce"] {
            assert!(json.get(field).is_some(), "missing {}", field);
        }
    }
}
