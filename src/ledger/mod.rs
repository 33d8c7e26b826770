/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The hash-chained, append-only [Ledger].
//!
//! ## Chain invariant
//!
//! The chain starts at the [genesis block](Block::genesis). For every later position `i`:
//! 1. `chain[i].index == chain[i-1].index + 1`,
//! 2. `chain[i].prev_hash == chain[i-1].hash`, and
//! 3. `chain[i].hash` is the recomputed hash of `chain[i]`'s fields.
//!
//! The ledger is the only owner of the chain and is mutated through exactly two operations:
//! [`add_block`](Ledger::add_block), which appends one block that extends the tip, and
//! [`replace_chain`](Ledger::replace_chain), the longest-valid-chain fork choice rule. Both check the
//! invariant and leave the chain untouched when it would be violated.
//!
//! Duplicate deliveries of the same block (for example, once over a direct connection and once over
//! gossip) are rejected by the contiguity check, which is what makes appends idempotent.
//!
//! ## Concurrency
//!
//! The chain is guarded by a single reader/writer lock. Sealing a new block reads a snapshot of the tip
//! and then searches for a nonce without holding the lock.

pub mod persistence;

use std::{
    fmt,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::types::{Block, Difficulty};

pub use persistence::LedgerError;

pub struct Ledger {
    chain: RwLock<Vec<Block>>,
    difficulty: Difficulty,
}

impl Ledger {
    /// Create a ledger holding only the genesis block.
    pub fn new(difficulty: Difficulty) -> Ledger {
        Ledger {
            chain: RwLock::new(vec![Ledger::create_genesis()]),
            difficulty,
        }
    }

    pub fn create_genesis() -> Block {
        Block::genesis()
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    /// A snapshot of the tip of the chain.
    pub fn latest(&self) -> Block {
        let chain = self.read();
        match chain.last() {
            Some(block) => block.clone(),
            None => Block::genesis(),
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// A copy of the full chain.
    pub fn chain(&self) -> Vec<Block> {
        self.read().clone()
    }

    pub fn block(&self, index: u64) -> Option<Block> {
        let chain = self.read();
        usize::try_from(index)
            .ok()
            .and_then(|position| chain.get(position))
            .cloned()
    }

    /// Build a candidate block extending the current tip and seal it by searching for a nonce whose hash
    /// meets the configured difficulty. The returned block is unsigned and not yet appended.
    pub fn generate_block(&self, data: &str) -> Block {
        let parent = self.latest();
        seal(Block::candidate(&parent, data.to_string()), self.difficulty)
    }

    /// Append `block` if it extends the tip, reporting why it does not otherwise.
    pub fn try_add_block(&self, block: Block) -> Result<(), AppendError> {
        let mut chain = self.write();
        match chain.last() {
            Some(latest) => check_link(latest, &block)?,
            None => check_genesis(&block)?,
        }
        chain.push(block);
        Ok(())
    }

    pub fn add_block(&self, block: Block) -> bool {
        self.try_add_block(block).is_ok()
    }

    /// Substitute `candidate` for the current chain if it is strictly longer and internally valid.
    pub fn replace_chain(&self, candidate: Vec<Block>) -> bool {
        if candidate.len() <= self.len() {
            return false;
        }
        if let Err(err) = validate_chain(&candidate) {
            log::debug!("Rejected candidate chain: {}", err);
            return false;
        }

        let mut chain = self.write();
        // The chain may have grown while the candidate was being validated.
        if candidate.len() <= chain.len() {
            return false;
        }
        *chain = candidate;
        true
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Block>> {
        self.chain.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Block>> {
        self.chain.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Search nonce values, starting after `candidate.nonce`, until the block hash meets `difficulty`.
pub fn seal(candidate: Block, difficulty: Difficulty) -> Block {
    let mut nonce = candidate.nonce;
    loop {
        nonce += 1;
        let hash = Block::hash(
            candidate.index,
            &candidate.timestamp,
            &candidate.data,
            &candidate.prev_hash,
            nonce,
        );
        if difficulty.is_met_by(&hash) {
            return Block {
                nonce,
                hash,
                ..candidate
            };
        }
    }
}

/// Check that `block` directly extends `parent` and that its hash is correct.
pub fn check_link(parent: &Block, block: &Block) -> Result<(), AppendError> {
    if block.index != parent.index + 1 {
        return Err(AppendError::IndexMismatch {
            expected: parent.index + 1,
            found: block.index,
        });
    }
    if block.prev_hash != parent.hash {
        return Err(AppendError::PrevHashMismatch { index: block.index });
    }
    if !block.hash_is_correct() {
        return Err(AppendError::HashMismatch { index: block.index });
    }
    Ok(())
}

fn check_genesis(block: &Block) -> Result<(), AppendError> {
    if block.index != 0 {
        return Err(AppendError::IndexMismatch {
            expected: 0,
            found: block.index,
        });
    }
    if !block.prev_hash.is_empty() {
        return Err(AppendError::PrevHashMismatch { index: 0 });
    }
    if !block.hash_is_correct() {
        return Err(AppendError::HashMismatch { index: 0 });
    }
    Ok(())
}

/// Check the chain invariant over a whole chain, reporting the position of the first offending block.
pub fn validate_chain(chain: &[Block]) -> Result<(), InvalidChain> {
    let Some(genesis) = chain.first() else {
        return Err(InvalidChain::Empty);
    };
    check_genesis(genesis).map_err(|cause| InvalidChain::Link { position: 0, cause })?;
    for (position, pair) in chain.windows(2).enumerate() {
        check_link(&pair[0], &pair[1]).map_err(|cause| InvalidChain::Link {
            position: position + 1,
            cause,
        })?;
    }
    Ok(())
}

/// Why a block cannot be appended after another.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppendError {
    IndexMismatch { expected: u64, found: u64 },
    PrevHashMismatch { index: u64 },
    HashMismatch { index: u64 },
}

impl fmt::Display for AppendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppendError::IndexMismatch { expected, found } => {
                write!(f, "expected block index {}, found {}", expected, found)
            }
            AppendError::PrevHashMismatch { index } => {
                write!(f, "block {} does not link to its parent", index)
            }
            AppendError::HashMismatch { index } => {
                write!(f, "block {} has an incorrect hash", index)
            }
        }
    }
}

impl std::error::Error for AppendError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvalidChain {
    Empty,
    Link { position: usize, cause: AppendError },
}

impl fmt::Display for InvalidChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidChain::Empty => write!(f, "empty chain"),
            InvalidChain::Link { position, cause } => {
                write!(f, "invalid chain at index {}: {}", position, cause)
            }
        }
    }
}
