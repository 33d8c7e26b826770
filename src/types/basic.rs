/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! "Inert" types that are sent around and inspected, but have no active behavior.
//!
//! These types follow the newtype pattern and the API for using them is defined in this module.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display, Formatter},
    ops::{Add, AddAssign},
};

/// Logical epoch of the agreement protocol. View-change is not implemented, so a node stays in the
/// view it was configured with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewNumber(u64);

impl ViewNumber {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn init() -> Self {
        Self(0)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for ViewNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Monotonic identifier of one proposal/agreement instance. The first proposal gets sequence number 1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn init() -> Self {
        Self(1)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for SequenceNumber {
    type Output = SequenceNumber;
    fn add(self, rhs: u64) -> Self::Output {
        SequenceNumber::new(self.0 + rhs)
    }
}

impl AddAssign<u64> for SequenceNumber {
    fn add_assign(&mut self, rhs: u64) {
        self.0.add_assign(rhs)
    }
}

/// Number of leading `'0'` hex characters a sealed block hash must start with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Difficulty(usize);

impl Difficulty {
    pub const fn new(int: usize) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> usize {
        self.0
    }

    /// Check whether a hex-encoded hash carries the required zero prefix.
    pub fn is_met_by(&self, hash: &str) -> bool {
        hash.len() >= self.0 && hash.bytes().take(self.0).all(|b| b == b'0')
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Self(2)
    }
}

/// The number of distinct voters required to certify a decision among `n` validators: `⌊2n/3⌋ + 1`.
pub fn quorum_size(n: usize) -> usize {
    (n * 2) / 3 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_of_four_is_three() {
        assert_eq!(quorum_size(4), 3);
        assert_eq!(quorum_size(3), 3);
        assert_eq!(quorum_size(7), 5);
        assert_eq!(quorum_size(0), 1);
    }

    #[test]
    fn difficulty_checks_zero_prefix() {
        let difficulty = Difficulty::new(2);
        assert!(difficulty.is_met_by("00ab"));
        assert!(!difficulty.is_met_by("0a0b"));
        assert!(!difficulty.is_met_by("0"));
        assert!(Difficulty::new(0).is_met_by("ff"));
    }
}
