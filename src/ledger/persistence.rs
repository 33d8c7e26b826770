/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Saving and loading the chain as an indented JSON array of blocks.
//!
//! Saving writes the whole chain to `<path>.tmp` and then renames it over `<path>`, so a crash during the
//! write leaves the previous file intact. Loading re-validates every link and refuses the whole file on
//! the first violation rather than keeping the valid prefix.

use std::{ffi::OsString, fmt, fs, path::{Path, PathBuf}};

use crate::types::Block;

use super::{validate_chain, InvalidChain, Ledger};

impl Ledger {
    /// Persist the current chain to `path` via a temporary file and an atomic rename.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), LedgerError> {
        let path = path.as_ref();
        let snapshot = self.chain();
        let bytes = serde_json::to_vec_pretty(&snapshot)?;

        let tmp = temporary_path(path);
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Replace the in-memory chain with the one stored at `path`, returning its length. The in-memory
    /// chain is left untouched if the file cannot be read or fails validation.
    pub fn load_from_file(&self, path: impl AsRef<Path>) -> Result<usize, LedgerError> {
        let bytes = fs::read(path)?;
        let chain: Vec<Block> = serde_json::from_slice(&bytes)?;
        validate_chain(&chain).map_err(|err| match err {
            InvalidChain::Empty => LedgerError::EmptyChain,
            InvalidChain::Link { position, .. } => LedgerError::InvalidLink {
                index: position as u64,
            },
        })?;

        let len = chain.len();
        *self.write() = chain;
        Ok(len)
    }
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut tmp = OsString::from(path.as_os_str());
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[derive(Debug)]
pub enum LedgerError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    EmptyChain,
    InvalidLink { index: u64 },
}

impl From<std::io::Error> for LedgerError {
    fn from(value: std::io::Error) -> Self {
        LedgerError::Io(value)
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(value: serde_json::Error) -> Self {
        LedgerError::Serialization(value)
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::Io(err) => write!(f, "chain file I/O failed: {}", err),
            LedgerError::Serialization(err) => write!(f, "chain file is malformed: {}", err),
            LedgerError::EmptyChain => write!(f, "empty chain"),
            LedgerError::InvalidLink { index } => write!(f, "invalid chain at index {}", index),
        }
    }
}

impl std::error::Error for LedgerError {}
