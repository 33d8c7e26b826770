/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the node's
//! [configuration](crate::config::Configuration).
//!
//! The crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages printed
//! onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations), for
//! example with [init_logger].
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ReceivePrepare](crate::events::ReceivePrepareEvent) is printed:
//!
//! ```text
//! ReceivePrepare, 1701329264, Id5u7f6, AAC1kxM, 1, 0, 3
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the voter's public key.
//! - The fourth value is the first seven characters of the Base64 encoding of the block hash.
//! - The fifth and sixth values are the sequence number and the view.
//! - The last value is the number of distinct voters seen so far for that block hash.

use std::{io, thread, time::SystemTime};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log::{LevelFilter, SetLoggerError};

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const INSERT_BLOCK: &str = "InsertBlock";
pub const REJECT_BLOCK: &str = "RejectBlock";
pub const REPLACE_CHAIN: &str = "ReplaceChain";
pub const PERSIST_CHAIN: &str = "PersistChain";

pub const PROPOSE: &str = "Propose";
pub const PREPARE: &str = "Prepare";
pub const COMMIT: &str = "Commit";

pub const RECEIVE_PRE_PREPARE: &str = "ReceivePrePrepare";
pub const RECEIVE_PREPARE: &str = "ReceivePrepare";
pub const RECEIVE_COMMIT: &str = "ReceiveCommit";

pub const COMMIT_BLOCK: &str = "CommitBlock";

/// Install a [fern] logger printing `[thread id][LEVEL] message` lines to stdout.
pub fn init_logger(level: LevelFilter) -> Result<(), SetLoggerError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{:?}][{}] {}",
                thread::current().id(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(io::stdout())
        .apply()
}

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for InsertBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |insert_block_event: &InsertBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {:?}",
                INSERT_BLOCK,
                secs_since_unix_epoch(insert_block_event.timestamp),
                first_seven_base64_chars_of_hex(&insert_block_event.block.hash),
                insert_block_event.block.index,
                insert_block_event.source
            )
        };
        Box::new(logger)
    }
}

impl Logger for RejectBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reject_block_event: &RejectBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {:?}, {}",
                REJECT_BLOCK,
                secs_since_unix_epoch(reject_block_event.timestamp),
                first_seven_base64_chars_of_hex(&reject_block_event.block.hash),
                reject_block_event.block.index,
                reject_block_event.source,
                reject_block_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReplaceChainEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |replace_chain_event: &ReplaceChainEvent| {
            log::info!(
                "{}, {}, {}, {}",
                REPLACE_CHAIN,
                secs_since_unix_epoch(replace_chain_event.timestamp),
                replace_chain_event.new_len,
                first_seven_base64_chars_of_hex(&replace_chain_event.tip.hash)
            )
        };
        Box::new(logger)
    }
}

impl Logger for PersistChainEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |persist_chain_event: &PersistChainEvent| {
            log::info!(
                "{}, {}, {}",
                PERSIST_CHAIN,
                secs_since_unix_epoch(persist_chain_event.timestamp),
                persist_chain_event.len
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(propose_event.timestamp),
                first_seven_base64_chars_of_hex(&propose_event.pre_prepare.block.hash),
                propose_event.pre_prepare.seq,
                propose_event.pre_prepare.view
            )
        };
        Box::new(logger)
    }
}

impl Logger for PrepareEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |prepare_event: &PrepareEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PREPARE,
                secs_since_unix_epoch(prepare_event.timestamp),
                first_seven_base64_chars_of_hex(&prepare_event.prepare.hash),
                prepare_event.prepare.seq,
                prepare_event.prepare.view
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_event: &CommitEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMMIT,
                secs_since_unix_epoch(commit_event.timestamp),
                first_seven_base64_chars_of_hex(&commit_event.commit.hash),
                commit_event.commit.seq,
                commit_event.commit.view
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceivePrePrepareEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_pre_prepare_event: &ReceivePrePrepareEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_PRE_PREPARE,
                secs_since_unix_epoch(receive_pre_prepare_event.timestamp),
                first_seven_base64_chars_of_hex(&receive_pre_prepare_event.pre_prepare.leader),
                first_seven_base64_chars_of_hex(&receive_pre_prepare_event.pre_prepare.block.hash),
                receive_pre_prepare_event.pre_prepare.seq,
                receive_pre_prepare_event.pre_prepare.view
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceivePrepareEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_prepare_event: &ReceivePrepareEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                RECEIVE_PREPARE,
                secs_since_unix_epoch(receive_prepare_event.timestamp),
                first_seven_base64_chars_of_hex(&receive_prepare_event.prepare.voter),
                first_seven_base64_chars_of_hex(&receive_prepare_event.prepare.hash),
                receive_prepare_event.prepare.seq,
                receive_prepare_event.prepare.view,
                receive_prepare_event.votes
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveCommitEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_commit_event: &ReceiveCommitEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                RECEIVE_COMMIT,
                secs_since_unix_epoch(receive_commit_event.timestamp),
                first_seven_base64_chars_of_hex(&receive_commit_event.commit.voter),
                first_seven_base64_chars_of_hex(&receive_commit_event.commit.hash),
                receive_commit_event.commit.seq,
                receive_commit_event.commit.view,
                receive_commit_event.votes
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_block_event: &CommitBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMMIT_BLOCK,
                secs_since_unix_epoch(commit_block_event.timestamp),
                first_seven_base64_chars_of_hex(&commit_block_event.block_hash),
                commit_block_event.sequence,
                commit_block_event.view
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

// Hashes and keys travel as hex; abbreviate the underlying bytes rather than the hex text.
fn first_seven_base64_chars_of_hex(hex_string: &str) -> String {
    match hex::decode(hex_string) {
        Ok(bytes) => first_seven_base64_chars(&bytes),
        Err(_) => first_seven_base64_chars(hex_string.as_bytes()),
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
