/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Boundaries to the external processes the node depends on.
//!
//! There are three collaborators:
//! 1. The **execution engine**, reached through the [ExecutionEngine] trait. [BridgeClient] speaks its
//!    single-request-per-connection JSON protocol.
//! 2. The **observer sink**, which receives every appended block ([ObserverSink]).
//! 3. The **relay**, which forwards opaque JSON payloads to another runtime ([Relay]).
//!
//! Fire-and-forget notifications to these collaborators go through the [Notifier] trait, so that tests
//! can substitute a recording stub for the real network calls. None of these calls may stall or crash
//! the node: every one of them is bounded by a timeout and its failure is only logged, or leads the
//! caller to seal blocks locally.

pub mod client;

pub mod http;

pub mod notifier;

use std::fmt;

use crate::types::Block;

pub use client::BridgeClient;
pub use http::{ObserverSink, Relay};
pub use notifier::NetworkNotifier;

/// The external deterministic execution engine.
pub trait ExecutionEngine: Send + Sync {
    /// Ask the engine to build a block executing the transaction `data`.
    fn submit_tx(&self, data: &str) -> Result<Block, BridgeError>;

    /// Fetch the engine's view of the chain.
    fn get_chain(&self) -> Result<Vec<Block>, BridgeError>;

    /// Tell the engine that the block with hash `block_hash` is final. No response is expected.
    fn commit_block(&self, block_hash: &str) -> Result<(), BridgeError>;
}

/// Outbound notifications that the node does not wait for.
pub trait Notifier: Send + Sync {
    /// A block was appended to the local chain.
    fn block_added(&self, block: &Block);

    /// The block with hash `block_hash` reached quorum finality.
    fn block_committed(&self, block_hash: &str);
}

#[derive(Debug)]
pub enum BridgeError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    /// The engine answered but refused the request.
    Rejected(String),
    /// The engine reported success without including a block.
    MissingBlock,
    /// An HTTP request could not be completed.
    Request(reqwest::Error),
    /// An HTTP collaborator answered with a non-success status code.
    Http(u16),
    /// No address is configured for the collaborator.
    Unconfigured,
}

impl From<std::io::Error> for BridgeError {
    fn from(value: std::io::Error) -> Self {
        BridgeError::Io(value)
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(value: reqwest::Error) -> Self {
        match value.status() {
            Some(status) => BridgeError::Http(status.as_u16()),
            None => BridgeError::Request(value),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(value: serde_json::Error) -> Self {
        BridgeError::Serialization(value)
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Io(err) => write!(f, "bridge I/O failed: {}", err),
            BridgeError::Serialization(err) => write!(f, "bridge message malformed: {}", err),
            BridgeError::Rejected(reason) => write!(f, "request rejected: {}", reason),
            BridgeError::MissingBlock => write!(f, "response carried no block"),
            BridgeError::Request(err) => write!(f, "HTTP request failed: {}", err),
            BridgeError::Http(status) => write!(f, "HTTP status {}", status),
            BridgeError::Unconfigured => write!(f, "collaborator not configured"),
        }
    }
}

impl std::error::Error for BridgeError {}
