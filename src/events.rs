/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of events for event handling and logging.
//!
//! Note: an event for a given action indicates that the action has been completed.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::agreement::messages::{CommitMsg, PrePrepare, PrepareMsg};
use crate::pipeline::BlockSource;
use crate::types::{Block, SequenceNumber, ViewNumber};

pub enum Event {
    // Events that change the chain.
    InsertBlock(InsertBlockEvent),
    RejectBlock(RejectBlockEvent),
    ReplaceChain(ReplaceChainEvent),
    PersistChain(PersistChainEvent),
    // Events that involve broadcasting an agreement message.
    Propose(ProposeEvent),
    Prepare(PrepareEvent),
    Commit(CommitEvent),
    // Events that involve receiving an agreement message.
    ReceivePrePrepare(ReceivePrePrepareEvent),
    ReceivePrepare(ReceivePrepareEvent),
    ReceiveCommit(ReceiveCommitEvent),
    // Finality.
    CommitBlock(CommitBlockEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            // The event bus only goes away during shutdown, when events are no longer of interest.
            let _ = event_publisher.send(event);
        }
    }
}

pub struct InsertBlockEvent {
    pub timestamp: SystemTime,
    pub block: Block,
    pub source: BlockSource,
}

pub struct RejectBlockEvent {
    pub timestamp: SystemTime,
    pub block: Block,
    pub source: BlockSource,
    pub reason: String,
}

pub struct ReplaceChainEvent {
    pub timestamp: SystemTime,
    pub new_len: usize,
    pub tip: Block,
}

pub struct PersistChainEvent {
    pub timestamp: SystemTime,
    pub len: usize,
}

pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub pre_prepare: PrePrepare,
}

pub struct PrepareEvent {
    pub timestamp: SystemTime,
    pub prepare: PrepareMsg,
}

pub struct CommitEvent {
    pub timestamp: SystemTime,
    pub commit: CommitMsg,
}

pub struct ReceivePrePrepareEvent {
    pub timestamp: SystemTime,
    pub pre_prepare: PrePrepare,
}

pub struct ReceivePrepareEvent {
    pub timestamp: SystemTime,
    pub prepare: PrepareMsg,
    /// Distinct voters for the same view and block hash after this vote was recorded.
    pub votes: usize,
}

pub struct ReceiveCommitEvent {
    pub timestamp: SystemTime,
    pub commit: CommitMsg,
    pub votes: usize,
}

pub struct CommitBlockEvent {
    pub timestamp: SystemTime,
    pub view: ViewNumber,
    pub sequence: SequenceNumber,
    pub block_hash: String,
}
