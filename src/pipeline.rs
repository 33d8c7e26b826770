/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [BlockPipeline]: the path every transaction and every incoming block takes into the ledger.
//!
//! Both the [transport](crate::networking) and the [gossip subscribers](crate::gossip) hand their
//! messages to the same pipeline, so the two propagation paths validate and append identically.
//!
//! ## Transactions
//!
//! 1. Ask the [execution engine](crate::bridge::ExecutionEngine) to build a block; if it is not
//!    configured or the call fails, seal a block locally with [Ledger::generate_block].
//! 2. Sign the block if a local key is configured.
//! 3. Append it. On success, broadcast it to every known peer, publish it on the overlay, notify the
//!    observer and, if a [BlockProposer] is attached, offer it for agreement.
//!
//! ## Incoming blocks
//!
//! Blocks from other nodes must carry a valid signature before they are offered to the ledger. A block
//! the chain already holds is reported as a [duplicate](BlockReceipt::Duplicate) so that the second
//! delivery of a block is a no-op rather than a reason to resynchronize.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::Sender,
        Arc,
    },
    thread,
    time::{Duration, SystemTime},
};

use typed_builder::TypedBuilder;

use crate::{
    agreement::BlockProposer,
    bridge::{ExecutionEngine, NetworkNotifier, Notifier},
    events::{Event, InsertBlockEvent, RejectBlockEvent, ReplaceChainEvent},
    gossip::{Gossip, Topic},
    identity::{sign_block, verify_block, Identity},
    ledger::{AppendError, Ledger},
    networking::{client, PeerSet, WireMessage},
    types::Block,
};

pub const DEFAULT_BROADCAST_TIMEOUT: Duration = Duration::from_secs(2);

/// Where a block entering the ledger came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockSource {
    /// Sealed by this node.
    Local,
    /// Built by the execution engine for this node.
    Engine,
    /// Received over a direct transport connection.
    Transport,
    /// Received over the gossip overlay.
    Gossip,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockReceipt {
    Added,
    /// The chain already holds this block.
    Duplicate,
    Rejected(Rejection),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    MissingSignature,
    InvalidSignature,
    Append(AppendError),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MissingSignature => write!(f, "missing signature"),
            Rejection::InvalidSignature => write!(f, "invalid signature"),
            Rejection::Append(err) => write!(f, "{}", err),
        }
    }
}

#[derive(TypedBuilder)]
pub struct BlockPipeline {
    ledger: Arc<Ledger>,
    peers: Arc<PeerSet>,
    identity: Arc<dyn Identity>,
    #[builder(default)]
    engine: Option<Arc<dyn ExecutionEngine>>,
    #[builder(default = Arc::new(NetworkNotifier::default()) as Arc<dyn Notifier>)]
    notifier: Arc<dyn Notifier>,
    #[builder(default)]
    gossip: Option<Arc<dyn Gossip>>,
    #[builder(default)]
    proposer: Option<Arc<dyn BlockProposer>>,
    #[builder(default = DEFAULT_BROADCAST_TIMEOUT)]
    broadcast_timeout: Duration,
    #[builder(default)]
    event_publisher: Option<Sender<Event>>,
    #[builder(default, setter(skip))]
    resyncing: AtomicBool,
}

impl BlockPipeline {
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.peers
    }

    /// Turn a transaction into an appended block, returning the block if it was appended.
    pub fn submit_transaction(&self, data: &str) -> Option<Block> {
        let (mut block, source) = match &self.engine {
            Some(engine) => match engine.submit_tx(data) {
                Ok(block) => (block, BlockSource::Engine),
                Err(err) => {
                    log::warn!("Execution engine unavailable ({}), sealing locally", err);
                    (self.ledger.generate_block(data), BlockSource::Local)
                }
            },
            None => (self.ledger.generate_block(data), BlockSource::Local),
        };
        sign_block(self.identity.as_ref(), &mut block);

        match self.ledger.try_add_block(block.clone()) {
            Ok(()) => {
                self.on_appended(&block, source);
                if let Some(proposer) = &self.proposer {
                    proposer.offer(&block);
                }
                Some(block)
            }
            Err(err) => {
                // Another block took the tip while this one was being built.
                self.on_rejected(&block, source, &Rejection::Append(err));
                None
            }
        }
    }

    /// Validate and append a block received from another node.
    pub fn receive_block(&self, block: Block, source: BlockSource) -> BlockReceipt {
        if !block.is_signed() {
            return self.reject(block, source, Rejection::MissingSignature);
        }
        if !verify_block(self.identity.as_ref(), &block) {
            return self.reject(block, source, Rejection::InvalidSignature);
        }

        match self.ledger.try_add_block(block.clone()) {
            Ok(()) => {
                self.on_appended(&block, source);
                BlockReceipt::Added
            }
            Err(_) if self.is_duplicate(&block) => BlockReceipt::Duplicate,
            Err(err) => self.reject(block, source, Rejection::Append(err)),
        }
    }

    /// Offer `chain` to the ledger's fork choice rule.
    pub fn adopt_chain(&self, chain: Vec<Block>, source: BlockSource) -> bool {
        let replaced = self.ledger.replace_chain(chain);
        if replaced {
            let tip = self.ledger.latest();
            log::info!("Adopted chain of length {} from {:?}", tip.index + 1, source);
            Event::publish(
                &self.event_publisher,
                Event::ReplaceChain(ReplaceChainEvent {
                    timestamp: SystemTime::now(),
                    new_len: self.ledger.len(),
                    tip,
                }),
            );
        }
        replaced
    }

    /// Fetch the chain of a random known peer on a background thread and offer it to the ledger.
    pub fn resync(self: &Arc<Self>) {
        if let Some(peer) = self.peers.random_peer() {
            self.resync_from(peer);
        }
    }

    /// Fetch the chain of `peer` on a background thread and offer it to the ledger. At most one fetch
    /// runs at a time.
    pub fn resync_from(self: &Arc<Self>, peer: String) {
        if peer == self.peers.local_addr() {
            return;
        }
        if self.resyncing.swap(true, Ordering::AcqRel) {
            return;
        }
        let pipeline = self.clone();
        thread::spawn(move || {
            match client::fetch_chain(&peer, pipeline.peers.local_addr(), pipeline.broadcast_timeout) {
                Ok(chain) => {
                    pipeline.adopt_chain(chain, BlockSource::Transport);
                }
                Err(err) => log::debug!("Could not fetch chain from {}: {}", peer, err),
            }
            pipeline.resyncing.store(false, Ordering::Release);
        });
    }

    fn is_duplicate(&self, block: &Block) -> bool {
        self.ledger
            .block(block.index)
            .map_or(false, |existing| existing.hash == block.hash)
    }

    fn on_appended(&self, block: &Block, source: BlockSource) {
        Event::publish(
            &self.event_publisher,
            Event::InsertBlock(InsertBlockEvent {
                timestamp: SystemTime::now(),
                block: block.clone(),
                source,
            }),
        );

        client::broadcast(
            self.peers.list(),
            WireMessage::Block(block.clone()),
            self.peers.local_addr(),
            self.broadcast_timeout,
        );
        if let Some(gossip) = &self.gossip {
            match serde_json::to_vec(block) {
                Ok(data) => gossip.publish(Topic::Blocks, data),
                Err(err) => log::warn!("Could not encode block {} for gossip: {}", block.index, err),
            }
        }
        self.notifier.block_added(block);
    }

    fn reject(&self, block: Block, source: BlockSource, rejection: Rejection) -> BlockReceipt {
        self.on_rejected(&block, source, &rejection);
        BlockReceipt::Rejected(rejection)
    }

    fn on_rejected(&self, block: &Block, source: BlockSource, rejection: &Rejection) {
        log::debug!("Rejected block {} from {:?}: {}", block.index, source, rejection);
        Event::publish(
            &self.event_publisher,
            Event::RejectBlock(RejectBlockEvent {
                timestamp: SystemTime::now(),
                block: block.clone(),
                source,
                reason: rejection.to_string(),
            }),
        );
    }
}
