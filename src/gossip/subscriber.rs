/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Threads that consume the overlay: one per topic, plus the peer-count log tick.
//!
//! Subscribers apply the same validation and append logic as the transport, through the shared
//! [BlockPipeline]. Messages the node published itself are recognized by their origin and skipped.

use std::{
    sync::{
        mpsc::{Receiver, RecvTimeoutError, TryRecvError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    networking::{messages::Transaction, PeerSet},
    pipeline::{BlockPipeline, BlockReceipt, BlockSource, Rejection},
    types::Block,
};

use super::{Gossip, GossipMessage, Topic};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub(crate) fn start_block_subscriber(
    gossip: Arc<dyn Gossip>,
    pipeline: Arc<BlockPipeline>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    let blocks = gossip.subscribe(Topic::Blocks);
    let local_id = gossip.local_id();
    thread::spawn(move || {
        consume(&blocks, &local_id, &shutdown_signal, |message| {
            let block: Block = match serde_json::from_slice(&message.data) {
                Ok(block) => block,
                Err(err) => {
                    log::warn!("Malformed block from {} on {}: {}", message.origin, Topic::Blocks.name(), err);
                    return;
                }
            };
            if let BlockReceipt::Rejected(Rejection::Append(err)) =
                pipeline.receive_block(block, BlockSource::Gossip)
            {
                // There is no connection to answer on, so resynchronize from some peer instead.
                log::debug!("Gossiped block from {} does not extend the chain ({}), resyncing", message.origin, err);
                pipeline.resync();
            }
        })
    })
}

pub(crate) fn start_transaction_subscriber(
    gossip: Arc<dyn Gossip>,
    pipeline: Arc<BlockPipeline>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    let transactions = gossip.subscribe(Topic::Transactions);
    let local_id = gossip.local_id();
    thread::spawn(move || {
        consume(&transactions, &local_id, &shutdown_signal, |message| {
            match serde_json::from_slice::<Transaction>(&message.data) {
                Ok(transaction) => {
                    pipeline.submit_transaction(&transaction.data);
                }
                Err(err) => log::warn!(
                    "Malformed transaction from {} on {}: {}",
                    message.origin,
                    Topic::Transactions.name(),
                    err
                ),
            }
        })
    })
}

/// Log the size of the overlay and of the peer set every `interval`.
pub(crate) fn start_peer_count_ticker(
    gossip: Option<Arc<dyn Gossip>>,
    peers: Arc<PeerSet>,
    interval: Duration,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => match &gossip {
                Some(gossip) => log::info!(
                    "Connected to {} gossip peers and {} direct peers",
                    gossip.peer_count(),
                    peers.len()
                ),
                None => log::info!("Connected to {} direct peers", peers.len()),
            },
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}

fn consume(
    messages: &Receiver<GossipMessage>,
    local_id: &str,
    shutdown_signal: &Receiver<()>,
    mut handle: impl FnMut(GossipMessage),
) {
    loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match messages.recv_timeout(POLL_INTERVAL) {
            Ok(message) if message.origin == local_id => (),
            Ok(message) => handle(message),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}
