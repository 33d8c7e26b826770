/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Topic-based publish/subscribe propagation of blocks and transactions.
//!
//! ## Pluggable overlay
//!
//! The node talks to the overlay through the [Gossip] trait. Two providers ship with the crate:
//! - [GossipHub], which connects members living in the same process through channels, and
//! - [TcpGossip], a TCP overlay which sends length-prefixed borsh frames to a list of members.
//!
//! ## Convergence with the transport
//!
//! A block may reach a node through both a direct transport connection and the overlay. No message-ID
//! cache is kept: the ledger's contiguity check rejects the second delivery, so it is a no-op.

pub mod hub;

pub(crate) mod subscriber;

pub mod tcp;

use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender},
        Mutex, PoisonError,
    },
};

use borsh::{BorshDeserialize, BorshSerialize};

pub use hub::{GossipHub, HubMember};
pub use tcp::TcpGossip;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum Topic {
    Blocks,
    Transactions,
}

impl Topic {
    pub fn name(&self) -> &'static str {
        match self {
            Topic::Blocks => "ledger-blocks",
            Topic::Transactions => "ledger-transactions",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct GossipMessage {
    pub topic: Topic,
    /// [`local_id`](Gossip::local_id) of the publisher.
    pub origin: String,
    /// JSON encoding of a [Block](crate::types::Block) or a
    /// [Transaction](crate::networking::messages::Transaction).
    pub data: Vec<u8>,
}

pub trait Gossip: Send + Sync {
    /// Identity of this member in the overlay, carried as the origin of everything it publishes.
    fn local_id(&self) -> String;

    /// Send `data` to every current subscriber of `topic` without waiting for delivery.
    fn publish(&self, topic: Topic, data: Vec<u8>);

    /// Receive every message published on `topic` from now on.
    fn subscribe(&self, topic: Topic) -> Receiver<GossipMessage>;

    /// Number of other members of the overlay.
    fn peer_count(&self) -> usize;
}

/// Per-topic subscriber channels of one overlay member.
#[derive(Default)]
pub(crate) struct Subscriptions {
    subscribers: Mutex<HashMap<Topic, Vec<Sender<GossipMessage>>>>,
}

impl Subscriptions {
    pub(crate) fn subscribe(&self, topic: Topic) -> Receiver<GossipMessage> {
        let (sender, receiver) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic)
            .or_default()
            .push(sender);
        receiver
    }

    /// Hand `message` to every live subscriber of its topic, forgetting subscribers that hung up.
    pub(crate) fn deliver(&self, message: &GossipMessage) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(senders) = subscribers.get_mut(&message.topic) {
            senders.retain(|sender| sender.send(message.clone()).is_ok());
        }
    }
}
