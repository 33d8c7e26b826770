//! An in-process overlay whose members exchange messages through channels.

use std::sync::{mpsc::Receiver, Arc, Mutex, PoisonError};

use super::{Gossip, GossipMessage, Subscriptions, Topic};

#[derive(Clone, Default)]
pub struct GossipHub {
    members: Arc<Mutex<Vec<Arc<Subscriptions>>>>,
}

impl GossipHub {
    pub fn new() -> GossipHub {
        GossipHub::default()
    }

    /// Add a member identified by `id` to the overlay.
    pub fn join(&self, id: impl Into<String>) -> HubMember {
        let subscriptions = Arc::new(Subscriptions::default());
        self.members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscriptions.clone());
        HubMember {
            id: id.into(),
            hub: self.clone(),
            subscriptions,
        }
    }

    fn members(&self) -> Vec<Arc<Subscriptions>> {
        self.members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub struct HubMember {
    id: String,
    hub: GossipHub,
    subscriptions: Arc<Subscriptions>,
}

impl Gossip for HubMember {
    fn local_id(&self) -> String {
        self.id.clone()
    }

    /// Delivers to every member, the publisher included; subscribers skip their own messages.
    fn publish(&self, topic: Topic, data: Vec<u8>) {
        let message = GossipMessage {
            topic,
            origin: self.id.clone(),
            data,
        };
        for member in self.hub.members() {
            member.deliver(&message);
        }
    }

    fn subscribe(&self, topic: Topic) -> Receiver<GossipMessage> {
        self.subscriptions.subscribe(topic)
    }

    fn peer_count(&self) -> usize {
        self.hub.members().len().saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_member_receives_published_messages() {
        let hub = GossipHub::new();
        let alice = hub.join("alice");
        let bob = hub.join("bob");
        let bob_blocks = bob.subscribe(Topic::Blocks);
        let bob_txs = bob.subscribe(Topic::Transactions);
        let alice_blocks = alice.subscribe(Topic::Blocks);

        alice.publish(Topic::Blocks, b"block".to_vec());

        let received = bob_blocks.try_recv().unwrap();
        assert_eq!(received.origin, "alice");
        assert_eq!(received.data, b"block".to_vec());
        assert!(bob_txs.try_recv().is_err());
        assert_eq!(alice_blocks.try_recv().unwrap().origin, "alice");
        assert_eq!(alice.peer_count(), 1);
    }
}
