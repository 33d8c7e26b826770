//! The [PeerSet]: network addresses this node knows about.
//!
//! The peer set only decides where blocks are broadcast and where a chain can be fetched from. It is
//! never consulted for consensus membership, except for the degraded quorum used when no
//! [validator roster](crate::types::ValidatorRoster) is configured.

use std::{
    collections::BTreeSet,
    sync::{PoisonError, RwLock},
};

use rand::seq::SliceRandom;

pub struct PeerSet {
    local_addr: String,
    peers: RwLock<BTreeSet<String>>,
}

impl PeerSet {
    pub fn new(local_addr: impl Into<String>) -> PeerSet {
        PeerSet {
            local_addr: local_addr.into(),
            peers: RwLock::new(BTreeSet::new()),
        }
    }

    /// The advertised address of this node, never a member of its own peer set.
    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    /// Add `addr`, returning whether it was new.
    pub fn add(&self, addr: &str) -> bool {
        if addr.is_empty() || addr == self.local_addr {
            return false;
        }
        let added = self
            .peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(addr.to_string());
        if added {
            log::info!("Added peer {}", addr);
        }
        added
    }

    /// Union `addrs` into the set, returning the number of new peers.
    pub fn merge(&self, addrs: impl IntoIterator<Item = String>) -> usize {
        addrs.into_iter().filter(|addr| self.add(addr)).count()
    }

    /// A copy of the known peers.
    pub fn list(&self) -> Vec<String> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// The peer list sent to other nodes: the known peers plus this node's own address.
    pub fn advertised(&self) -> BTreeSet<String> {
        let mut advertised: BTreeSet<String> = self.list().into_iter().collect();
        advertised.insert(self.local_addr.clone());
        advertised
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(addr)
    }

    pub fn len(&self) -> usize {
        self.peers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pick a known peer uniformly at random.
    pub fn random_peer(&self) -> Option<String> {
        self.list().choose(&mut rand::thread_rng()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_an_idempotent_union_without_self() {
        let peers = PeerSet::new("127.0.0.1:1");
        let incoming = vec!["127.0.0.1:1".to_string(), "127.0.0.1:2".to_string(), String::new()];
        assert_eq!(peers.merge(incoming.clone()), 1);
        assert_eq!(peers.merge(incoming), 0);
        assert_eq!(peers.list(), vec!["127.0.0.1:2".to_string()]);
        assert_eq!(peers.advertised().len(), 2);
        assert_eq!(peers.random_peer().as_deref(), Some("127.0.0.1:2"));
    }
}
