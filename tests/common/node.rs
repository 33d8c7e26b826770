use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use ledger_bft::{
    config::Configuration,
    identity::{Ed25519Identity, Identity},
    node::{Node, NodeSpec},
    types::Difficulty,
};

/// A configuration for a node on the loopback interface with an OS-assigned port, a cheap
/// proof-of-work, and no external collaborators.
pub(crate) fn test_configuration(bootstrap_peers: Vec<String>) -> Configuration {
    Configuration::builder()
        .listen_addr("127.0.0.1:0".to_string())
        .bootstrap_peers(bootstrap_peers)
        .difficulty(Difficulty::new(1))
        .dial_timeout(Duration::from_secs(1))
        .broadcast_timeout(Duration::from_secs(1))
        .log_events(true)
        .build()
}

pub(crate) fn start_node(configuration: Configuration) -> Node {
    NodeSpec::builder()
        .configuration(configuration)
        .identity(Arc::new(Ed25519Identity::generate()) as Arc<dyn Identity>)
        .build()
        .start()
        .unwrap()
}

/// Counts the events a handler closure is invoked with.
#[derive(Clone, Default)]
pub(crate) struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub(crate) fn handler<E: 'static>(&self) -> impl Fn(&E) + Send + 'static {
        let count = self.0.clone();
        move |_: &E| {
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}
