use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use ledger_bft::{
    agreement::{AgreementEngine, AgreementMessage, AgreementNetwork},
    bridge::{BridgeError, ExecutionEngine, Notifier},
    types::Block,
};

/// A mock agreement network which queues every broadcast message. Messages reach other engines only
/// when the test [pumps](pump) them.
#[derive(Clone)]
pub(crate) struct MeshNetwork {
    me: usize,
    queue: Arc<Mutex<VecDeque<(usize, AgreementMessage)>>>,
}

impl AgreementNetwork for MeshNetwork {
    fn broadcast(&self, message: AgreementMessage) {
        self.queue.lock().unwrap().push_back((self.me, message));
    }
}

pub(crate) type Mesh = Arc<Mutex<VecDeque<(usize, AgreementMessage)>>>;

pub(crate) fn mock_mesh(n: usize) -> (Mesh, Vec<MeshNetwork>) {
    let queue: Mesh = Arc::new(Mutex::new(VecDeque::new()));
    let networks = (0..n)
        .map(|me| MeshNetwork {
            me,
            queue: queue.clone(),
        })
        .collect();
    (queue, networks)
}

/// Deliver queued messages to every engine but their sender, until no message is left. Returns the
/// number of messages delivered.
pub(crate) fn pump(mesh: &Mesh, engines: &[Arc<AgreementEngine<MeshNetwork>>]) -> usize {
    let mut delivered = 0;
    loop {
        let next = mesh.lock().unwrap().pop_front();
        let Some((sender, message)) = next else {
            return delivered;
        };
        for (i, engine) in engines.iter().enumerate() {
            if i != sender {
                let ack = engine.handle(message.clone());
                assert!(ack.ok, "engine {} rejected {:?}: {:?}", i, message, ack.error);
            }
        }
        delivered += 1;
    }
}

/// A mock agreement network which only records what it is asked to broadcast.
#[derive(Clone, Default)]
pub(crate) struct RecordingNetwork {
    pub(crate) sent: Arc<Mutex<Vec<AgreementMessage>>>,
}

impl RecordingNetwork {
    pub(crate) fn sent(&self) -> Vec<AgreementMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl AgreementNetwork for RecordingNetwork {
    fn broadcast(&self, message: AgreementMessage) {
        self.sent.lock().unwrap().push(message);
    }
}

#[derive(Clone, Default)]
pub(crate) struct RecordingNotifier {
    pub(crate) added: Arc<Mutex<Vec<Block>>>,
    pub(crate) committed: Arc<Mutex<Vec<String>>>,
}

impl RecordingNotifier {
    pub(crate) fn committed(&self) -> Vec<String> {
        self.committed.lock().unwrap().clone()
    }

    pub(crate) fn added(&self) -> Vec<Block> {
        self.added.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn block_added(&self, block: &Block) {
        self.added.lock().unwrap().push(block.clone());
    }

    fn block_committed(&self, block_hash: &str) {
        self.committed.lock().unwrap().push(block_hash.to_string());
    }
}

/// An execution engine that is never reachable.
pub(crate) struct UnreachableEngine;

impl ExecutionEngine for UnreachableEngine {
    fn submit_tx(&self, _: &str) -> Result<Block, BridgeError> {
        Err(BridgeError::Io(std::io::ErrorKind::ConnectionRefused.into()))
    }

    fn get_chain(&self) -> Result<Vec<Block>, BridgeError> {
        Err(BridgeError::Io(std::io::ErrorKind::ConnectionRefused.into()))
    }

    fn commit_block(&self, _: &str) -> Result<(), BridgeError> {
        Err(BridgeError::Io(std::io::ErrorKind::ConnectionRefused.into()))
    }
}
