use std::{
    io::{BufReader, Write},
    net::TcpStream,
    time::Duration,
};

use ledger_bft::{
    identity::{sign_block, Ed25519Identity},
    ledger::Ledger,
    networking::{
        client::write_message,
        messages::{ChainMsg, Transaction},
        Envelope, WireMessage,
    },
    types::{Block, Difficulty},
};
use log::LevelFilter;

mod common;

use crate::common::{
    logging::setup_logger,
    node::{start_node, test_configuration},
    wait_until,
};

const TIMEOUT: Duration = Duration::from_secs(10);

/// A bare connection to a node's transport, speaking the envelope protocol directly.
struct RawPeer {
    stream: TcpStream,
    envelopes: serde_json::StreamDeserializer<'static, serde_json::de::IoRead<BufReader<TcpStream>>, Envelope>,
}

impl RawPeer {
    fn connect(addr: &str) -> RawPeer {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(TIMEOUT)).unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        RawPeer {
            stream,
            envelopes: serde_json::Deserializer::from_reader(reader).into_iter(),
        }
    }

    fn send(&mut self, message: WireMessage) {
        write_message(&mut self.stream, message, "127.0.0.1:1").unwrap();
    }

    fn send_raw(&mut self, line: &str) {
        self.stream.write_all(line.as_bytes()).unwrap();
        self.stream.write_all(b"\n").unwrap();
    }

    fn receive(&mut self) -> WireMessage {
        self.envelopes.next().unwrap().unwrap().decode().unwrap()
    }

    /// Ask for the node's chain. Messages on a connection are handled in order, so the answer also
    /// shows the effect of everything sent before it.
    fn chain(&mut self) -> Vec<Block> {
        self.send(WireMessage::RequestChain);
        match self.receive() {
            WireMessage::Chain(ChainMsg { chain }) => chain,
            other => panic!("expected a chain, got {:?}", other),
        }
    }
}

#[test]
fn unsigned_blocks_are_rejected_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Start a node and connect to it directly.
    let node = start_node(test_configuration(vec![]));
    let mut peer = RawPeer::connect(&node.listen_addr().to_string());

    // 2. Send a correctly sealed block that carries no signature.
    let unsigned = node.ledger().generate_block("forged");
    assert!(unsigned.signature.is_empty());
    peer.send(WireMessage::Block(unsigned));

    // 3. Send a signed block whose contents were changed afterwards.
    let identity = Ed25519Identity::generate();
    let mut altered = node.ledger().generate_block("original");
    assert!(sign_block(&identity, &mut altered));
    altered.data = "altered".into();
    altered.hash = altered.compute_hash();
    peer.send(WireMessage::Block(altered));

    // 4. The chain is still genesis only, and the node asked for nothing in return.
    let chain = peer.chain();
    assert_eq!(chain.len(), 1);
    assert_eq!(node.ledger().len(), 1);
}

#[test]
fn unknown_message_types_are_skipped_test() {
    let node = start_node(test_configuration(vec![]));
    let mut peer = RawPeer::connect(&node.listen_addr().to_string());

    // The connection survives a message it does not understand.
    peer.send_raw(r#"{"type":"gossipz","body":{"x":1},"from":"127.0.0.1:1"}"#);
    assert_eq!(peer.chain().len(), 1);

    // A transaction from a peer is sealed and appended like a local one.
    peer.send(WireMessage::Tx(Transaction { data: "from afar".into() }));
    let chain = peer.chain();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[1].data, "from afar");
}

#[test]
fn blocks_that_do_not_extend_the_chain_trigger_a_chain_request_test() {
    let node = start_node(test_configuration(vec![]));
    let mut peer = RawPeer::connect(&node.listen_addr().to_string());

    // 1. A signed block two ahead of the node's tip.
    let identity = Ed25519Identity::generate();
    let ahead = Ledger::new(Difficulty::new(1));
    for data in ["a", "b"] {
        let block = ahead.generate_block(data);
        assert!(ahead.add_block(block));
    }
    let mut block = ahead.generate_block("c");
    assert!(sign_block(&identity, &mut block));
    peer.send(WireMessage::Block(block));

    // 2. The node asks for the chain.
    assert_eq!(peer.receive(), WireMessage::RequestChain);

    // 3. Answering with the longer chain makes the node adopt it.
    let mut longer = ahead.chain();
    longer.push(ahead.generate_block("c"));
    peer.send(WireMessage::Chain(ChainMsg { chain: longer.clone() }));
    assert_eq!(peer.chain(), longer);
    assert_eq!(node.ledger().chain(), longer);
}

#[test]
fn broadcast_beyond_the_tip_resyncs_the_receiver_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Node A builds some history while B, unknown to it, stays at genesis.
    let a = start_node(test_configuration(vec![]));
    for i in 0..2 {
        assert!(a.submit_transaction(&format!("before-{}", i)).is_some());
    }
    let b = start_node(test_configuration(vec![]));
    assert_eq!(b.ledger().len(), 1);
    assert!(b.peers().is_empty());

    // 2. A learns of B and broadcasts a block that does not extend B's chain.
    assert!(a.peers().add(b.local_addr()));
    let tip = a.submit_transaction("after").unwrap();

    // 3. B fetches A's chain instead of staying behind.
    assert!(wait_until(TIMEOUT, || b.ledger().latest() == tip));
    assert_eq!(b.ledger().chain(), a.ledger().chain());
}

#[test]
fn handshake_merges_peer_lists_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Node B dials A; each learns the other.
    let a = start_node(test_configuration(vec![]));
    let b = start_node(test_configuration(vec![a.local_addr().to_string()]));
    assert!(wait_until(TIMEOUT, || a.peers().contains(b.local_addr())));
    assert!(b.peers().contains(a.local_addr()));

    // 2. Node C dials A and learns of B from A's answer.
    let c = start_node(test_configuration(vec![a.local_addr().to_string()]));
    assert!(wait_until(TIMEOUT, || c.peers().contains(b.local_addr())));
    assert!(wait_until(TIMEOUT, || a.peers().contains(c.local_addr())));

    // No node lists itself.
    for node in [&a, &b, &c] {
        assert!(!node.peers().contains(node.local_addr()));
    }
}

#[test]
fn nodes_converge_test() {
    setup_logger(LevelFilter::Debug);

    // 1. A node with some history.
    let a = start_node(test_configuration(vec![]));
    for i in 0..3 {
        assert!(a.submit_transaction(&format!("early-{}", i)).is_some());
    }

    // 2. A late joiner takes A's chain during the handshake.
    let b = start_node(test_configuration(vec![a.local_addr().to_string()]));
    assert!(wait_until(TIMEOUT, || b.ledger().len() == 4));
    assert!(wait_until(TIMEOUT, || a.peers().contains(b.local_addr())));

    // 3. New blocks flow both ways.
    let from_a = a.submit_transaction("from a").unwrap();
    assert!(wait_until(TIMEOUT, || b.ledger().latest() == from_a));
    let from_b = b.submit_transaction("from b").unwrap();
    assert!(wait_until(TIMEOUT, || a.ledger().latest() == from_b));
    assert_eq!(a.ledger().chain(), b.ledger().chain());
}
