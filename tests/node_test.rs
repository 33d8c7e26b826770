use std::{fs, net::TcpStream, sync::Arc, time::Duration};

use ledger_bft::{
    events::{InsertBlockEvent, ReplaceChainEvent},
    identity::{Ed25519Identity, Identity},
    node::NodeSpec,
};
use log::LevelFilter;

mod common;

use crate::common::{
    logging::setup_logger,
    node::{start_node, test_configuration, Counter},
    wait_until,
};

const TIMEOUT: Duration = Duration::from_secs(10);

#[test]
fn shutdown_persists_the_chain_test() {
    setup_logger(LevelFilter::Debug);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chain_store.json");

    // 1. Build some history and shut down.
    let mut configuration = test_configuration(vec![]);
    configuration.chain_path = Some(path.clone());
    let mut node = start_node(configuration.clone());
    assert_eq!(node.ledger().len(), 1);
    for i in 0..2 {
        node.submit_transaction(&format!("tx-{}", i)).unwrap();
    }
    let chain = node.ledger().chain();
    node.shutdown().unwrap();
    assert!(path.exists());

    // 2. Shutting down again is a no-op.
    node.shutdown().unwrap();
    drop(node);

    // 3. A restarted node resumes from the persisted chain.
    let restarted = start_node(configuration);
    assert_eq!(restarted.ledger().chain(), chain);
}

#[test]
fn corrupt_chain_file_starts_from_genesis_test() {
    setup_logger(LevelFilter::Debug);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chain_store.json");

    // 1. Persist a chain and break one of its links on disk.
    let mut configuration = test_configuration(vec![]);
    configuration.chain_path = Some(path.clone());
    let node = start_node(configuration.clone());
    for i in 1..=3 {
        node.submit_transaction(&format!("payload-{}", i)).unwrap();
    }
    drop(node);
    let corrupted = fs::read_to_string(&path).unwrap().replace("payload-2", "payload-X");
    fs::write(&path, &corrupted).unwrap();

    // 2. The node starts from genesis and leaves the file as it was.
    let node = start_node(configuration);
    assert_eq!(node.ledger().len(), 1);
    assert_eq!(fs::read_to_string(&path).unwrap(), corrupted);
}

#[test]
fn dropping_the_node_stops_it_test() {
    let node = start_node(test_configuration(vec![]));
    let addr = node.listen_addr();
    assert!(TcpStream::connect(addr).is_ok());

    drop(node);
    assert!(TcpStream::connect(addr).is_err());
}

#[test]
fn event_handlers_are_invoked_test() {
    setup_logger(LevelFilter::Debug);

    // 1. A node with handlers, and a peer with a longer chain.
    let source = start_node(test_configuration(vec![]));
    for i in 0..2 {
        source.submit_transaction(&format!("source-{}", i)).unwrap();
    }
    let (inserts, replacements) = (Counter::default(), Counter::default());
    let node = NodeSpec::builder()
        .configuration(test_configuration(vec![source.local_addr().to_string()]))
        .identity(Arc::new(Ed25519Identity::generate()) as Arc<dyn Identity>)
        .on_insert_block(inserts.handler::<InsertBlockEvent>())
        .on_replace_chain(replacements.handler::<ReplaceChainEvent>())
        .build()
        .start()
        .unwrap();

    // 2. The handshake replaces the chain.
    assert!(wait_until(TIMEOUT, || replacements.get() == 1));
    assert_eq!(node.ledger().len(), 3);

    // 3. A local transaction inserts a block.
    node.submit_transaction("local").unwrap();
    assert!(wait_until(TIMEOUT, || inserts.get() == 1));
}
