use std::fs;

use ledger_bft::{
    identity::{sign_block, verify_block, Ed25519Identity},
    ledger::{AppendError, Ledger, LedgerError},
    types::{Block, Difficulty},
};
use log::LevelFilter;

mod common;

use crate::common::logging::setup_logger;

fn ledger_with(payloads: &[&str]) -> Ledger {
    let ledger = Ledger::new(Difficulty::default());
    for payload in payloads {
        let block = ledger.generate_block(payload);
        assert!(ledger.add_block(block));
    }
    ledger
}

#[test]
fn generate_and_add_block_test() {
    setup_logger(LevelFilter::Debug);

    // 1. A genesis-only chain.
    let ledger = Ledger::new(Difficulty::default());
    let genesis = ledger.latest();
    assert_eq!(ledger.len(), 1);
    assert_eq!(genesis.index, 0);

    // 2. Sealing "hello" extends genesis and meets the difficulty.
    let block = ledger.generate_block("hello");
    assert_eq!(block.index, 1);
    assert_eq!(block.prev_hash, genesis.hash);
    assert!(block.hash.starts_with("00"));
    assert!(block.is_sealed(Difficulty::default()));
    assert_eq!(block.hash, block.compute_hash());

    // 3. Sealing does not append.
    assert_eq!(ledger.len(), 1);
    assert!(ledger.add_block(block.clone()));
    assert_eq!(ledger.latest(), block);

    // 4. Every link of the chain holds.
    let chain = ledger.chain();
    for pair in chain.windows(2) {
        assert_eq!(pair[1].prev_hash, pair[0].hash);
        assert_eq!(pair[1].hash, pair[1].compute_hash());
    }
}

#[test]
fn add_block_rejects_without_mutation_test() {
    let ledger = ledger_with(&["a"]);
    let tip = ledger.latest();
    let next = ledger.generate_block("b");

    // 1. Wrong index.
    let mut skipped = next.clone();
    skipped.index += 1;
    skipped.hash = skipped.compute_hash();
    assert_eq!(
        ledger.try_add_block(skipped),
        Err(AppendError::IndexMismatch { expected: 2, found: 3 })
    );

    // 2. Wrong parent.
    let mut orphan = next.clone();
    orphan.prev_hash = "ff".repeat(32);
    orphan.hash = orphan.compute_hash();
    assert_eq!(ledger.try_add_block(orphan), Err(AppendError::PrevHashMismatch { index: 2 }));

    // 3. Hash that does not match the contents.
    let mut tampered = next.clone();
    tampered.data = "c".into();
    assert_eq!(ledger.try_add_block(tampered), Err(AppendError::HashMismatch { index: 2 }));

    // 4. Re-delivery of a block the chain already holds.
    assert!(!ledger.add_block(tip.clone()));

    assert_eq!(ledger.len(), 2);
    assert_eq!(ledger.latest(), tip);
    assert!(ledger.add_block(next));
}

#[test]
fn replace_chain_prefers_longer_valid_chains_test() {
    let ledger = ledger_with(&["a"]);
    let longer = ledger_with(&["x", "y", "z"]);

    // 1. Equal or shorter chains are refused.
    assert!(!ledger.replace_chain(ledger_with(&["q"]).chain()));
    assert!(!longer.replace_chain(ledger.chain()));

    // 2. A longer chain with a broken link is refused.
    let mut broken = longer.chain();
    broken[2].data = "tampered".into();
    assert!(!ledger.replace_chain(broken));
    assert_eq!(ledger.len(), 2);

    // 3. A longer valid chain wins.
    assert!(ledger.replace_chain(longer.chain()));
    assert_eq!(ledger.chain(), longer.chain());
}

#[test]
fn signed_blocks_verify_test() {
    let identity = Ed25519Identity::generate();
    let ledger = Ledger::new(Difficulty::new(1));
    let mut block = ledger.generate_block("signed");

    // 1. Unsigned blocks never verify.
    assert!(!verify_block(&identity, &block));

    // 2. Signing fills in the key and signature.
    assert!(sign_block(&identity, &mut block));
    assert!(verify_block(&Ed25519Identity::verify_only(), &block));

    // 3. Changing the contents breaks the signature.
    let mut altered: Block = block.clone();
    altered.data = "changed".into();
    altered.hash = altered.compute_hash();
    assert!(!verify_block(&identity, &altered));

    // 4. A node without a key cannot sign.
    let mut unsigned = ledger.generate_block("unsigned");
    assert!(!sign_block(&Ed25519Identity::verify_only(), &mut unsigned));
    assert!(unsigned.signature.is_empty());
}

#[test]
fn persistence_round_trip_test() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chain_store.json");

    let ledger = ledger_with(&["a", "b", "c"]);
    ledger.save_to_file(&path).unwrap();
    assert!(!dir.path().join("chain_store.json.tmp").exists());

    // The file is an indented JSON array.
    let contents = fs::read_to_string(&path).unwrap();
    assert!(contents.starts_with('['));
    assert!(contents.contains("\n  "));

    let restored = Ledger::new(Difficulty::default());
    assert_eq!(restored.load_from_file(&path).unwrap(), 4);
    assert_eq!(restored.chain(), ledger.chain());
}

#[test]
fn corrupt_chain_file_is_rejected_test() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chain_store.json");

    // 1. Persist a 5-block chain.
    let ledger = ledger_with(&["payload-1", "payload-2", "payload-3", "payload-4"]);
    assert_eq!(ledger.len(), 5);
    ledger.save_to_file(&path).unwrap();

    // 2. Alter one byte of block 3's payload on disk.
    let contents = fs::read_to_string(&path).unwrap();
    fs::write(&path, contents.replace("payload-3", "payload-X")).unwrap();

    // 3. Loading fails, names index 3, and leaves the in-memory chain alone.
    let target = ledger_with(&["kept"]);
    let before = target.chain();
    match target.load_from_file(&path) {
        Err(LedgerError::InvalidLink { index }) => assert_eq!(index, 3),
        other => panic!("expected an invalid link error, got {:?}", other),
    }
    assert_eq!(target.chain(), before);
}

#[test]
fn missing_chain_file_is_an_io_error_test() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Ledger::new(Difficulty::default());
    assert!(matches!(
        ledger.load_from_file(dir.path().join("absent.json")),
        Err(LedgerError::Io(_))
    ));
    assert_eq!(ledger.len(), 1);
}
