//! [NetworkNotifier]: delivers notifications to the execution engine and the observer sink on
//! background threads.

use std::{sync::Arc, thread};

use crate::types::Block;

use super::{ExecutionEngine, Notifier, ObserverSink};

#[derive(Clone, Default)]
pub struct NetworkNotifier {
    engine: Option<Arc<dyn ExecutionEngine>>,
    observer: Option<ObserverSink>,
}

impl NetworkNotifier {
    pub fn new(engine: Option<Arc<dyn ExecutionEngine>>, observer: Option<ObserverSink>) -> NetworkNotifier {
        NetworkNotifier { engine, observer }
    }
}

impl Notifier for NetworkNotifier {
    fn block_added(&self, block: &Block) {
        let Some(observer) = self.observer.clone() else {
            return;
        };
        let block = block.clone();
        thread::spawn(move || {
            if let Err(err) = observer.ingest_block(&block) {
                log::debug!("Observer sink did not take block {}: {}", block.index, err);
            }
        });
    }

    fn block_committed(&self, block_hash: &str) {
        let Some(engine) = self.engine.clone() else {
            return;
        };
        let block_hash = block_hash.to_string();
        thread::spawn(move || {
            if let Err(err) = engine.commit_block(&block_hash) {
                log::warn!("Could not notify the execution engine of commit {}: {}", block_hash, err);
            }
        });
    }
}
