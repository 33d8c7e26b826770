/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for starting and operating a node.
//!
//! This module defines:
//! - The builder-pattern interface to construct a [specification of the node](NodeSpec) with:
//!   1. `NodeSpec::builder` to construct a `NodeSpecBuilder`,
//!   2. The setters of the `NodeSpecBuilder`, and
//!   3. The `NodeSpecBuilder::build` method to construct a [NodeSpec],
//! - The function to [start](NodeSpec::start) a [Node] given its specification,
//! - The [Node] handle, through which transactions are submitted and blocks proposed, and which shuts
//!   the node down when dropped.
//!
//! ## Starting a node
//!
//! ```ignore
//! let node =
//!     NodeSpec::builder()
//!     .configuration(Configuration::from_env()?)
//!     .identity(Arc::new(Ed25519Identity::from_key_file("keys/node_priv.hex")?))
//!     .on_commit_block(|event| println!("committed {}", event.block_hash))
//!     .build()
//!     .start()?;
//! ```
//!
//! Starting a node:
//! 1. Loads the persisted chain, if any. A missing file starts from genesis; a corrupt one is logged
//!    and also starts from genesis, leaving the file untouched.
//! 2. If no chain was loaded, asks the execution engine for its chain and adopts it if it is longer.
//! 3. Starts the transport, the agreement endpoint and the gossip overlay, then dials the bootstrap
//!    peers.

use std::{
    fmt, io,
    net::{SocketAddr, TcpListener},
    path::{Path, PathBuf},
    sync::{
        mpsc::{self, Sender},
        Arc,
    },
    thread::JoinHandle,
    time::SystemTime,
};

use typed_builder::TypedBuilder;

use crate::{
    agreement::{
        server::start_agreement_server, AgreementEngine, AgreementError, BlockProposer, PrePrepare,
        TcpAgreementNetwork,
    },
    bridge::{BridgeClient, BridgeError, ExecutionEngine, NetworkNotifier, Notifier, ObserverSink, Relay},
    config::Configuration,
    event_bus::{start_event_bus, EventHandlers, HandlerPtr},
    events::*,
    gossip::{
        subscriber::{start_block_subscriber, start_peer_count_ticker, start_transaction_subscriber},
        tcp::TcpGossip,
        Gossip, Topic,
    },
    identity::Identity,
    ledger::{Ledger, LedgerError},
    networking::{
        messages::Transaction,
        transport::{Connections, Transport},
        PeerSet,
    },
    pipeline::{BlockPipeline, BlockSource},
    types::{validators::parse_public_key, Block, ValidatorRoster},
};

/// Stores all parameters and trait implementations required to run a [Node].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [NodeSpec]. On the builder call the following methods to construct a valid [NodeSpec].

    Required:
    - `.configuration(...)`
    - `.identity(...)`

    Optional:
    - `.gossip(...)`
    - `.engine(...)`
    - `.notifier(...)`
    - `.on_insert_block(...)`
    - `.on_reject_block(...)`
    - `.on_replace_chain(...)`
    - `.on_commit_block(...)`
"))]
pub struct NodeSpec {
    #[builder(setter(doc = "Set the [configuration](Configuration). Required."))]
    configuration: Configuration,
    #[builder(setter(doc = "Set the identity used to sign and verify blocks and votes. Required."))]
    identity: Arc<dyn Identity>,
    // Optional parameters
    #[builder(default, setter(strip_option, doc = "Set the gossip overlay, in place of the TCP overlay built from the configuration. Optional."))]
    gossip: Option<Arc<dyn Gossip>>,
    #[builder(default, setter(strip_option, doc = "Set the execution engine, in place of the bridge client built from the configuration. Optional."))]
    engine: Option<Arc<dyn ExecutionEngine>>,
    #[builder(default, setter(strip_option, doc = "Set the notifier, in place of the one built from the configuration. Optional."))]
    notifier: Option<Arc<dyn Notifier>>,
    #[builder(default, setter(transform = |handler: impl Fn(&InsertBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<InsertBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is appended to the chain. Optional."))]
    on_insert_block: Option<HandlerPtr<InsertBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RejectBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RejectBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is rejected. Optional."))]
    on_reject_block: Option<HandlerPtr<RejectBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReplaceChainEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReplaceChainEvent>),
    doc = "Register a handler closure to be invoked after the chain is replaced by a longer one. Optional."))]
    on_replace_chain: Option<HandlerPtr<ReplaceChainEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitBlockEvent>),
    doc = "Register a handler closure to be invoked after a block reaches quorum finality. Optional."))]
    on_commit_block: Option<HandlerPtr<CommitBlockEvent>>,
}

impl NodeSpec {
    /// Starts all threads associated with running a node, and returns the handles to them in a [Node].
    pub fn start(self) -> Result<Node, NodeError> {
        let configuration = self.configuration;

        let event_handlers = EventHandlers::new(
            configuration.log_events,
            self.on_insert_block,
            self.on_reject_block,
            self.on_replace_chain,
            self.on_commit_block,
        );
        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };
        let mut threads = Vec::new();
        let event_bus = event_subscriber.map(|event_subscriber| {
            let (shutdown, shutdown_receiver) = mpsc::channel();
            (shutdown, start_event_bus(event_handlers, event_subscriber, shutdown_receiver))
        });

        let ledger = Arc::new(Ledger::new(configuration.difficulty));
        let loaded = match &configuration.chain_path {
            Some(path) => load_chain(&ledger, path),
            None => false,
        };

        let listener = TcpListener::bind(&configuration.listen_addr)?;
        let listen_addr = listener.local_addr()?;
        let local_addr = configuration
            .advertise_addr
            .clone()
            .unwrap_or_else(|| listen_addr.to_string());
        let peers = Arc::new(PeerSet::new(local_addr.clone()));
        peers.merge(configuration.bootstrap_peers.iter().cloned());

        let engine = self.engine.or_else(|| {
            configuration
                .bridge_addr
                .as_ref()
                .map(|addr| Arc::new(BridgeClient::new(addr.as_str())) as Arc<dyn ExecutionEngine>)
        });
        let notifier = match self.notifier {
            Some(notifier) => notifier,
            None => {
                let observer = configuration.observer_addr.as_deref().map(ObserverSink::new).transpose()?;
                Arc::new(NetworkNotifier::new(engine.clone(), observer)) as Arc<dyn Notifier>
            }
        };
        let relay = configuration.relay_addr.as_deref().map(Relay::new).transpose()?;

        // Agreement.
        let roster = configuration.roster.clone().filter(|roster| !roster.is_empty());
        let me = self.identity.public_key().and_then(|key| parse_public_key(&key));
        let agreement_network = TcpAgreementNetwork::new(
            roster.as_ref().unwrap_or(&ValidatorRoster::default()),
            me.as_ref(),
            configuration.broadcast_timeout,
        );
        let agreement = Arc::new(
            AgreementEngine::builder()
                .identity(self.identity.clone())
                .roster(roster)
                .peers(peers.clone())
                .network(agreement_network)
                .notifier(notifier.clone())
                .retention(configuration.retention)
                .event_publisher(event_publisher.clone())
                .build(),
        );
        let agreement_addr = match &configuration.agreement_listen_addr {
            Some(addr) => {
                let listener = TcpListener::bind(addr)?;
                let bound = listener.local_addr()?;
                let (shutdown, shutdown_receiver) = mpsc::channel();
                threads.push((shutdown, start_agreement_server(listener, agreement.clone(), shutdown_receiver)?));
                Some(bound)
            }
            None => None,
        };

        // Gossip.
        let mut gossip_addr = None;
        let gossip = match self.gossip {
            Some(gossip) => Some(gossip),
            None => match &configuration.gossip_listen_addr {
                Some(addr) => {
                    let listener = TcpListener::bind(addr)?;
                    let bound = listener.local_addr()?;
                    let tcp_gossip = TcpGossip::new(bound.to_string(), configuration.gossip_members.iter().cloned());
                    let (shutdown, shutdown_receiver) = mpsc::channel();
                    threads.push((shutdown, tcp_gossip.start(listener, shutdown_receiver)?));
                    gossip_addr = Some(bound);
                    Some(tcp_gossip as Arc<dyn Gossip>)
                }
                None => None,
            },
        };

        let proposer = configuration
            .auto_propose
            .then(|| agreement.clone() as Arc<dyn BlockProposer>);
        let pipeline = Arc::new(
            BlockPipeline::builder()
                .ledger(ledger.clone())
                .peers(peers.clone())
                .identity(self.identity.clone())
                .engine(engine.clone())
                .notifier(notifier)
                .gossip(gossip.clone())
                .proposer(proposer)
                .broadcast_timeout(configuration.broadcast_timeout)
                .event_publisher(event_publisher.clone())
                .build(),
        );

        if !loaded {
            if let Some(engine) = &engine {
                match engine.get_chain() {
                    Ok(chain) => {
                        pipeline.adopt_chain(chain, BlockSource::Engine);
                    }
                    Err(err) => log::debug!("Could not fetch the execution engine's chain: {}", err),
                }
            }
        }

        // Transport.
        let connections = Arc::new(Connections::default());
        let transport = Transport::new(pipeline.clone(), connections.clone(), configuration.dial_timeout);
        let (shutdown, shutdown_receiver) = mpsc::channel();
        threads.push((shutdown, transport.clone().start(listener, shutdown_receiver)?));

        if let Some(gossip) = &gossip {
            let (shutdown, shutdown_receiver) = mpsc::channel();
            threads.push((shutdown, start_block_subscriber(gossip.clone(), pipeline.clone(), shutdown_receiver)));
            let (shutdown, shutdown_receiver) = mpsc::channel();
            threads.push((shutdown, start_transaction_subscriber(gossip.clone(), pipeline.clone(), shutdown_receiver)));
        }
        let (shutdown, shutdown_receiver) = mpsc::channel();
        threads.push((
            shutdown,
            start_peer_count_ticker(gossip.clone(), peers.clone(), configuration.peer_log_interval, shutdown_receiver),
        ));

        for peer in peers.list() {
            transport.connect(peer);
        }
        log::info!("Node listening on {} as {}", listen_addr, local_addr);

        Ok(Node {
            ledger,
            peers,
            pipeline,
            agreement,
            gossip,
            transport,
            relay,
            listen_addr,
            agreement_addr,
            gossip_addr,
            chain_path: configuration.chain_path,
            connections,
            threads,
            event_bus,
            event_publisher,
            stopped: false,
        })
    }
}

/// Returns whether a chain was loaded.
fn load_chain(ledger: &Ledger, path: &Path) -> bool {
    match ledger.load_from_file(path) {
        Ok(len) => {
            log::info!("Loaded chain of length {} from {}", len, path.display());
            true
        }
        Err(LedgerError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
            log::info!("No chain at {}, starting from genesis", path.display());
            false
        }
        Err(err) => {
            log::error!("Persisted chain at {} is unusable ({}), starting from genesis", path.display(), err);
            false
        }
    }
}

/// A handle to the background threads of a running node. When this value is dropped, the node is
/// [shut down](Node::shutdown).
pub struct Node {
    ledger: Arc<Ledger>,
    peers: Arc<PeerSet>,
    pipeline: Arc<BlockPipeline>,
    agreement: Arc<AgreementEngine<TcpAgreementNetwork>>,
    gossip: Option<Arc<dyn Gossip>>,
    transport: Transport,
    relay: Option<Relay>,
    listen_addr: SocketAddr,
    agreement_addr: Option<SocketAddr>,
    gossip_addr: Option<SocketAddr>,
    chain_path: Option<PathBuf>,
    connections: Arc<Connections>,
    threads: Vec<(Sender<()>, JoinHandle<()>)>,
    event_bus: Option<(Sender<()>, JoinHandle<()>)>,
    event_publisher: Option<Sender<Event>>,
    stopped: bool,
}

impl Node {
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.peers
    }

    pub fn agreement(&self) -> &Arc<AgreementEngine<TcpAgreementNetwork>> {
        &self.agreement
    }

    /// Address the transport is bound to.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Address announced to peers.
    pub fn local_addr(&self) -> &str {
        self.peers.local_addr()
    }

    pub fn agreement_addr(&self) -> Option<SocketAddr> {
        self.agreement_addr
    }

    pub fn gossip_addr(&self) -> Option<SocketAddr> {
        self.gossip_addr
    }

    /// Turn `data` into a block on this node's chain and broadcast it, returning the block if it was
    /// appended.
    pub fn submit_transaction(&self, data: &str) -> Option<Block> {
        self.pipeline.submit_transaction(data)
    }

    /// Publish a transaction on the overlay's transaction topic, for whichever member picks it up.
    /// Returns false if the node has no overlay.
    pub fn gossip_transaction(&self, data: &str) -> bool {
        let Some(gossip) = &self.gossip else {
            return false;
        };
        match serde_json::to_vec(&Transaction { data: data.to_string() }) {
            Ok(payload) => {
                gossip.publish(Topic::Transactions, payload);
                true
            }
            Err(err) => {
                log::warn!("Could not encode transaction for gossip: {}", err);
                false
            }
        }
    }

    /// Put `block` up for agreement. Only succeeds on the leader of the next sequence number.
    pub fn propose(&self, block: Block) -> Result<PrePrepare, AgreementError> {
        self.agreement.propose(block)
    }

    /// Forward an opaque payload to the relay and return its answer unchanged.
    pub fn relay(&self, payload: &serde_json::Value) -> Result<Vec<u8>, BridgeError> {
        self.relay
            .as_ref()
            .ok_or(BridgeError::Unconfigured)?
            .forward(payload)
    }

    /// Add `peer` to the peer set and dial it.
    pub fn connect(&self, peer: &str) {
        if self.peers.add(peer) {
            self.transport.connect(peer.to_string());
        }
    }

    /// Stop every loop, close live connections and persist the chain, in that order. Returns the
    /// persistence error, if any; the node is stopped either way.
    pub fn shutdown(&mut self) -> Result<(), LedgerError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        for (shutdown, _) in &self.threads {
            let _ = shutdown.send(());
        }
        self.connections.shutdown_all();
        for (_, thread) in self.threads.drain(..) {
            if thread.join().is_err() {
                log::error!("A node thread panicked");
            }
        }

        let persisted = match &self.chain_path {
            Some(path) => match self.ledger.save_to_file(path) {
                Ok(()) => {
                    Event::publish(
                        &self.event_publisher,
                        Event::PersistChain(PersistChainEvent {
                            timestamp: SystemTime::now(),
                            len: self.ledger.len(),
                        }),
                    );
                    Ok(())
                }
                Err(err) => {
                    log::error!("Could not persist chain to {}: {}", path.display(), err);
                    Err(err)
                }
            },
            None => Ok(()),
        };

        if let Some((shutdown, event_bus)) = self.event_bus.take() {
            let _ = shutdown.send(());
            if event_bus.join().is_err() {
                log::error!("The event bus panicked");
            }
        }
        persisted
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        // Errors were logged by shutdown.
        let _ = self.shutdown();
    }
}

#[derive(Debug)]
pub enum NodeError {
    Io(io::Error),
    /// An HTTP client for the observer sink or the relay could not be built.
    Bridge(BridgeError),
}

impl From<io::Error> for NodeError {
    fn from(value: io::Error) -> Self {
        NodeError::Io(value)
    }
}

impl From<BridgeError> for NodeError {
    fn from(value: BridgeError) -> Self {
        NodeError::Bridge(value)
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::Io(err) => write!(f, "could not start node: {}", err),
            NodeError::Bridge(err) => write!(f, "could not start node: {}", err),
        }
    }
}

impl std::error::Error for NodeError {}
