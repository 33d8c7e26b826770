/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The peer-to-peer transport: an accept loop, one handler thread per connection, and the handshake
//! performed when dialing a peer.
//!
//! ## Connection handling
//!
//! Each connection is a long-lived duplex channel of [envelopes](super::messages::Envelope). Messages
//! are handled as follows:
//! - `peerList`: merge the peers into the [PeerSet](super::PeerSet) and answer with the local list if
//!   it differs from the one received.
//! - `tx`: pass the payload to the [BlockPipeline].
//! - `block`: pass the block to the [BlockPipeline]; if it is correctly signed but does not extend the
//!   local chain (and is not a block the chain already holds), answer with `requestChain`.
//! - `requestChain`: answer with the full chain.
//! - `chain`: offer the chain to the ledger's fork choice rule.
//!
//! Unknown message types are logged and skipped. A malformed envelope ends only the connection it
//! arrived on.

use std::{
    collections::{BTreeSet, HashMap},
    io::{self, BufReader},
    net::{Shutdown, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc::{Receiver, TryRecvError},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::pipeline::{BlockPipeline, BlockReceipt, BlockSource, Rejection};

use super::{
    client::{dial, write_message},
    messages::{ChainMsg, DecodeError, Envelope, PeerList, WireMessage},
};

/// How long the accept loop sleeps when no connection is pending.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Live connections, so that shutdown can close them.
#[derive(Default)]
pub(crate) struct Connections {
    next_id: AtomicU64,
    streams: Mutex<HashMap<u64, TcpStream>>,
}

impl Connections {
    fn register(&self, stream: &TcpStream) -> Option<u64> {
        let clone = stream.try_clone().ok()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, clone);
        Some(id)
    }

    fn deregister(&self, id: u64) {
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Shut down every live connection, which ends their handler threads.
    pub(crate) fn shutdown_all(&self) {
        let streams: Vec<TcpStream> = self
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, stream)| stream)
            .collect();
        for stream in streams {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

#[derive(Clone)]
pub(crate) struct Transport {
    pipeline: Arc<BlockPipeline>,
    connections: Arc<Connections>,
    dial_timeout: Duration,
}

impl Transport {
    pub(crate) fn new(
        pipeline: Arc<BlockPipeline>,
        connections: Arc<Connections>,
        dial_timeout: Duration,
    ) -> Transport {
        Transport {
            pipeline,
            connections,
            dial_timeout,
        }
    }

    /// Spawn the accept loop, which hands each inbound connection to its own handler thread until
    /// `shutdown_signal` fires.
    pub(crate) fn start(
        self,
        listener: TcpListener,
        shutdown_signal: Receiver<()>,
    ) -> io::Result<JoinHandle<()>> {
        listener.set_nonblocking(true)?;
        Ok(thread::spawn(move || loop {
            match shutdown_signal.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => (),
            }

            match listener.accept() {
                Ok((stream, remote)) => {
                    if let Err(err) = stream.set_nonblocking(false) {
                        log::warn!("Dropping connection from {}: {}", remote, err);
                        continue;
                    }
                    let transport = self.clone();
                    thread::spawn(move || transport.serve(stream));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL)
                }
                Err(err) => {
                    log::warn!("Accept failed: {}", err);
                    thread::sleep(ACCEPT_POLL_INTERVAL)
                }
            }
        }))
    }

    /// Dial `peer` on a new thread, perform the handshake (send the local peer list, then request the
    /// peer's chain) and keep handling the connection.
    pub(crate) fn connect(&self, peer: String) -> JoinHandle<()> {
        let transport = self.clone();
        thread::spawn(move || {
            let stream = match dial(&peer, transport.dial_timeout) {
                Ok(stream) => stream,
                Err(err) => {
                    log::warn!("Could not connect to {}: {}", peer, err);
                    return;
                }
            };
            if let Err(err) = transport.handshake(&stream) {
                log::warn!("Handshake with {} failed: {}", peer, err);
                return;
            }
            transport.serve(stream)
        })
    }

    fn handshake(&self, stream: &TcpStream) -> io::Result<()> {
        let peers = self.pipeline.peers();
        let mut writer = stream;
        let peer_list = PeerList {
            peers: peers.advertised().into_iter().collect(),
        };
        write_message(&mut writer, WireMessage::PeerList(peer_list), peers.local_addr())?;
        write_message(&mut writer, WireMessage::RequestChain, peers.local_addr())
    }

    fn serve(&self, stream: TcpStream) {
        let id = self.connections.register(&stream);
        if let Err(err) = self.handle_connection(&stream) {
            log::debug!("Closing connection: {}", err);
        }
        if let Some(id) = id {
            self.connections.deregister(id);
        }
    }

    fn handle_connection(&self, stream: &TcpStream) -> io::Result<()> {
        let mut writer = stream;
        let reader = BufReader::new(stream);
        for envelope in serde_json::Deserializer::from_reader(reader).into_iter::<Envelope>() {
            let envelope = envelope?;
            let from = envelope.from.clone();
            match envelope.decode() {
                Ok(message) => self.dispatch(message, &from, &mut writer)?,
                Err(DecodeError::UnknownType(kind)) => {
                    log::warn!("Ignoring message of unknown type {:?} from {}", kind, from)
                }
                Err(DecodeError::Malformed(err)) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn dispatch(&self, message: WireMessage, from: &str, writer: &mut &TcpStream) -> io::Result<()> {
        let peers = self.pipeline.peers();
        let local_addr = peers.local_addr();
        match message {
            WireMessage::PeerList(peer_list) => {
                let theirs: BTreeSet<String> = peer_list.peers.into_iter().collect();
                peers.merge(theirs.iter().cloned());
                let ours = peers.advertised();
                // Replying only when the lists differ makes the exchange terminate.
                if ours != theirs {
                    let reply = PeerList {
                        peers: ours.into_iter().collect(),
                    };
                    write_message(writer, WireMessage::PeerList(reply), local_addr)?;
                }
            }
            WireMessage::Tx(transaction) => {
                self.pipeline.submit_transaction(&transaction.data);
            }
            WireMessage::Block(block) => {
                if let BlockReceipt::Rejected(Rejection::Append(err)) =
                    self.pipeline.receive_block(block, BlockSource::Transport)
                {
                    log::debug!("Block from {} does not extend the chain ({}), requesting chain", from, err);
                    // Broadcasts arrive on connections their sender never reads, so also fetch the
                    // sender's chain over a connection of our own.
                    self.pipeline.resync_from(from.to_string());
                    write_message(writer, WireMessage::RequestChain, local_addr)?;
                }
            }
            WireMessage::RequestChain => {
                let chain = ChainMsg {
                    chain: self.pipeline.ledger().chain(),
                };
                write_message(writer, WireMessage::Chain(chain), local_addr)?;
            }
            WireMessage::Chain(chain) => {
                self.pipeline.adopt_chain(chain.chain, BlockSource::Transport);
            }
        }
        Ok(())
    }
}
