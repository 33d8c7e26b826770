/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [TcpGossip]: a TCP overlay.
//!
//! Publishing opens one short-lived connection per member, each on its own thread, and writes a single
//! frame. A frame is the little-endian `u32` length of a borsh-serialized [GossipMessage] followed by
//! those bytes. Members do not relay what they receive.

use std::{
    collections::BTreeSet,
    io::{self, Read, Write},
    net::{TcpListener, TcpStream},
    sync::{
        mpsc::{Receiver, TryRecvError},
        Arc, PoisonError, RwLock,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::networking::client::dial;

use super::{Gossip, GossipMessage, Subscriptions, Topic};

/// Frames larger than this are treated as malformed.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const DIAL_TIMEOUT: Duration = Duration::from_secs(2);
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct TcpGossip {
    local_id: String,
    members: RwLock<BTreeSet<String>>,
    subscriptions: Subscriptions,
}

impl TcpGossip {
    /// Create an overlay member identified by its advertised gossip address `local_id`, publishing to
    /// `members`.
    pub fn new(local_id: impl Into<String>, members: impl IntoIterator<Item = String>) -> Arc<TcpGossip> {
        let local_id = local_id.into();
        let members = members
            .into_iter()
            .filter(|member| member != &local_id)
            .collect();
        Arc::new(TcpGossip {
            local_id,
            members: RwLock::new(members),
            subscriptions: Subscriptions::default(),
        })
    }

    pub fn add_member(&self, addr: &str) {
        if addr != self.local_id {
            self.members
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(addr.to_string());
        }
    }

    pub fn members(&self) -> Vec<String> {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Spawn the accept loop, delivering the frames read from each inbound connection to local
    /// subscribers until `shutdown_signal` fires.
    pub fn start(
        self: &Arc<Self>,
        listener: TcpListener,
        shutdown_signal: Receiver<()>,
    ) -> io::Result<JoinHandle<()>> {
        listener.set_nonblocking(true)?;
        let gossip = self.clone();
        Ok(thread::spawn(move || loop {
            match shutdown_signal.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => (),
            }

            match listener.accept() {
                Ok((stream, _)) => {
                    let gossip = gossip.clone();
                    thread::spawn(move || {
                        if let Err(err) = gossip.receive(stream) {
                            log::debug!("Dropping gossip connection: {}", err);
                        }
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL)
                }
                Err(err) => {
                    log::warn!("Gossip accept failed: {}", err);
                    thread::sleep(ACCEPT_POLL_INTERVAL)
                }
            }
        }))
    }

    fn receive(&self, mut stream: TcpStream) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        while let Some(message) = read_frame(&mut stream)? {
            self.subscriptions.deliver(&message);
        }
        Ok(())
    }
}

impl Gossip for TcpGossip {
    fn local_id(&self) -> String {
        self.local_id.clone()
    }

    fn publish(&self, topic: Topic, data: Vec<u8>) {
        let message = GossipMessage {
            topic,
            origin: self.local_id.clone(),
            data,
        };
        self.subscriptions.deliver(&message);
        for member in self.members() {
            let message = message.clone();
            thread::spawn(move || {
                let sent = dial(&member, DIAL_TIMEOUT).and_then(|mut stream| {
                    stream.set_write_timeout(Some(DIAL_TIMEOUT))?;
                    write_frame(&mut stream, &message)
                });
                if let Err(err) = sent {
                    log::debug!("Gossip to {} on {} failed: {}", member, message.topic.name(), err);
                }
            });
        }
    }

    fn subscribe(&self, topic: Topic) -> Receiver<GossipMessage> {
        self.subscriptions.subscribe(topic)
    }

    fn peer_count(&self) -> usize {
        self.members.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub fn write_frame(writer: &mut impl Write, message: &GossipMessage) -> io::Result<()> {
    let bytes = message.try_to_vec()?;
    let len = u32::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "gossip frame too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&bytes)?;
    writer.flush()
}

/// Read one frame, or `None` if the stream ended cleanly before it.
pub fn read_frame(reader: &mut impl Read) -> io::Result<Option<GossipMessage>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => (),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("gossip frame of {} bytes", len),
        ));
    }
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    GossipMessage::try_from_slice(&bytes).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_length_prefixed() {
        let message = GossipMessage {
            topic: Topic::Transactions,
            origin: "127.0.0.1:7000".into(),
            data: br#"{"data":"hi"}"#.to_vec(),
        };
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &message).unwrap();
        let len = u32::from_le_bytes(buffer[..4].try_into().unwrap()) as usize;
        assert_eq!(len, buffer.len() - 4);

        let mut reader = buffer.as_slice();
        assert_eq!(read_frame(&mut reader).unwrap(), Some(message));
        assert_eq!(read_frame(&mut reader).unwrap(), None);
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let mut reader: &[u8] = &u32::MAX.to_le_bytes();
        assert!(read_frame(&mut reader).is_err());
    }
}
