/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Outbound, timeout-bounded connections to peers.

use std::{
    io::{self, BufReader, Write},
    net::{TcpStream, ToSocketAddrs},
    thread,
    time::Duration,
};

use crate::types::Block;

use super::messages::{Envelope, WireMessage};

/// Connect to `addr`, trying each address it resolves to for at most `timeout`.
pub fn dial(addr: &str, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{} did not resolve to any address", addr),
    );
    for socket_addr in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&socket_addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = err,
        }
    }
    Err(last_err)
}

/// Write `message` as one newline-terminated envelope.
pub fn write_message(writer: &mut impl Write, message: WireMessage, from: &str) -> io::Result<()> {
    let envelope = message.into_envelope(from)?;
    serde_json::to_writer(&mut *writer, &envelope)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Dial `addr`, write a single message and close the connection.
pub fn send_message(addr: &str, message: WireMessage, from: &str, timeout: Duration) -> io::Result<()> {
    let mut stream = dial(addr, timeout)?;
    stream.set_write_timeout(Some(timeout))?;
    write_message(&mut stream, message, from)
}

/// Send `message` to every address in `peers`, each on its own thread. Failures are logged and otherwise
/// ignored.
pub fn broadcast(peers: Vec<String>, message: WireMessage, from: &str, timeout: Duration) {
    for peer in peers {
        let message = message.clone();
        let from = from.to_string();
        thread::spawn(move || {
            if let Err(err) = send_message(&peer, message, &from, timeout) {
                log::debug!("Broadcast to {} failed: {}", peer, err);
            }
        });
    }
}

/// Ask `addr` for its full chain and wait at most `timeout` for each step of the exchange.
pub fn fetch_chain(addr: &str, from: &str, timeout: Duration) -> io::Result<Vec<Block>> {
    let mut stream = dial(addr, timeout)?;
    stream.set_write_timeout(Some(timeout))?;
    stream.set_read_timeout(Some(timeout))?;
    write_message(&mut stream, WireMessage::RequestChain, from)?;

    let reader = BufReader::new(&stream);
    for envelope in serde_json::Deserializer::from_reader(reader).into_iter::<Envelope>() {
        // The peer may say other things (e.g. a peer list) before answering.
        if let Ok(WireMessage::Chain(chain)) = envelope?.decode() {
            return Ok(chain.chain);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("{} closed the connection without sending its chain", addr),
    ))
}
