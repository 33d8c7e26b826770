/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Exhaustive enumeration of the messages exchanged between peers over the transport.
//!
//! On the wire every message is an [Envelope], a JSON object `{"type": ..., "body": ..., "from": ...}`.
//! Envelopes are written back to back on a connection, each followed by a newline. An envelope is first
//! read with an untyped `body` and then [decoded](Envelope::decode) into a [WireMessage] according to its
//! `type`, so that an unknown type can be skipped without dropping the connection.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Block;

pub const PEER_LIST: &str = "peerList";
pub const TX: &str = "tx";
pub const BLOCK: &str = "block";
pub const REQUEST_CHAIN: &str = "requestChain";
pub const CHAIN: &str = "chain";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Advertised listen address of the sender.
    #[serde(default)]
    pub from: String,
}

impl Envelope {
    pub fn decode(self) -> Result<WireMessage, DecodeError> {
        let body = self.body.unwrap_or(Value::Null);
        let message = match self.kind.as_str() {
            PEER_LIST => WireMessage::PeerList(serde_json::from_value(body)?),
            TX => WireMessage::Tx(serde_json::from_value(body)?),
            BLOCK => WireMessage::Block(serde_json::from_value(body)?),
            REQUEST_CHAIN => WireMessage::RequestChain,
            CHAIN => WireMessage::Chain(serde_json::from_value(body)?),
            _ => return Err(DecodeError::UnknownType(self.kind)),
        };
        Ok(message)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum WireMessage {
    PeerList(PeerList),
    Tx(Transaction),
    Block(Block),
    RequestChain,
    Chain(ChainMsg),
}

impl WireMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::PeerList(_) => PEER_LIST,
            WireMessage::Tx(_) => TX,
            WireMessage::Block(_) => BLOCK,
            WireMessage::RequestChain => REQUEST_CHAIN,
            WireMessage::Chain(_) => CHAIN,
        }
    }

    pub fn into_envelope(self, from: &str) -> Result<Envelope, serde_json::Error> {
        let kind = self.kind().to_string();
        let body = match self {
            WireMessage::PeerList(peer_list) => Some(serde_json::to_value(peer_list)?),
            WireMessage::Tx(transaction) => Some(serde_json::to_value(transaction)?),
            WireMessage::Block(block) => Some(serde_json::to_value(block)?),
            WireMessage::RequestChain => None,
            WireMessage::Chain(chain) => Some(serde_json::to_value(chain)?),
        };
        Ok(Envelope {
            kind,
            body,
            from: from.to_string(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerList {
    pub peers: Vec<String>,
}

/// A transaction payload. Also the gossip encoding of a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub data: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainMsg {
    pub chain: Vec<Block>,
}

#[derive(Debug)]
pub enum DecodeError {
    UnknownType(String),
    Malformed(serde_json::Error),
}

impl From<serde_json::Error> for DecodeError {
    fn from(value: serde_json::Error) -> Self {
        DecodeError::Malformed(value)
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnknownType(kind) => write!(f, "unknown message type {:?}", kind),
            DecodeError::Malformed(err) => write!(f, "malformed message body: {}", err),
        }
    }
}

impl std::error::Error for DecodeError {}
