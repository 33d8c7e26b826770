/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [BridgeClient]: the execution engine's request/response protocol.
//!
//! Every call opens a new connection, writes one raw JSON request and (except for `commit_block`) reads
//! one raw JSON response:
//!
//! ```text
//! {"cmd":"submit_tx","data":{"data":"<payload>"}}   ->  {"ok":true,"block":{...}}
//! {"cmd":"get_chain"}                               ->  {"chain":[...]}
//! {"cmd":"commit_block","data":{"hash":"<hash>"}}   ->  (nothing)
//! ```

use std::{
    io::Write,
    net::TcpStream,
    time::Duration,
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{networking::client::dial, types::Block};

use super::{BridgeError, ExecutionEngine};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(2);
pub const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Serialize)]
#[serde(tag = "cmd", content = "data", rename_all = "snake_case")]
enum BridgeRequest<'a> {
    SubmitTx { data: &'a str },
    GetChain,
    CommitBlock { hash: &'a str },
}

#[derive(Deserialize)]
struct SubmitTxResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    block: Option<Block>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct GetChainResponse {
    chain: Vec<Block>,
}

#[derive(Clone, Debug)]
pub struct BridgeClient {
    addr: String,
    connect_timeout: Duration,
    write_timeout: Duration,
    read_timeout: Duration,
}

impl BridgeClient {
    pub fn new(addr: impl Into<String>) -> BridgeClient {
        BridgeClient {
            addr: addr.into(),
            connect_timeout: CONNECT_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
            read_timeout: READ_TIMEOUT,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn send(&self, request: &BridgeRequest) -> Result<TcpStream, BridgeError> {
        let mut stream = dial(&self.addr, self.connect_timeout)?;
        stream.set_write_timeout(Some(self.write_timeout))?;
        stream.set_read_timeout(Some(self.read_timeout))?;
        serde_json::to_writer(&mut stream, request)?;
        stream.flush()?;
        Ok(stream)
    }

    fn exchange<T: DeserializeOwned>(&self, request: &BridgeRequest) -> Result<T, BridgeError> {
        let stream = self.send(request)?;
        let response = serde_json::Deserializer::from_reader(&stream)
            .into_iter::<T>()
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "execution engine closed the connection without answering",
                )
            })??;
        Ok(response)
    }
}

impl ExecutionEngine for BridgeClient {
    fn submit_tx(&self, data: &str) -> Result<Block, BridgeError> {
        let response: SubmitTxResponse = self.exchange(&BridgeRequest::SubmitTx { data })?;
        if !response.ok {
            return Err(BridgeError::Rejected(
                response.error.unwrap_or_else(|| String::from("ok = false")),
            ));
        }
        response.block.ok_or(BridgeError::MissingBlock)
    }

    fn get_chain(&self) -> Result<Vec<Block>, BridgeError> {
        let response: GetChainResponse = self.exchange(&BridgeRequest::GetChain)?;
        Ok(response.chain)
    }

    fn commit_block(&self, block_hash: &str) -> Result<(), BridgeError> {
        self.send(&BridgeRequest::CommitBlock { hash: block_hash })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_match_the_engine_protocol() {
        assert_eq!(
            serde_json::to_string(&BridgeRequest::SubmitTx { data: "hello" }).unwrap(),
            r#"{"cmd":"submit_tx","data":{"data":"hello"}}"#
        );
        assert_eq!(
            serde_json::to_string(&BridgeRequest::GetChain).unwrap(),
            r#"{"cmd":"get_chain"}"#
        );
        assert_eq!(
            serde_json::to_string(&BridgeRequest::CommitBlock { hash: "00ab" }).unwrap(),
            r#"{"cmd":"commit_block","data":{"hash":"00ab"}}"#
        );
    }

    #[test]
    fn unreachable_engine_is_an_error() {
        // Nothing listens on port 1 of the loopback interface.
        let client = BridgeClient::new("127.0.0.1:1");
        assert!(matches!(client.submit_tx("x"), Err(BridgeError::Io(_))));
    }
}
