/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [AgreementNetwork] trait through which the engine broadcasts its messages, and
//! [TcpAgreementNetwork], which delivers them to the agreement endpoints of the validator roster.
//!
//! Each request to an agreement endpoint is one JSON [AgreementMessage], after which the sender closes
//! its half of the connection and reads back one JSON [Ack].

use std::{
    io::{self, Write},
    net::Shutdown,
    thread,
    time::Duration,
};

use ed25519_dalek::VerifyingKey;

use crate::{networking::client::dial, types::ValidatorRoster};

use super::messages::{Ack, AgreementMessage};

pub trait AgreementNetwork: Send + Sync + 'static {
    /// Send `message` to every other validator. Must not block on the network.
    fn broadcast(&self, message: AgreementMessage);
}

#[derive(Clone)]
pub struct TcpAgreementNetwork {
    targets: Vec<String>,
    timeout: Duration,
}

impl TcpAgreementNetwork {
    /// Broadcast to the addresses of every member of `roster` except the one holding `me`.
    pub fn new(roster: &ValidatorRoster, me: Option<&VerifyingKey>, timeout: Duration) -> TcpAgreementNetwork {
        let targets = roster
            .validators()
            .filter(|validator| Some(&validator.public_key) != me)
            .map(|validator| validator.address.clone())
            .collect();
        TcpAgreementNetwork { targets, timeout }
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }
}

impl AgreementNetwork for TcpAgreementNetwork {
    fn broadcast(&self, message: AgreementMessage) {
        for target in &self.targets {
            let target = target.clone();
            let message = message.clone();
            let timeout = self.timeout;
            thread::spawn(move || match send_request(&target, &message, timeout) {
                Ok(ack) if !ack.ok => log::debug!(
                    "{} rejected agreement message: {}",
                    target,
                    ack.error.unwrap_or_default()
                ),
                Ok(_) => (),
                Err(err) => log::debug!("Could not reach validator {}: {}", target, err),
            });
        }
    }
}

/// Send one request to the agreement endpoint at `addr` and wait for its acknowledgment.
pub fn send_request(addr: &str, message: &AgreementMessage, timeout: Duration) -> io::Result<Ack> {
    let mut stream = dial(addr, timeout)?;
    stream.set_write_timeout(Some(timeout))?;
    stream.set_read_timeout(Some(timeout))?;
    serde_json::to_writer(&mut stream, message)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    stream.shutdown(Shutdown::Write)?;
    Ok(serde_json::from_reader(&stream)?)
}
