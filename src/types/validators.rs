/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [ValidatorRoster]: the ordered, fixed-for-the-epoch list of validators that votes are counted
//! against.
//!
//! The roster is distinct from the [peer set](crate::networking::PeerSet). Peers are whoever the node
//! happens to be connected to; validators are the identities whose signatures count towards a quorum.
//! Position in the roster determines leadership, so every node must load the roster in the same order.

use std::{fmt, fs, path::Path};

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use super::basic::{quorum_size, SequenceNumber};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validator {
    pub public_key: VerifyingKey,
    /// Address of the validator's agreement endpoint.
    pub address: String,
}

impl Validator {
    pub fn new(public_key: VerifyingKey, address: String) -> Validator {
        Validator {
            public_key,
            address,
        }
    }

    /// Hex encoding of the public key, the form identities take on the wire.
    pub fn identity(&self) -> String {
        hex::encode(self.public_key.to_bytes())
    }
}

/// On-disk form of a roster entry.
#[derive(Serialize, Deserialize)]
struct ValidatorEntry {
    public_key: String,
    address: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidatorRoster {
    validators: Vec<Validator>,
}

impl ValidatorRoster {
    pub fn new(validators: Vec<Validator>) -> ValidatorRoster {
        ValidatorRoster { validators }
    }

    /// Load a roster from a JSON array of `{"public_key": hex, "address": "host:port"}` entries.
    pub fn load(path: impl AsRef<Path>) -> Result<ValidatorRoster, RosterError> {
        let bytes = fs::read(path)?;
        let entries: Vec<ValidatorEntry> = serde_json::from_slice(&bytes)?;
        let validators = entries
            .into_iter()
            .map(|entry| {
                let public_key = parse_public_key(&entry.public_key)
                    .ok_or(RosterError::InvalidPublicKey(entry.public_key))?;
                Ok(Validator::new(public_key, entry.address))
            })
            .collect::<Result<Vec<Validator>, RosterError>>()?;
        Ok(ValidatorRoster::new(validators))
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn validators(&self) -> impl Iterator<Item = &Validator> {
        self.validators.iter()
    }

    pub fn contains(&self, public_key: &VerifyingKey) -> bool {
        self.position(public_key).is_some()
    }

    pub fn position(&self, public_key: &VerifyingKey) -> Option<usize> {
        self.validators
            .iter()
            .position(|validator| &validator.public_key == public_key)
    }

    /// `roster[sequence mod n]`, or `None` for an empty roster.
    pub fn leader(&self, sequence: SequenceNumber) -> Option<&Validator> {
        if self.validators.is_empty() {
            return None;
        }
        let index = (sequence.int() % self.validators.len() as u64) as usize;
        self.validators.get(index)
    }

    pub fn quorum(&self) -> usize {
        quorum_size(self.validators.len())
    }
}

/// Decode a hex-encoded Ed25519 public key. Anything other than exactly 32 valid bytes is rejected.
pub fn parse_public_key(hex_key: &str) -> Option<VerifyingKey> {
    let bytes: [u8; 32] = hex::decode(hex_key).ok()?.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

#[derive(Debug)]
pub enum RosterError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    InvalidPublicKey(String),
}

impl From<std::io::Error> for RosterError {
    fn from(value: std::io::Error) -> Self {
        RosterError::Io(value)
    }
}

impl From<serde_json::Error> for RosterError {
    fn from(value: serde_json::Error) -> Self {
        RosterError::Serialization(value)
    }
}

impl fmt::Display for RosterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RosterError::Io(err) => write!(f, "cannot read validator roster: {}", err),
            RosterError::Serialization(err) => write!(f, "malformed validator roster: {}", err),
            RosterError::InvalidPublicKey(key) => write!(f, "invalid validator public key {}", key),
        }
    }
}

impl std::error::Error for RosterError {}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn roster_of(n: u8) -> ValidatorRoster {
        ValidatorRoster::new(
            (1..=n)
                .map(|i| {
                    let key = SigningKey::from_bytes(&[i; 32]).verifying_key();
                    Validator::new(key, format!("127.0.0.1:{}", 7000 + i as u16))
                })
                .collect(),
        )
    }

    #[test]
    fn leader_rotates_by_sequence() {
        let roster = roster_of(4);
        let validators: Vec<&Validator> = roster.validators().collect();
        assert_eq!(roster.leader(SequenceNumber::new(1)), Some(validators[1]));
        assert_eq!(roster.leader(SequenceNumber::new(4)), Some(validators[0]));
        assert_eq!(roster.leader(SequenceNumber::new(7)), Some(validators[3]));
        assert_eq!(
            roster.leader(SequenceNumber::new(9)),
            roster.leader(SequenceNumber::new(9))
        );
        assert!(ValidatorRoster::default().leader(SequenceNumber::new(1)).is_none());
    }

    #[test]
    fn rejects_short_public_keys() {
        assert!(parse_public_key("abcd").is_none());
        assert!(parse_public_key("not hex").is_none());
        let key = SigningKey::from_bytes(&[3; 32]).verifying_key();
        assert_eq!(parse_public_key(&hex::encode(key.to_bytes())), Some(key));
    }
}
