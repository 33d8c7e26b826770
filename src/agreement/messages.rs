/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Messages of the three-phase agreement protocol and of the simple vote endpoint.
//!
//! [PrePrepare], [PrepareMsg] and [CommitMsg] are signed over the canonical
//! [vote message](crate::identity::vote_message) `"{block_hash}:{seq}:{view}"`; a [Vote] is signed
//! over `"{block_hash}:{round}"`. Every message names its signer by hex-encoded public key and is
//! verified individually, there is no signature aggregation.

use serde::{Deserialize, Serialize};

use crate::{
    identity::{vote_message, Identity},
    types::{Block, SequenceNumber, ViewNumber},
};

/// Data types that contain: 1. A message, and 2. A digital signature over said message whose
/// correctness can be verified through an [Identity].
pub(crate) trait SignedMessage {
    /// Get the bytes that are passed as input into the signing function to form the signature.
    fn message_bytes(&self) -> Vec<u8>;

    /// Hex-encoded public key of the claimed signer.
    fn signer(&self) -> &str;

    /// Hex-encoded signature.
    fn signature(&self) -> &str;

    /// Verify that `signature` is a signature created by `signer` over `message_bytes`.
    fn is_correct(&self, identity: &dyn Identity) -> bool {
        identity.verify(self.signer(), &self.message_bytes(), self.signature())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrePrepare {
    pub view: ViewNumber,
    pub seq: SequenceNumber,
    pub block: Block,
    pub leader: String,
    pub sig: String,
}

impl PrePrepare {
    /// Create a pre-prepare signed by the local key, or `None` if there is no local key.
    pub fn new(identity: &dyn Identity, view: ViewNumber, seq: SequenceNumber, block: Block) -> Option<PrePrepare> {
        let leader = identity.public_key()?;
        let sig = identity.sign(vote_message(&block.hash, seq, view).as_bytes())?;
        Some(PrePrepare {
            view,
            seq,
            block,
            leader,
            sig,
        })
    }
}

impl SignedMessage for PrePrepare {
    fn message_bytes(&self) -> Vec<u8> {
        vote_message(&self.block.hash, self.seq, self.view).into_bytes()
    }

    fn signer(&self) -> &str {
        &self.leader
    }

    fn signature(&self) -> &str {
        &self.sig
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareMsg {
    pub view: ViewNumber,
    pub seq: SequenceNumber,
    pub hash: String,
    pub voter: String,
    pub sig: String,
}

impl PrepareMsg {
    pub fn new(identity: &dyn Identity, view: ViewNumber, seq: SequenceNumber, hash: String) -> Option<PrepareMsg> {
        let voter = identity.public_key()?;
        let sig = identity.sign(vote_message(&hash, seq, view).as_bytes())?;
        Some(PrepareMsg {
            view,
            seq,
            hash,
            voter,
            sig,
        })
    }
}

impl SignedMessage for PrepareMsg {
    fn message_bytes(&self) -> Vec<u8> {
        vote_message(&self.hash, self.seq, self.view).into_bytes()
    }

    fn signer(&self) -> &str {
        &self.voter
    }

    fn signature(&self) -> &str {
        &self.sig
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMsg {
    pub view: ViewNumber,
    pub seq: SequenceNumber,
    pub hash: String,
    pub voter: String,
    pub sig: String,
}

impl CommitMsg {
    pub fn new(identity: &dyn Identity, view: ViewNumber, seq: SequenceNumber, hash: String) -> Option<CommitMsg> {
        let voter = identity.public_key()?;
        let sig = identity.sign(vote_message(&hash, seq, view).as_bytes())?;
        Some(CommitMsg {
            view,
            seq,
            hash,
            voter,
            sig,
        })
    }
}

impl SignedMessage for CommitMsg {
    fn message_bytes(&self) -> Vec<u8> {
        vote_message(&self.hash, self.seq, self.view).into_bytes()
    }

    fn signer(&self) -> &str {
        &self.voter
    }

    fn signature(&self) -> &str {
        &self.sig
    }
}

/// A standalone vote for a block, outside the three-phase protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub block_hash: String,
    pub voter_pub: String,
    pub signature: String,
    pub round: u64,
}

impl Vote {
    pub fn new(identity: &dyn Identity, block_hash: String, round: u64) -> Option<Vote> {
        let voter_pub = identity.public_key()?;
        let signature = identity.sign(format!("{}:{}", block_hash, round).as_bytes())?;
        Some(Vote {
            block_hash,
            voter_pub,
            signature,
            round,
        })
    }
}

impl SignedMessage for Vote {
    fn message_bytes(&self) -> Vec<u8> {
        format!("{}:{}", self.block_hash, self.round).into_bytes()
    }

    fn signer(&self) -> &str {
        &self.voter_pub
    }

    fn signature(&self) -> &str {
        &self.signature
    }
}

/// A request to the agreement endpoint: `{"kind": ..., "body": {...}}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "camelCase")]
pub enum AgreementMessage {
    PrePrepare(PrePrepare),
    Prepare(PrepareMsg),
    Commit(CommitMsg),
    Vote(Vote),
}

/// The agreement endpoint's answer to every request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
    /// Distinct voters counted so far, for vote-carrying requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub votes: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    pub fn ok() -> Ack {
        Ack {
            ok: true,
            votes: None,
            error: None,
        }
    }

    pub fn with_votes(votes: usize) -> Ack {
        Ack {
            ok: true,
            votes: Some(votes),
            error: None,
        }
    }

    pub fn error(error: impl ToString) -> Ack {
        Ack {
            ok: false,
            votes: None,
            error: Some(error.to_string()),
        }
    }
}
