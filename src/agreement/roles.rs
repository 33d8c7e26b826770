/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that determine who leads a sequence number, whose votes count, and how many of them make
//! a quorum.
//!
//! ## With and without a roster
//!
//! ||Roster configured|No roster (degraded mode)|
//! |---|---|---|
//! |Leader of `seq`|`roster[seq mod n]`|anyone|
//! |Eligible voters|roster members|any well-formed public key|
//! |Quorum|`⌊2n/3⌋ + 1`, `n = |roster|`|`⌊2n/3⌋ + 1`, `n = |peer set|`|

use crate::{
    networking::PeerSet,
    types::{basic::quorum_size, validators::parse_public_key, SequenceNumber, ValidatorRoster},
};

use super::engine::AgreementError;

/// Hex-encoded public key of the leader of `sequence`, or `None` if no roster is configured.
pub fn leader(roster: Option<&ValidatorRoster>, sequence: SequenceNumber) -> Option<String> {
    roster?.leader(sequence).map(|validator| validator.identity())
}

/// Whether `public_key` may propose `sequence`.
pub fn is_leader(roster: Option<&ValidatorRoster>, public_key: &str, sequence: SequenceNumber) -> bool {
    match roster {
        Some(roster) => {
            let Some(public_key) = parse_public_key(public_key) else {
                return false;
            };
            roster
                .leader(sequence)
                .map_or(false, |leader| leader.public_key == public_key)
        }
        None => true,
    }
}

/// Check that `voter` may vote and return its canonical hex form, which votes are tallied under.
pub(crate) fn eligible_voter(roster: Option<&ValidatorRoster>, voter: &str) -> Result<String, AgreementError> {
    let public_key = parse_public_key(voter).ok_or(AgreementError::InvalidSignature)?;
    if let Some(roster) = roster {
        if !roster.contains(&public_key) {
            return Err(AgreementError::UnknownVoter(voter.to_string()));
        }
    }
    Ok(hex::encode(public_key.to_bytes()))
}

pub fn quorum(roster: Option<&ValidatorRoster>, peers: &PeerSet) -> usize {
    match roster {
        Some(roster) => roster.quorum(),
        None => quorum_size(peers.len()),
    }
}
