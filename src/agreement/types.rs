/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the state kept by the [agreement engine](super::AgreementEngine): per-sequence
//! [records](AgreementRecord), the [tallies](VoteTally) that count votes into them, and the
//! [certificates](QuorumCertificate) formed when a tally reaches a quorum.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::{
    identity::{vote_message, Identity},
    types::{SequenceNumber, ViewNumber},
};

use super::{engine::AgreementError, messages::PrePrepare};

/// Progress of one agreement instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Proposed,
    Prepared,
    Committed,
}

/// The voting round a vote or certificate belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VotePhase {
    Prepare,
    Commit,
}

/// Proof that at least a quorum of distinct validators voted for the same view, sequence number and
/// block hash in one phase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumCertificate {
    pub view: ViewNumber,
    pub sequence: SequenceNumber,
    pub block_hash: String,
    pub phase: VotePhase,
    /// `(voter, signature)` pairs, ordered by voter.
    pub signatures: Vec<(String, String)>,
}

impl QuorumCertificate {
    /// Checks that every signature in the certificate is correct, that no voter appears twice, and that
    /// the voters form a quorum of size `quorum`.
    pub fn is_correct(&self, identity: &dyn Identity, quorum: usize) -> bool {
        let message = vote_message(&self.block_hash, self.sequence, self.view);
        let distinct = self
            .signatures
            .windows(2)
            .all(|pair| pair[0].0 < pair[1].0);
        distinct
            && self.signatures.len() >= quorum
            && self
                .signatures
                .iter()
                .all(|(voter, signature)| identity.verify(voter, message.as_bytes(), signature))
    }
}

/// Votes of one phase of one sequence number, at most one per voter.
///
/// A voter that votes again replaces its earlier vote, so votes never count twice. Votes for different
/// views or block hashes are counted separately.
#[derive(Clone, Debug, Default)]
pub(crate) struct VoteTally {
    // voter -> (view, block hash, signature)
    votes: BTreeMap<String, (ViewNumber, String, String)>,
}

impl VoteTally {
    /// Record the vote and return the number of distinct voters for its view and block hash.
    pub(crate) fn insert(&mut self, voter: String, view: ViewNumber, block_hash: &str, signature: String) -> usize {
        self.votes
            .insert(voter, (view, block_hash.to_string(), signature));
        self.count(view, block_hash)
    }

    pub(crate) fn count(&self, view: ViewNumber, block_hash: &str) -> usize {
        self.votes
            .values()
            .filter(|(v, hash, _)| *v == view && hash == block_hash)
            .count()
    }

    /// Form a certificate for `(view, block_hash)` from the votes collected so far.
    pub(crate) fn certificate(
        &self,
        phase: VotePhase,
        view: ViewNumber,
        sequence: SequenceNumber,
        block_hash: &str,
    ) -> QuorumCertificate {
        let signatures = self
            .votes
            .iter()
            .filter(|(_, (v, hash, _))| *v == view && hash == block_hash)
            .map(|(voter, (_, _, signature))| (voter.clone(), signature.clone()))
            .collect();
        QuorumCertificate {
            view,
            sequence,
            block_hash: block_hash.to_string(),
            phase,
            signatures,
        }
    }
}

/// Everything known about one sequence number.
#[derive(Clone, Debug)]
pub(crate) struct AgreementRecord {
    pub(crate) pre_prepare: Option<PrePrepare>,
    pub(crate) prepares: VoteTally,
    pub(crate) commits: VoteTally,
    pub(crate) phase: Phase,
    pub(crate) prepared: Option<QuorumCertificate>,
    pub(crate) committed: Option<QuorumCertificate>,
    /// Whether this node has already cast its own commit vote.
    pub(crate) commit_sent: bool,
}

impl AgreementRecord {
    fn new() -> AgreementRecord {
        AgreementRecord {
            pre_prepare: None,
            prepares: VoteTally::default(),
            commits: VoteTally::default(),
            phase: Phase::Proposed,
            prepared: None,
            committed: None,
            commit_sent: false,
        }
    }

    /// If the prepare and commit tallies both hold a quorum for the same view and block hash, and the
    /// record is not committed yet, transition it to [Phase::Committed] and return the commit
    /// certificate.
    pub(crate) fn try_finalize(&mut self, quorum: usize) -> Option<QuorumCertificate> {
        if self.phase == Phase::Committed {
            return None;
        }
        let prepared = self.prepared.as_ref()?;
        if self.commits.count(prepared.view, &prepared.block_hash) < quorum {
            return None;
        }
        let committed = self.commits.certificate(
            VotePhase::Commit,
            prepared.view,
            prepared.sequence,
            &prepared.block_hash,
        );
        self.phase = Phase::Committed;
        self.committed = Some(committed.clone());
        Some(committed)
    }
}

/// Agreement records indexed by sequence number.
///
/// Once a sequence number commits, records `retention` or more sequence numbers below the highest
/// committed one are evicted, and later messages for them are [stale](AgreementError::Stale).
#[derive(Debug, Default)]
pub(crate) struct AgreementTable {
    records: BTreeMap<SequenceNumber, AgreementRecord>,
    highest_committed: Option<SequenceNumber>,
}

impl AgreementTable {
    /// Get the record for `sequence`, creating it if this is the first message that references it.
    pub(crate) fn record_mut(
        &mut self,
        sequence: SequenceNumber,
        retention: u64,
    ) -> Result<&mut AgreementRecord, AgreementError> {
        if self.is_stale(sequence, retention) {
            return Err(AgreementError::Stale(sequence));
        }
        Ok(self
            .records
            .entry(sequence)
            .or_insert_with(AgreementRecord::new))
    }

    pub(crate) fn record(&self, sequence: SequenceNumber) -> Option<&AgreementRecord> {
        self.records.get(&sequence)
    }

    pub(crate) fn highest_committed(&self) -> Option<SequenceNumber> {
        self.highest_committed
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    /// Note that `sequence` committed and evict the records that fell out of the retention window.
    pub(crate) fn mark_committed(&mut self, sequence: SequenceNumber, retention: u64) {
        if self.highest_committed.map_or(true, |highest| sequence > highest) {
            self.highest_committed = Some(sequence);
        }
        if let Some(floor) = self.floor(retention) {
            self.records = self.records.split_off(&floor);
        }
    }

    fn is_stale(&self, sequence: SequenceNumber, retention: u64) -> bool {
        self.floor(retention).map_or(false, |floor| sequence < floor)
    }

    // Lowest sequence number still retained.
    fn floor(&self, retention: u64) -> Option<SequenceNumber> {
        let highest = self.highest_committed?.int();
        let retention = retention.max(1);
        (highest >= retention).then(|| SequenceNumber::new(highest - retention + 1))
    }
}

/// Tally of the simple vote endpoint, per block hash.
///
/// Votes carry a round. Hashes whose latest vote is `retention` or more rounds below the highest round
/// seen are evicted, and later votes for such rounds are [stale](AgreementError::StaleRound).
#[derive(Debug, Default)]
pub(crate) struct SimpleVotes {
    votes: HashMap<String, BTreeMap<String, u64>>,
    highest_round: Option<u64>,
}

impl SimpleVotes {
    /// Record `voter`'s vote for `block_hash` and return the number of distinct voters for it.
    pub(crate) fn insert(
        &mut self,
        block_hash: &str,
        voter: String,
        round: u64,
        retention: u64,
    ) -> Result<usize, AgreementError> {
        if self.floor(retention).map_or(false, |floor| round < floor) {
            return Err(AgreementError::StaleRound(round));
        }
        if self.highest_round.map_or(true, |highest| round > highest) {
            self.highest_round = Some(round);
            if let Some(floor) = self.floor(retention) {
                self.votes
                    .retain(|_, voters| voters.values().max().map_or(false, |latest| *latest >= floor));
            }
        }

        let voters = self.votes.entry(block_hash.to_string()).or_default();
        voters.insert(voter, round);
        Ok(voters.len())
    }

    pub(crate) fn remove(&mut self, block_hash: &str) {
        self.votes.remove(block_hash);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.votes.len()
    }

    // Lowest round still retained.
    fn floor(&self, retention: u64) -> Option<u64> {
        let highest = self.highest_round?;
        let retention = retention.max(1);
        (highest >= retention).then(|| highest - retention + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Ed25519Identity;

    const VIEW: ViewNumber = ViewNumber::init();

    #[test]
    fn repeated_votes_do_not_count_twice() {
        let mut tally = VoteTally::default();
        assert_eq!(tally.insert("a".into(), VIEW, "h1", "s".into()), 1);
        assert_eq!(tally.insert("a".into(), VIEW, "h1", "s".into()), 1);
        assert_eq!(tally.insert("b".into(), VIEW, "h1", "s".into()), 2);
    }

    #[test]
    fn different_hashes_are_counted_separately() {
        let mut tally = VoteTally::default();
        tally.insert("a".into(), VIEW, "h1", "s".into());
        tally.insert("b".into(), VIEW, "h2", "s".into());
        assert_eq!(tally.count(VIEW, "h1"), 1);
        assert_eq!(tally.count(VIEW, "h2"), 1);

        // A later vote replaces the voter's earlier one.
        assert_eq!(tally.insert("a".into(), VIEW, "h2", "s".into()), 2);
        assert_eq!(tally.count(VIEW, "h1"), 0);
    }

    #[test]
    fn finalizing_requires_matching_prepare_and_commit_quorums() {
        let mut record = AgreementRecord::new();
        for voter in ["a", "b", "c"] {
            record.commits.insert(voter.into(), VIEW, "h1", "s".into());
        }
        // Commit quorum alone is not enough.
        assert!(record.try_finalize(3).is_none());

        record.prepared = Some(record.prepares.certificate(VotePhase::Prepare, VIEW, SequenceNumber::init(), "h2"));
        assert!(record.try_finalize(3).is_none());

        record.prepared = Some(record.prepares.certificate(VotePhase::Prepare, VIEW, SequenceNumber::init(), "h1"));
        let certificate = record.try_finalize(3).unwrap();
        assert_eq!(certificate.signatures.len(), 3);
        assert_eq!(record.phase, Phase::Committed);

        // Only once.
        assert!(record.try_finalize(3).is_none());
    }

    #[test]
    fn old_records_are_evicted_after_commit() {
        let mut table = AgreementTable::default();
        for seq in 1..=5 {
            table.record_mut(SequenceNumber::new(seq), 2).unwrap();
        }
        table.mark_committed(SequenceNumber::new(4), 2);

        assert_eq!(table.len(), 3);
        assert!(table.record(SequenceNumber::new(2)).is_none());
        assert!(table.record(SequenceNumber::new(3)).is_some());
        assert!(matches!(
            table.record_mut(SequenceNumber::new(2), 2),
            Err(AgreementError::Stale(_))
        ));
        assert!(table.record_mut(SequenceNumber::new(3), 2).is_ok());
    }

    #[test]
    fn certificates_are_verifiable() {
        let voters: Vec<Ed25519Identity> = (0..3).map(|_| Ed25519Identity::generate()).collect();
        let seq = SequenceNumber::new(7);
        let mut tally = VoteTally::default();
        for voter in &voters {
            let signature = voter.sign(vote_message("h1", seq, VIEW).as_bytes()).unwrap();
            tally.insert(voter.public_key().unwrap(), VIEW, "h1", signature);
        }
        let certificate = tally.certificate(VotePhase::Prepare, VIEW, seq, "h1");

        let verifier = Ed25519Identity::verify_only();
        assert!(certificate.is_correct(&verifier, 3));
        assert!(!certificate.is_correct(&verifier, 4));

        let mut forged = certificate;
        forged.block_hash = "h2".into();
        assert!(!forged.is_correct(&verifier, 3));
    }

    #[test]
    fn simple_votes_for_old_rounds_are_evicted() {
        let mut votes = SimpleVotes::default();
        assert_eq!(votes.insert("h1", "a".into(), 1, 2).unwrap(), 1);
        assert_eq!(votes.insert("h1", "b".into(), 1, 2).unwrap(), 2);
        assert_eq!(votes.insert("h2", "a".into(), 2, 2).unwrap(), 1);
        assert_eq!(votes.len(), 2);

        // Round 3 leaves rounds 2 and 3 in the window, so the hash last voted on in round 1 goes.
        assert_eq!(votes.insert("h3", "a".into(), 3, 2).unwrap(), 1);
        assert_eq!(votes.len(), 2);
        assert!(matches!(votes.insert("h1", "c".into(), 1, 2), Err(AgreementError::StaleRound(1))));

        // A hash that keeps being voted on stays.
        assert_eq!(votes.insert("h2", "b".into(), 3, 2).unwrap(), 2);
        assert_eq!(votes.insert("h4", "a".into(), 4, 2).unwrap(), 1);
        assert_eq!(votes.insert("h2", "c".into(), 4, 2).unwrap(), 3);
    }
}
