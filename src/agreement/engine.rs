/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [AgreementEngine]: a sequence-numbered pre-prepare/prepare/commit protocol with round-robin
//! leadership.
//!
//! ## Protocol
//!
//! 1. **Propose**: the leader of the next sequence number signs a pre-prepare for a sealed, signed
//!    block and broadcasts it to every validator. The leader prepares its own proposal.
//! 2. **Pre-prepare**: a validator that receives a pre-prepare checks the block's signature and hash
//!    and the leader's signature, stores the pre-prepare, and broadcasts a prepare vote.
//! 3. **Prepare**: once a quorum of distinct validators prepared the same view and block hash, the
//!    validator broadcasts a commit vote, at most once per sequence number.
//! 4. **Commit**: once a quorum of distinct validators committed the view and block hash that
//!    prepared, the sequence number is final. The [notifier](crate::bridge::Notifier) learns of the
//!    committed hash exactly once.
//!
//! Messages the node sends itself are applied locally rather than looped back through the
//! [network](super::AgreementNetwork).
//!
//! ## Locking
//!
//! All agreement state lives behind a single mutex so that counting a vote and inserting it are never
//! interleaved with another vote for the same record. Network sends, notifications and events are
//! collected while the lock is held and performed after it is released.

use std::{
    fmt,
    sync::{mpsc::Sender, Arc, Mutex, MutexGuard, PoisonError},
    time::SystemTime,
};

use typed_builder::TypedBuilder;

use crate::{
    bridge::{NetworkNotifier, Notifier},
    events::*,
    identity::{verify_block, Identity},
    networking::PeerSet,
    types::{Block, SequenceNumber, ValidatorRoster, ViewNumber},
};

use super::{
    messages::{Ack, AgreementMessage, CommitMsg, PrePrepare, PrepareMsg, SignedMessage, Vote},
    network::AgreementNetwork,
    roles,
    types::{AgreementRecord, AgreementTable, Phase, QuorumCertificate, SimpleVotes, VotePhase},
};

/// Number of sequence numbers below the highest committed one whose records are kept.
pub const DEFAULT_RETENTION: u64 = 16;

/// Takes blocks appended from local transactions and decides whether to put them up for agreement.
pub trait BlockProposer: Send + Sync {
    fn offer(&self, block: &Block);
}

struct AgreementState {
    view: ViewNumber,
    next_sequence: SequenceNumber,
    table: AgreementTable,
    votes: SimpleVotes,
}

impl Default for AgreementState {
    fn default() -> Self {
        AgreementState {
            view: ViewNumber::init(),
            next_sequence: SequenceNumber::init(),
            table: AgreementTable::default(),
            votes: SimpleVotes::default(),
        }
    }
}

/// Side effects of handling one message, performed once the state lock is released.
#[derive(Default)]
struct Outbox {
    messages: Vec<AgreementMessage>,
    events: Vec<Event>,
    committed: Option<QuorumCertificate>,
}

#[derive(TypedBuilder)]
pub struct AgreementEngine<N: AgreementNetwork> {
    identity: Arc<dyn Identity>,
    /// Without a roster the engine runs in degraded mode (see [roles]).
    #[builder(default)]
    roster: Option<ValidatorRoster>,
    peers: Arc<PeerSet>,
    network: N,
    #[builder(default = Arc::new(NetworkNotifier::default()) as Arc<dyn Notifier>)]
    notifier: Arc<dyn Notifier>,
    #[builder(default = DEFAULT_RETENTION)]
    retention: u64,
    #[builder(default)]
    event_publisher: Option<Sender<Event>>,
    #[builder(default, setter(skip))]
    state: Mutex<AgreementState>,
}

impl<N: AgreementNetwork> AgreementEngine<N> {
    /// Put `block` up for agreement under the next sequence number.
    ///
    /// Fails without consuming a sequence number if the node has no key, the block is not properly
    /// signed, or the roster names another leader for the next sequence number.
    pub fn propose(&self, block: Block) -> Result<PrePrepare, AgreementError> {
        let local_key = self.identity.public_key().ok_or(AgreementError::MissingLocalKey)?;
        check_block(self.identity.as_ref(), &block)?;
        let quorum = self.quorum();

        let mut outbox = Outbox::default();
        let pre_prepare = {
            let mut state = self.lock_state();
            let state = &mut *state;
            let (view, seq) = (state.view, state.next_sequence);
            if !roles::is_leader(self.roster.as_ref(), &local_key, seq) {
                return Err(AgreementError::WrongLeader(seq));
            }
            let pre_prepare = PrePrepare::new(self.identity.as_ref(), view, seq, block)
                .ok_or(AgreementError::MissingLocalKey)?;

            let record = state.table.record_mut(seq, self.retention)?;
            if record.pre_prepare.is_some() {
                return Err(AgreementError::ConflictingPrePrepare(seq));
            }
            record.pre_prepare = Some(pre_prepare.clone());
            state.next_sequence += 1;

            outbox.events.push(Event::Propose(ProposeEvent {
                timestamp: SystemTime::now(),
                pre_prepare: pre_prepare.clone(),
            }));
            outbox.messages.push(AgreementMessage::PrePrepare(pre_prepare.clone()));
            self.cast_prepare(record, view, seq, &pre_prepare.block.hash, quorum, &mut outbox);
            self.settle(state, seq, &mut outbox);
            pre_prepare
        };

        log::info!("Proposed block {} at sequence {}", pre_prepare.block.index, pre_prepare.seq);
        self.flush(outbox);
        Ok(pre_prepare)
    }

    pub fn on_receive_pre_prepare(&self, pre_prepare: PrePrepare) -> Result<Ack, AgreementError> {
        check_block(self.identity.as_ref(), &pre_prepare.block)?;
        let seq = pre_prepare.seq;
        if !roles::is_leader(self.roster.as_ref(), &pre_prepare.leader, seq) {
            return Err(AgreementError::WrongLeader(seq));
        }
        if !pre_prepare.is_correct(self.identity.as_ref()) {
            return Err(AgreementError::InvalidSignature);
        }
        let quorum = self.quorum();

        let mut outbox = Outbox::default();
        {
            let mut state = self.lock_state();
            let state = &mut *state;
            let record = state.table.record_mut(seq, self.retention)?;
            if let Some(existing) = &record.pre_prepare {
                // Redelivery of the stored pre-prepare is a no-op; anything else is equivocation.
                return if existing.view == pre_prepare.view && existing.block.hash == pre_prepare.block.hash {
                    Ok(Ack::ok())
                } else {
                    Err(AgreementError::ConflictingPrePrepare(seq))
                };
            }
            record.pre_prepare = Some(pre_prepare.clone());
            outbox.events.push(Event::ReceivePrePrepare(ReceivePrePrepareEvent {
                timestamp: SystemTime::now(),
                pre_prepare: pre_prepare.clone(),
            }));
            self.cast_prepare(record, pre_prepare.view, seq, &pre_prepare.block.hash, quorum, &mut outbox);
            if seq >= state.next_sequence {
                state.next_sequence = seq + 1;
            }
            self.settle(state, seq, &mut outbox);
        }

        self.flush(outbox);
        Ok(Ack::ok())
    }

    pub fn on_receive_prepare(&self, prepare: PrepareMsg) -> Result<Ack, AgreementError> {
        let voter = roles::eligible_voter(self.roster.as_ref(), &prepare.voter)?;
        if !prepare.is_correct(self.identity.as_ref()) {
            return Err(AgreementError::InvalidSignature);
        }
        let quorum = self.quorum();

        let mut outbox = Outbox::default();
        let votes = {
            let mut state = self.lock_state();
            let state = &mut *state;
            let record = state.table.record_mut(prepare.seq, self.retention)?;
            let votes = record
                .prepares
                .insert(voter, prepare.view, &prepare.hash, prepare.sig.clone());
            outbox.events.push(Event::ReceivePrepare(ReceivePrepareEvent {
                timestamp: SystemTime::now(),
                prepare: prepare.clone(),
                votes,
            }));
            self.on_prepare_counted(record, prepare.view, prepare.seq, &prepare.hash, votes, quorum, &mut outbox);
            self.settle(state, prepare.seq, &mut outbox);
            votes
        };

        self.flush(outbox);
        Ok(Ack::with_votes(votes))
    }

    pub fn on_receive_commit(&self, commit: CommitMsg) -> Result<Ack, AgreementError> {
        let voter = roles::eligible_voter(self.roster.as_ref(), &commit.voter)?;
        if !commit.is_correct(self.identity.as_ref()) {
            return Err(AgreementError::InvalidSignature);
        }
        let quorum = self.quorum();

        let mut outbox = Outbox::default();
        let votes = {
            let mut state = self.lock_state();
            let state = &mut *state;
            let record = state.table.record_mut(commit.seq, self.retention)?;
            let votes = record
                .commits
                .insert(voter, commit.view, &commit.hash, commit.sig.clone());
            outbox.events.push(Event::ReceiveCommit(ReceiveCommitEvent {
                timestamp: SystemTime::now(),
                commit: commit.clone(),
                votes,
            }));
            outbox.committed = record.try_finalize(quorum);
            self.settle(state, commit.seq, &mut outbox);
            votes
        };

        self.flush(outbox);
        Ok(Ack::with_votes(votes))
    }

    /// Tally a vote on the simple vote endpoint and return the number of distinct voters for its block.
    pub fn on_receive_vote(&self, vote: Vote) -> Result<Ack, AgreementError> {
        let voter = roles::eligible_voter(self.roster.as_ref(), &vote.voter_pub)?;
        if !vote.is_correct(self.identity.as_ref()) {
            return Err(AgreementError::InvalidSignature);
        }
        let quorum = self.quorum();

        let votes = self
            .lock_state()
            .votes
            .insert(&vote.block_hash, voter, vote.round, self.retention)?;
        if votes == quorum {
            log::info!("Block {} is vote-committed with {} votes", vote.block_hash, votes);
        }
        Ok(Ack::with_votes(votes))
    }

    /// Dispatch a request from the agreement endpoint. Errors are reported in the [Ack], never
    /// propagated.
    pub fn handle(&self, message: AgreementMessage) -> Ack {
        let result = match message {
            AgreementMessage::PrePrepare(pre_prepare) => self.on_receive_pre_prepare(pre_prepare),
            AgreementMessage::Prepare(prepare) => self.on_receive_prepare(prepare),
            AgreementMessage::Commit(commit) => self.on_receive_commit(commit),
            AgreementMessage::Vote(vote) => self.on_receive_vote(vote),
        };
        result.unwrap_or_else(|err| {
            log::debug!("Rejected agreement message: {}", err);
            Ack::error(err)
        })
    }

    pub fn view(&self) -> ViewNumber {
        self.lock_state().view
    }

    pub fn next_sequence(&self) -> SequenceNumber {
        self.lock_state().next_sequence
    }

    pub fn phase(&self, sequence: SequenceNumber) -> Option<Phase> {
        self.lock_state().table.record(sequence).map(|record| record.phase)
    }

    pub fn prepared_certificate(&self, sequence: SequenceNumber) -> Option<QuorumCertificate> {
        self.lock_state()
            .table
            .record(sequence)
            .and_then(|record| record.prepared.clone())
    }

    pub fn committed_certificate(&self, sequence: SequenceNumber) -> Option<QuorumCertificate> {
        self.lock_state()
            .table
            .record(sequence)
            .and_then(|record| record.committed.clone())
    }

    pub fn highest_committed(&self) -> Option<SequenceNumber> {
        self.lock_state().table.highest_committed()
    }

    /// Hex-encoded public key of the leader of `sequence`, if a roster is configured.
    pub fn leader(&self, sequence: SequenceNumber) -> Option<String> {
        roles::leader(self.roster.as_ref(), sequence)
    }

    pub fn is_leader(&self, sequence: SequenceNumber) -> bool {
        self.identity
            .public_key()
            .map_or(false, |key| roles::is_leader(self.roster.as_ref(), &key, sequence))
    }

    pub fn quorum(&self) -> usize {
        roles::quorum(self.roster.as_ref(), &self.peers)
    }

    pub fn roster(&self) -> Option<&ValidatorRoster> {
        self.roster.as_ref()
    }

    // Whether the local node holds a key that counts towards quorums.
    fn is_voter(&self) -> bool {
        self.identity
            .public_key()
            .map_or(false, |key| roles::eligible_voter(self.roster.as_ref(), &key).is_ok())
    }

    fn cast_prepare(
        &self,
        record: &mut AgreementRecord,
        view: ViewNumber,
        seq: SequenceNumber,
        hash: &str,
        quorum: usize,
        outbox: &mut Outbox,
    ) {
        if !self.is_voter() {
            return;
        }
        let Some(prepare) = PrepareMsg::new(self.identity.as_ref(), view, seq, hash.to_string()) else {
            return;
        };
        let votes = record
            .prepares
            .insert(prepare.voter.clone(), view, hash, prepare.sig.clone());
        outbox.events.push(Event::Prepare(PrepareEvent {
            timestamp: SystemTime::now(),
            prepare: prepare.clone(),
        }));
        outbox.messages.push(AgreementMessage::Prepare(prepare));
        self.on_prepare_counted(record, view, seq, hash, votes, quorum, outbox);
    }

    #[allow(clippy::too_many_arguments)]
    fn on_prepare_counted(
        &self,
        record: &mut AgreementRecord,
        view: ViewNumber,
        seq: SequenceNumber,
        hash: &str,
        votes: usize,
        quorum: usize,
        outbox: &mut Outbox,
    ) {
        if votes >= quorum && record.prepared.is_none() {
            record.prepared = Some(record.prepares.certificate(VotePhase::Prepare, view, seq, hash));
            if record.phase == Phase::Proposed {
                record.phase = Phase::Prepared;
            }
            if !record.commit_sent && self.is_voter() {
                if let Some(commit) = CommitMsg::new(self.identity.as_ref(), view, seq, hash.to_string()) {
                    record.commit_sent = true;
                    record
                        .commits
                        .insert(commit.voter.clone(), view, hash, commit.sig.clone());
                    outbox.events.push(Event::Commit(CommitEvent {
                        timestamp: SystemTime::now(),
                        commit: commit.clone(),
                    }));
                    outbox.messages.push(AgreementMessage::Commit(commit));
                }
            }
        }
        if let Some(committed) = record.try_finalize(quorum) {
            outbox.committed = Some(committed);
        }
    }

    // Bookkeeping that needs the whole table rather than one record.
    fn settle(&self, state: &mut AgreementState, seq: SequenceNumber, outbox: &mut Outbox) {
        if let Some(committed) = &outbox.committed {
            state.table.mark_committed(seq, self.retention);
            state.votes.remove(&committed.block_hash);
        }
    }

    fn flush(&self, outbox: Outbox) {
        for event in outbox.events {
            Event::publish(&self.event_publisher, event);
        }
        for message in outbox.messages {
            self.network.broadcast(message);
        }
        if let Some(committed) = outbox.committed {
            log::info!(
                "Committed block {} at sequence {} with {} votes",
                committed.block_hash,
                committed.sequence,
                committed.signatures.len()
            );
            self.notifier.block_committed(&committed.block_hash);
            Event::publish(
                &self.event_publisher,
                Event::CommitBlock(CommitBlockEvent {
                    timestamp: SystemTime::now(),
                    view: committed.view,
                    sequence: committed.sequence,
                    block_hash: committed.block_hash,
                }),
            );
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, AgreementState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<N: AgreementNetwork> BlockProposer for AgreementEngine<N> {
    fn offer(&self, block: &Block) {
        match self.propose(block.clone()) {
            Ok(_) | Err(AgreementError::WrongLeader(_)) => (),
            Err(err) => log::warn!("Could not propose block {}: {}", block.index, err),
        }
    }
}

/// Blocks entering agreement must be signed over their content, and their hash must match that content.
/// Proof-of-work is not required.
fn check_block(identity: &dyn Identity, block: &Block) -> Result<(), AgreementError> {
    if !block.is_signed() {
        return Err(AgreementError::UnsignedBlock);
    }
    if !verify_block(identity, block) {
        return Err(AgreementError::InvalidBlockSignature);
    }
    if !block.hash_is_correct() {
        return Err(AgreementError::InvalidBlockHash);
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgreementError {
    MissingLocalKey,
    UnsignedBlock,
    InvalidBlockSignature,
    InvalidBlockHash,
    InvalidSignature,
    UnknownVoter(String),
    WrongLeader(SequenceNumber),
    ConflictingPrePrepare(SequenceNumber),
    Stale(SequenceNumber),
    /// A simple vote for a round that fell out of the retention window.
    StaleRound(u64),
}

impl fmt::Display for AgreementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgreementError::MissingLocalKey => write!(f, "no local signing key"),
            AgreementError::UnsignedBlock => write!(f, "block is not signed"),
            AgreementError::InvalidBlockSignature => write!(f, "invalid block signature"),
            AgreementError::InvalidBlockHash => write!(f, "block hash does not match its contents"),
            AgreementError::InvalidSignature => write!(f, "invalid signature"),
            AgreementError::UnknownVoter(voter) => write!(f, "{} is not in the validator roster", voter),
            AgreementError::WrongLeader(seq) => write!(f, "not the leader of sequence {}", seq),
            AgreementError::ConflictingPrePrepare(seq) => {
                write!(f, "conflicting pre-prepare for sequence {}", seq)
            }
            AgreementError::Stale(seq) => write!(f, "sequence {} is no longer tracked", seq),
            AgreementError::StaleRound(round) => write!(f, "round {} is no longer tracked", round),
        }
    }
}

impl std::error::Error for AgreementError {}
