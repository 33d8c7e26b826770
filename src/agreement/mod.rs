/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Byzantine agreement: turns signed blocks into quorum-certified, final blocks.
//!
//! The [engine](AgreementEngine) owns all protocol state. It reaches other validators through an
//! [AgreementNetwork] and exposes itself through the [agreement endpoint](server::start_agreement_server).
//! Proof-of-work sealing and agreement are independent: the ledger accepts blocks by the longest valid
//! chain rule whether or not they ever commit here.

pub mod engine;

pub mod messages;

pub mod network;

pub mod roles;

pub mod server;

pub mod types;

pub use engine::{AgreementEngine, AgreementError, BlockProposer, DEFAULT_RETENTION};

pub use messages::{Ack, AgreementMessage, CommitMsg, PrePrepare, PrepareMsg, Vote};

pub use network::{AgreementNetwork, TcpAgreementNetwork};

pub use types::{Phase, QuorumCertificate, VotePhase};
