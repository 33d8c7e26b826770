/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Direct-dial peer-to-peer transport: wire messages, the peer set, outbound helpers and the
//! connection handlers.

pub mod client;

pub mod messages;

pub mod peers;

pub(crate) mod transport;

pub use messages::{Envelope, WireMessage};
pub use peers::PeerSet;
