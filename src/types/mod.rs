/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types shared across the ledger, transport, gossip and agreement subsystems.

pub mod basic;

pub mod block;

pub mod validators;

pub use basic::{Difficulty, SequenceNumber, ViewNumber};
pub use block::Block;
pub use validators::{Validator, ValidatorRoster};
