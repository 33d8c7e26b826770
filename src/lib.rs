/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A permissioned-validator consensus core: a hash-chained, proof-of-work sealed ledger, block and
//! transaction propagation over direct connections and a gossip overlay, and a three-phase
//! (pre-prepare/prepare/commit) agreement protocol that certifies blocks with quorums of validator
//! signatures.
//!
//! Start a [node](node::NodeSpec) to run all of these together, or use the components on their own.

pub mod agreement;

pub mod bridge;

pub mod config;

pub mod event_bus;

pub mod events;

pub mod gossip;

pub mod identity;

pub mod ledger;

pub mod logging;

pub mod networking;

pub mod node;

pub mod pipeline;

pub mod types;
