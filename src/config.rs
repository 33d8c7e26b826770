/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The node's [Configuration], built either with the builder pattern:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .listen_addr("127.0.0.1:50051".to_string())
//!     .bootstrap_peers(vec!["127.0.0.1:50052".to_string()])
//!     .chain_path(Some("chain_store.json".into()))
//!     .log_events(true)
//!     .build();
//! ```
//!
//! or from environment variables with [Configuration::from_env].

use std::{fmt, path::PathBuf, time::Duration};

use typed_builder::TypedBuilder;

use crate::{
    agreement::DEFAULT_RETENTION,
    types::{validators::RosterError, Difficulty, ValidatorRoster},
};

pub const DEFAULT_PORT: u16 = 50051;
pub const DEFAULT_CHAIN_FILE: &str = "chain_store.json";
pub const DEFAULT_BRIDGE_ADDR: &str = "127.0.0.1:6000";
pub const DEFAULT_OBSERVER_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_RELAY_ADDR: &str = "127.0.0.1:8001";
pub const DEFAULT_VALIDATORS_FILE: &str = "validators.json";

#[derive(Clone, Debug, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.listen_addr(...)`
    - `.log_events(...)`

    Every other setter is optional.
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the address the peer-to-peer transport listens on. Required."))]
    pub listen_addr: String,
    #[builder(default, setter(doc = "Set the address announced to peers. Defaults to the address the listener is bound to."))]
    pub advertise_addr: Option<String>,
    #[builder(default, setter(doc = "Set the peers dialed at startup."))]
    pub bootstrap_peers: Vec<String>,
    #[builder(default, setter(doc = "Set the number of leading zero hex characters a sealed block hash must have. Defaults to 2."))]
    pub difficulty: Difficulty,
    #[builder(default, setter(doc = "Set the file the chain is loaded from at startup and persisted to at shutdown."))]
    pub chain_path: Option<PathBuf>,
    #[builder(default, setter(doc = "Set the address of the external execution engine."))]
    pub bridge_addr: Option<String>,
    #[builder(default, setter(doc = "Set the address of the observer sink that appended blocks are reported to."))]
    pub observer_addr: Option<String>,
    #[builder(default, setter(doc = "Set the address of the relay that opaque payloads are forwarded to."))]
    pub relay_addr: Option<String>,
    #[builder(default, setter(doc = "Set the address the agreement endpoint listens on. Without it the node takes no part in agreement over the network."))]
    pub agreement_listen_addr: Option<String>,
    #[builder(default, setter(doc = "Set the validator roster. Without it agreement runs in degraded mode."))]
    pub roster: Option<ValidatorRoster>,
    #[builder(default, setter(doc = "Propose blocks appended from local transactions when this node leads the next sequence number."))]
    pub auto_propose: bool,
    #[builder(default, setter(doc = "Set the address the TCP gossip overlay listens on. Ignored if a gossip provider is passed to the node directly."))]
    pub gossip_listen_addr: Option<String>,
    #[builder(default, setter(doc = "Set the gossip addresses of the other overlay members."))]
    pub gossip_members: Vec<String>,
    #[builder(default = Duration::from_secs(3), setter(doc = "Set the timeout for dialing a peer."))]
    pub dial_timeout: Duration,
    #[builder(default = Duration::from_secs(2), setter(doc = "Set the timeout for each send of a broadcast or agreement message."))]
    pub broadcast_timeout: Duration,
    #[builder(default = Duration::from_secs(30), setter(doc = "Set the interval between peer-count log lines."))]
    pub peer_log_interval: Duration,
    #[builder(default = DEFAULT_RETENTION, setter(doc = "Set how many sequence numbers below the highest committed one keep their agreement records."))]
    pub retention: u64,
    #[builder(setter(doc = "Enable event logging? Required."))]
    pub log_events: bool,
}

impl Configuration {
    /// Read the configuration from the process environment:
    ///
    /// |Variable|Meaning|Default|
    /// |---|---|---|
    /// |`PORT`|transport port, bound on all interfaces|50051|
    /// |`ADVERTISE_ADDR`|address announced to peers|`127.0.0.1:{PORT}`|
    /// |`PEERS`|comma-separated bootstrap peers|none|
    /// |`DIFFICULTY`|proof-of-work difficulty|2|
    /// |`CHAIN_FILE`|persisted chain|`chain_store.json`|
    /// |`EXECUTION_BRIDGE`|execution engine|`127.0.0.1:6000`|
    /// |`OBSERVER_ADDR`|observer sink|`127.0.0.1:8000`|
    /// |`RELAY_ADDR`|relay|`127.0.0.1:8001`|
    /// |`AGREEMENT_PORT`|agreement endpoint port|disabled|
    /// |`VALIDATORS_FILE`|validator roster, loaded if the file exists|`validators.json`|
    /// |`GOSSIP_PORT`|TCP gossip port|disabled|
    /// |`GOSSIP_PEERS`|comma-separated gossip members|none|
    /// |`AUTO_PROPOSE`|propose local blocks|false|
    /// |`LOG_EVENTS`|log events|true|
    pub fn from_env() -> Result<Configuration, ConfigError> {
        Configuration::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Configuration, ConfigError> {
        let port: u16 = parse_var(&var, "PORT")?.unwrap_or(DEFAULT_PORT);
        let difficulty = parse_var(&var, "DIFFICULTY")?
            .map(Difficulty::new)
            .unwrap_or_default();

        let validators_file = var("VALIDATORS_FILE").unwrap_or_else(|| DEFAULT_VALIDATORS_FILE.to_string());
        // An empty roster leaves the node in peer-based mode, like a missing one.
        let roster = if PathBuf::from(&validators_file).exists() {
            Some(ValidatorRoster::load(&validators_file)?).filter(|roster| !roster.is_empty())
        } else {
            None
        };

        Ok(Configuration::builder()
            .listen_addr(format!("0.0.0.0:{}", port))
            .advertise_addr(Some(var("ADVERTISE_ADDR").unwrap_or_else(|| format!("127.0.0.1:{}", port))))
            .bootstrap_peers(split_list(var("PEERS")))
            .difficulty(difficulty)
            .chain_path(Some(var("CHAIN_FILE").unwrap_or_else(|| DEFAULT_CHAIN_FILE.to_string()).into()))
            .bridge_addr(Some(var("EXECUTION_BRIDGE").unwrap_or_else(|| DEFAULT_BRIDGE_ADDR.to_string())))
            .observer_addr(Some(var("OBSERVER_ADDR").unwrap_or_else(|| DEFAULT_OBSERVER_ADDR.to_string())))
            .relay_addr(Some(var("RELAY_ADDR").unwrap_or_else(|| DEFAULT_RELAY_ADDR.to_string())))
            .agreement_listen_addr(
                parse_var::<u16>(&var, "AGREEMENT_PORT")?.map(|port| format!("0.0.0.0:{}", port)),
            )
            .roster(roster)
            .auto_propose(parse_var(&var, "AUTO_PROPOSE")?.unwrap_or(false))
            .gossip_listen_addr(parse_var::<u16>(&var, "GOSSIP_PORT")?.map(|port| format!("0.0.0.0:{}", port)))
            .gossip_members(split_list(var("GOSSIP_PEERS")))
            .log_events(parse_var(&var, "LOG_EVENTS")?.unwrap_or(true))
            .build())
    }
}

fn parse_var<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match var(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidVar { name, value }),
    }
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidVar { name: &'static str, value: String },
    Roster(RosterError),
}

impl From<RosterError> for ConfigError {
    fn from(value: RosterError) -> Self {
        ConfigError::Roster(value)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidVar { name, value } => write!(f, "invalid value {:?} for {}", value, name),
            ConfigError::Roster(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let configuration = Configuration::from_vars(vars(&[("VALIDATORS_FILE", "/nonexistent/validators.json")])).unwrap();
        assert_eq!(configuration.listen_addr, "0.0.0.0:50051");
        assert_eq!(configuration.advertise_addr.as_deref(), Some("127.0.0.1:50051"));
        assert_eq!(configuration.difficulty, Difficulty::new(2));
        assert_eq!(configuration.chain_path, Some(PathBuf::from(DEFAULT_CHAIN_FILE)));
        assert_eq!(configuration.bridge_addr.as_deref(), Some(DEFAULT_BRIDGE_ADDR));
        assert!(configuration.agreement_listen_addr.is_none());
        assert!(configuration.roster.is_none());
        assert!(configuration.bootstrap_peers.is_empty());
        assert_eq!(configuration.dial_timeout, Duration::from_secs(3));
    }

    #[test]
    fn reads_peers_and_ports() {
        let configuration = Configuration::from_vars(vars(&[
            ("PORT", "7001"),
            ("PEERS", "127.0.0.1:7002, 127.0.0.1:7003,"),
            ("DIFFICULTY", "3"),
            ("AGREEMENT_PORT", "9001"),
            ("VALIDATORS_FILE", "/nonexistent/validators.json"),
        ]))
        .unwrap();
        assert_eq!(configuration.listen_addr, "0.0.0.0:7001");
        assert_eq!(configuration.bootstrap_peers, vec!["127.0.0.1:7002", "127.0.0.1:7003"]);
        assert_eq!(configuration.difficulty, Difficulty::new(3));
        assert_eq!(configuration.agreement_listen_addr.as_deref(), Some("0.0.0.0:9001"));
    }

    #[test]
    fn empty_roster_file_means_no_roster() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("validators.json");
        std::fs::write(&path, "[]").unwrap();
        let path = path.to_string_lossy().into_owned();

        let configuration = Configuration::from_vars(vars(&[("VALIDATORS_FILE", path.as_str())])).unwrap();
        assert!(configuration.roster.is_none());
    }

    #[test]
    fn rejects_unparsable_values() {
        let err = Configuration::from_vars(vars(&[("PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { name: "PORT", .. }));
    }
}
