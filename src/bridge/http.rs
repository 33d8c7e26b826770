//! HTTP clients for the observer sink and the relay.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::Serialize;

use crate::types::Block;

use super::BridgeError;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
pub const OBSERVER_TIMEOUT: Duration = Duration::from_secs(3);
pub const RELAY_TIMEOUT: Duration = Duration::from_secs(5);

fn client(timeout: Duration) -> Result<Client, BridgeError> {
    let client = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(timeout)
        .build()?;
    Ok(client)
}

/// POST `body` as JSON to `{base_url}{path}` and return the response body.
fn post_json(client: &Client, base_url: &str, path: &str, body: &impl Serialize) -> Result<Vec<u8>, BridgeError> {
    let response = client
        .post(format!("{}{}", base_url, path))
        .json(body)
        .send()?
        .error_for_status()?;
    Ok(response.bytes()?.to_vec())
}

/// Turn `http://host:port/`, `host:port` or `https://host` into a base URL without a trailing slash.
pub fn base_url(addr: &str) -> String {
    let addr = addr.trim_end_matches('/');
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    }
}

/// The external observer, which is sent every block appended to the local chain.
#[derive(Clone, Debug)]
pub struct ObserverSink {
    client: Client,
    base_url: String,
}

impl ObserverSink {
    pub fn new(addr: &str) -> Result<ObserverSink, BridgeError> {
        Ok(ObserverSink {
            client: client(OBSERVER_TIMEOUT)?,
            base_url: base_url(addr),
        })
    }

    pub fn ingest_block(&self, block: &Block) -> Result<(), BridgeError> {
        post_json(&self.client, &self.base_url, "/ingest_block", block)?;
        Ok(())
    }
}

/// Passthrough to another runtime. Payloads and responses are not interpreted.
#[derive(Clone, Debug)]
pub struct Relay {
    client: Client,
    base_url: String,
}

impl Relay {
    pub fn new(addr: &str) -> Result<Relay, BridgeError> {
        Ok(Relay {
            client: client(RELAY_TIMEOUT)?,
            base_url: base_url(addr),
        })
    }

    pub fn forward(&self, payload: &serde_json::Value) -> Result<Vec<u8>, BridgeError> {
        post_json(&self.client, &self.base_url, "/execute", payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_urls_and_bare_addresses() {
        assert_eq!(base_url("http://127.0.0.1:8000/"), "http://127.0.0.1:8000");
        assert_eq!(base_url("127.0.0.1:8001"), "http://127.0.0.1:8001");
        assert_eq!(base_url("https://observer.local"), "https://observer.local");
    }

    #[test]
    fn unreachable_relay_is_an_error() {
        let relay = Relay::new("127.0.0.1:1").unwrap();
        assert!(matches!(
            relay.forward(&serde_json::json!({})),
            Err(BridgeError::Request(_))
        ));
    }
}
