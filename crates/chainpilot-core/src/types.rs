//! Chain-agnostic value types shared by every component.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A block height.
pub type Height = u64;

/// Identifier the endpoint assigns to an accepted request (the tx hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash(pub String);

impl TxHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TxHash {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TxHash {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A signing identity: a named key and the address derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub key_name: String,
    pub address: String,
}

impl Identity {
    pub fn new(key_name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            key_name: key_name.into(),
            address: address.into(),
        }
    }
}

/// An encoded domain message (`type_url` + protobuf bytes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub type_url: String,
    pub value: Vec<u8>,
}

impl Message {
    pub fn new(type_url: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            type_url: type_url.into(),
            value,
        }
    }
}

/// Account metadata needed to sign: account number and next sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub account_number: u64,
    pub sequence: u64,
}

/// Fee and memo options applied when building a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOptions {
    #[serde(default)]
    pub memo: String,
    /// Fixed gas limit; `None` lets the signer simulate and apply `gas_adjustment`.
    #[serde(default)]
    pub gas_limit: Option<u64>,
    #[serde(default = "default_gas_adjustment")]
    pub gas_adjustment: f64,
    #[serde(default)]
    pub gas_prices: String,
}

fn default_gas_adjustment() -> f64 {
    1.2
}

impl Default for TxOptions {
    fn default() -> Self {
        Self {
            memo: String::new(),
            gas_limit: None,
            gas_adjustment: default_gas_adjustment(),
            gas_prices: String::new(),
        }
    }
}

/// A signed request ready for submission. All messages travel together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub bytes: Vec<u8>,
}

/// The endpoint's answer to a submission (pre-inclusion validation result).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAck {
    pub hash: TxHash,
    pub code: u32,
    #[serde(default)]
    pub codespace: String,
    #[serde(default)]
    pub log: String,
    /// The endpoint's raw response payload.
    #[serde(default)]
    pub raw: Value,
}

impl SubmitAck {
    pub fn is_accepted(&self) -> bool {
        self.code == 0
    }
}

/// A key/value attribute on an emitted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
}

/// An event emitted while executing a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEvent {
    pub kind: String,
    pub attributes: Vec<EventAttribute>,
}

impl TxEvent {
    /// First value of the attribute named `key`.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }
}

/// The finalized result of a submitted request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalRecord {
    pub hash: TxHash,
    pub height: Height,
    pub code: u32,
    #[serde(default)]
    pub codespace: String,
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub gas_wanted: i64,
    #[serde(default)]
    pub gas_used: i64,
    #[serde(default)]
    pub events: Vec<TxEvent>,
    /// The endpoint's raw response payload.
    #[serde(default)]
    pub raw: Value,
}

impl TerminalRecord {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    /// All events of the given kind, in emission order.
    pub fn events_of<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a TxEvent> + 'a {
        self.events.iter().filter(move |e| e.kind == kind)
    }
}

/// What an endpoint knows about a submitted request.
#[derive(Debug, Clone)]
pub enum TxStatus {
    /// Accepted but not yet included in a block.
    Pending,
    /// Included and finalized.
    Committed(TerminalRecord),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_attribute_lookup() {
        let event = TxEvent {
            kind: "transfer".into(),
            attributes: vec![
                EventAttribute { key: "recipient".into(), value: "cosmos1abc".into() },
                EventAttribute { key: "amount".into(), value: "10uatom".into() },
            ],
        };
        assert_eq!(event.attribute("amount"), Some("10uatom"));
        assert_eq!(event.attribute("sender"), None);
    }

    #[test]
    fn tx_options_defaults_from_empty_object() {
        let opts: TxOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, TxOptions::default());
        assert!((opts.gas_adjustment - 1.2).abs() < f64::EPSILON);
    }
}
