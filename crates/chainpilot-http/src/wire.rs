//! CometBFT JSON-RPC result payloads.
//!
//! Integers that CometBFT encodes as decimal strings (`"12345"`) are
//! accepted as strings or numbers.

use std::fmt::Display;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;

use chainpilot_core::types::{EventAttribute, Height, SubmitAck, TerminalRecord, TxEvent, TxHash};

fn string_or_number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => s.parse().map_err(de::Error::custom),
        Value::Number(n) => n.to_string().parse().map_err(de::Error::custom),
        other => Err(de::Error::custom(format!("expected integer, got {other}"))),
    }
}

/// Result of the `status` method.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResult {
    #[serde(default)]
    pub node_info: NodeInfo,
    pub sync_info: SyncInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeInfo {
    /// Chain id the node serves.
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub moniker: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncInfo {
    #[serde(deserialize_with = "string_or_number")]
    pub latest_block_height: Height,
    #[serde(default)]
    pub latest_block_time: String,
    #[serde(default)]
    pub catching_up: bool,
}

/// Result of `broadcast_tx_sync`.
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastResult {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub codespace: String,
    #[serde(default)]
    pub log: String,
    pub hash: String,
}

impl BroadcastResult {
    pub fn into_ack(self, raw: Value) -> SubmitAck {
        SubmitAck {
            hash: TxHash::from(self.hash),
            code: self.code,
            codespace: self.codespace,
            log: self.log,
            raw,
        }
    }
}

/// Result of the `tx` method.
#[derive(Debug, Clone, Deserialize)]
pub struct TxResult {
    pub hash: String,
    #[serde(deserialize_with = "string_or_number")]
    pub height: Height,
    pub tx_result: ExecResult,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecResult {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub codespace: String,
    #[serde(default)]
    pub log: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub gas_wanted: i64,
    #[serde(default, deserialize_with = "string_or_number")]
    pub gas_used: i64,
    #[serde(default)]
    pub events: Vec<WireEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<WireAttribute>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireAttribute {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl TxResult {
    pub fn into_terminal(self, raw: Value) -> TerminalRecord {
        let exec = self.tx_result;
        TerminalRecord {
            hash: TxHash::from(self.hash),
            height: self.height,
            code: exec.code,
            codespace: exec.codespace,
            log: exec.log,
            gas_wanted: exec.gas_wanted,
            gas_used: exec.gas_used,
            events: exec
                .events
                .into_iter()
                .map(|e| TxEvent {
                    kind: e.kind,
                    attributes: e
                        .attributes
                        .into_iter()
                        .map(|a| EventAttribute {
                            key: a.key,
                            value: a.value.unwrap_or_default(),
                        })
                        .collect(),
                })
                .collect(),
            raw,
        }
    }
}
