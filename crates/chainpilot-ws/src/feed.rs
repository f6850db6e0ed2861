//! NewBlock height feed over a CometBFT WebSocket.
//!
//! The feed connects, sends one `subscribe` request for
//! `tm.event='NewBlock'`, and yields the height of every block event. It
//! does not reconnect: the stream ends on disconnect and the poller opens a
//! new feed, possibly on another endpoint.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

use chainpilot_core::error::TransportError;
use chainpilot_core::request::{JsonRpcError, JsonRpcRequest};
use chainpilot_core::transport::HeightStream;
use chainpilot_core::types::Height;

const NEW_BLOCK_QUERY: &str = "tm.event='NewBlock'";

/// Configuration for [`WsHeightFeed`].
#[derive(Debug, Clone)]
pub struct WsFeedConfig {
    /// Bound on the handshake plus the subscribe request.
    pub connect_timeout: Duration,
}

impl Default for WsFeedConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Opens NewBlock height feeds against one WebSocket URL.
#[derive(Debug, Clone)]
pub struct WsHeightFeed {
    url: String,
    config: WsFeedConfig,
}

impl WsHeightFeed {
    pub fn new(url: impl Into<String>, config: WsFeedConfig) -> Self {
        Self {
            url: url.into(),
            config,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connect and subscribe. The returned stream ends when the connection
    /// closes.
    pub async fn open(&self) -> Result<HeightStream, TransportError> {
        let timeout = self.config.connect_timeout;
        tokio::time::timeout(timeout, self.connect())
            .await
            .map_err(|_| TransportError::Timeout {
                ms: timeout.as_millis() as u64,
            })?
    }

    async fn connect(&self) -> Result<HeightStream, TransportError> {
        tracing::info!(url = %self.url, "connecting via WebSocket");
        let (mut ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        let req = JsonRpcRequest::new(1, "subscribe", json!({ "query": NEW_BLOCK_QUERY }));
        let msg = serde_json::to_string(&req)?;
        ws.send(Message::Text(msg.into()))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        let url = self.url.clone();
        let stream = ws.filter_map(move |msg| {
            let url = url.clone();
            async move {
                match msg {
                    Ok(Message::Text(text)) => handle_message(text.as_str()),
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(url = %url, ?frame, "WS closed by server");
                        None
                    }
                    Ok(_) => None,
                    Err(e) => {
                        tracing::warn!(url = %url, error = %e, "WS receive error");
                        Some(Err(TransportError::WebSocket(e.to_string())))
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

/// Extract a block height from one WebSocket text frame.
///
/// Returns `None` for frames that carry no height, such as the empty
/// subscription acknowledgement.
pub fn handle_message(text: &str) -> Option<Result<Height, TransportError>> {
    let Ok(val) = serde_json::from_str::<Value>(text) else {
        tracing::debug!("failed to parse WS message as JSON");
        return None;
    };

    if let Some(err) = val.get("error") {
        return Some(
            serde_json::from_value::<JsonRpcError>(err.clone())
                .map_err(TransportError::from)
                .and_then(|e| Err(TransportError::Rpc(e))),
        );
    }

    let height = val
        .pointer("/result/data/value/block/header/height")
        .or_else(|| val.pointer("/result/data/value/header/height"))?;
    let parsed = match height {
        Value::String(s) => s.parse::<Height>().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    };
    Some(parsed.ok_or_else(|| TransportError::Other(format!("invalid block height {height}"))))
}

/// WebSocket URL of a CometBFT node given its RPC URL.
///
/// `https://host:443` becomes `wss://host:443/websocket`.
pub fn websocket_url(rpc_url: &str) -> String {
    let base = rpc_url.trim_end_matches('/');
    let swapped = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    if swapped.ends_with("/websocket") {
        swapped
    } else {
        format!("{swapped}/websocket")
    }
}
