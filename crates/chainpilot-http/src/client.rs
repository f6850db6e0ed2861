//! HTTP JSON-RPC endpoint backed by `reqwest`.
//!
//! Speaks the CometBFT RPC methods the coordinator needs:
//! - `status` for the latest height
//! - `broadcast_tx_sync` to submit (returns after pre-inclusion validation)
//! - `tx` to look up a submitted request; "not found" means still pending

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use chainpilot_core::config::ChainConfig;
use chainpilot_core::error::TransportError;
use chainpilot_core::request::{JsonRpcRequest, JsonRpcResponse};
use chainpilot_core::transport::ChainEndpoint;
use chainpilot_core::types::{Height, SignedTx, SubmitAck, TxHash, TxStatus};

use crate::wire::{BroadcastResult, StatusResult, TxResult};

/// Configuration for `HttpEndpoint`.
#[derive(Debug, Clone)]
pub struct HttpEndpointConfig {
    pub request_timeout: Duration,
}

impl Default for HttpEndpointConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(20),
        }
    }
}

/// One CometBFT RPC replica reached over HTTP.
pub struct HttpEndpoint {
    url: String,
    http: reqwest::Client,
    request_timeout: Duration,
    next_id: AtomicU64,
}

impl HttpEndpoint {
    /// Create an endpoint for the given RPC URL.
    pub fn new(url: impl Into<String>, config: HttpEndpointConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            request_timeout: config.request_timeout,
            next_id: AtomicU64::new(1),
        })
    }

    /// One endpoint per `rpc_addrs` entry of `chain`, in order, using the
    /// chain's request timeout.
    pub fn for_chain(chain: &ChainConfig) -> Result<Vec<Self>, TransportError> {
        let config = HttpEndpointConfig {
            request_timeout: chain.timeout(),
        };
        chain
            .rpc_addrs
            .iter()
            .map(|url| Self::new(url.as_str(), config.clone()))
            .collect()
    }

    /// Like [`for_chain`](Self::for_chain), as trait objects.
    pub fn arcs_for_chain(chain: &ChainConfig) -> Result<Vec<Arc<dyn ChainEndpoint>>, TransportError> {
        Ok(Self::for_chain(chain)?
            .into_iter()
            .map(|ep| Arc::new(ep) as Arc<dyn ChainEndpoint>)
            .collect())
    }

    /// Node and sync information from the `status` method.
    pub async fn status(&self) -> Result<StatusResult, TransportError> {
        self.call("status", json!({})).await
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, TransportError> {
        let value = self.call_raw(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn call_raw(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        tracing::trace!(url = %self.url, method, id, "sending request");

        let resp = self.http.post(&self.url).json(&req).send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    ms: self.request_timeout.as_millis() as u64,
                }
            } else {
                TransportError::Http(e.to_string())
            }
        })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!("HTTP {status}: {body}")));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        let rpc: JsonRpcResponse = serde_json::from_slice(&body)?;
        rpc.into_result().map_err(TransportError::Rpc)
    }
}

/// CometBFT's `tx` method takes the hash as base64 of its raw bytes.
fn encode_hash(hash: &TxHash) -> Result<String, TransportError> {
    let bytes = hex::decode(hash.as_str())
        .map_err(|e| TransportError::Malformed(format!("invalid transaction hash {hash}: {e}")))?;
    Ok(STANDARD.encode(bytes))
}

#[async_trait]
impl ChainEndpoint for HttpEndpoint {
    fn url(&self) -> &str {
        &self.url
    }

    async fn latest_height(&self) -> Result<Height, TransportError> {
        let status = self.status().await?;
        if status.sync_info.catching_up {
            tracing::debug!(url = %self.url, height = status.sync_info.latest_block_height, "node is catching up");
        }
        Ok(status.sync_info.latest_block_height)
    }

    async fn submit(&self, tx: &SignedTx) -> Result<SubmitAck, TransportError> {
        let raw = self
            .call_raw("broadcast_tx_sync", json!({ "tx": STANDARD.encode(&tx.bytes) }))
            .await?;
        let result: BroadcastResult = serde_json::from_value(raw.clone())?;
        Ok(result.into_ack(raw))
    }

    async fn query_status(&self, hash: &TxHash) -> Result<TxStatus, TransportError> {
        let params = json!({ "hash": encode_hash(hash)?, "prove": false });
        match self.call_raw("tx", params).await {
            Ok(raw) => {
                let result: TxResult = serde_json::from_value(raw.clone())?;
                Ok(TxStatus::Committed(result.into_terminal(raw)))
            }
            Err(TransportError::Rpc(e)) if e.is_not_found() => Ok(TxStatus::Pending),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn endpoint(server: &MockServer) -> HttpEndpoint {
        HttpEndpoint::new(
            server.uri(),
            HttpEndpointConfig {
                request_timeout: Duration::from_secs(5),
            },
        )
        .unwrap()
    }

    fn rpc_result(result: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": result }))
    }

    #[test]
    fn hash_is_sent_as_base64_bytes() {
        assert_eq!(encode_hash(&TxHash::from("ABCD")).unwrap(), "q80=");
        assert!(encode_hash(&TxHash::from("not-hex")).unwrap_err().is_malformed());
    }

    #[test]
    fn one_endpoint_per_rpc_addr() {
        let chain = ChainConfig {
            timeout_ms: 3_000,
            ..ChainConfig::new(
                "osmosis-1",
                vec!["https://a.example:443".into(), "https://b.example:443".into()],
            )
        };
        let eps = HttpEndpoint::for_chain(&chain).unwrap();
        assert_eq!(eps.len(), 2);
        assert_eq!(eps[1].url(), "https://b.example:443");
        assert_eq!(eps[0].request_timeout, Duration::from_secs(3));
        assert_eq!(HttpEndpoint::arcs_for_chain(&chain).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn latest_height_and_node_info_from_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "status" })))
            .respond_with(rpc_result(json!({
                "node_info": { "network": "osmosis-1", "moniker": "node-a", "version": "0.37.2" },
                "sync_info": {
                    "latest_block_height": "987",
                    "latest_block_time": "2024-03-01T12:00:00Z",
                    "catching_up": false
                }
            })))
            .expect(2)
            .mount(&server)
            .await;

        let ep = endpoint(&server);
        assert_eq!(ep.latest_height().await.unwrap(), 987);
        let status = ep.status().await.unwrap();
        assert_eq!(status.node_info.network, "osmosis-1");
        assert_eq!(status.sync_info.latest_block_time, "2024-03-01T12:00:00Z");
    }

    #[tokio::test]
    async fn missing_tx_is_pending_then_committed() {
        let server = MockServer::start().await;
        let query = json!({ "method": "tx", "params": { "hash": "q80=", "prove": false } });
        Mock::given(method("POST"))
            .and(body_partial_json(query.clone()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32603, "message": "Internal error", "data": "tx (ABCD) not found" }
            })))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(query))
            .respond_with(rpc_result(json!({
                "hash": "ABCD",
                "height": "55",
                "tx_result": { "code": 7, "log": "out of gas", "gas_wanted": "10", "gas_used": "11" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ep = endpoint(&server);
        assert!(matches!(ep.query_status(&TxHash::from("ABCD")).await.unwrap(), TxStatus::Pending));
        match ep.query_status(&TxHash::from("ABCD")).await.unwrap() {
            TxStatus::Committed(terminal) => {
                assert_eq!(terminal.height, 55);
                assert_eq!(terminal.code, 7);
            }
            other => panic!("expected committed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn submit_sends_base64_tx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "broadcast_tx_sync", "params": { "tx": "AQID" } })))
            .respond_with(rpc_result(json!({ "code": 0, "log": "[]", "codespace": "", "hash": "C0FFEE" })))
            .expect(1)
            .mount(&server)
            .await;

        let ack = endpoint(&server)
            .submit(&SignedTx { bytes: vec![1, 2, 3] })
            .await
            .unwrap();
        assert!(ack.is_accepted());
        assert_eq!(ack.hash.as_str(), "C0FFEE");
    }

    #[tokio::test]
    async fn malformed_result_is_a_deserialization_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(rpc_result(json!({
                "hash": "ABCD",
                "height": "not-a-number",
                "tx_result": {}
            })))
            .mount(&server)
            .await;

        let err = endpoint(&server).query_status(&TxHash::from("ABCD")).await.unwrap_err();
        assert!(err.is_malformed(), "{err:?}");
    }

    #[tokio::test]
    async fn non_hex_hash_is_malformed_without_a_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(rpc_result(json!({})))
            .expect(0)
            .mount(&server)
            .await;

        let err = endpoint(&server).query_status(&TxHash::from("C0FFEE-")).await.unwrap_err();
        assert!(err.is_malformed(), "{err:?}");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
            .mount(&server)
            .await;

        let err = endpoint(&server).latest_height().await.unwrap_err();
        assert!(matches!(err, TransportError::Http(ref msg) if msg.contains("503")), "{err:?}");
        assert!(err.is_retryable());
    }
}
