//! `StreamingEndpoint`: adds a WebSocket height feed to any endpoint.

use std::sync::Arc;

use async_trait::async_trait;

use chainpilot_core::error::TransportError;
use chainpilot_core::transport::{ChainEndpoint, HeightStream};
use chainpilot_core::types::{Height, SignedTx, SubmitAck, TxHash, TxStatus};

use crate::feed::{WsFeedConfig, WsHeightFeed};

/// Wraps an endpoint and serves `subscribe_heights` from a WebSocket.
///
/// Every other call goes to the wrapped endpoint unchanged.
pub struct StreamingEndpoint<E> {
    inner: E,
    feed: WsHeightFeed,
}

impl<E: ChainEndpoint> StreamingEndpoint<E> {
    pub fn new(inner: E, ws_url: impl Into<String>, config: WsFeedConfig) -> Self {
        Self {
            inner,
            feed: WsHeightFeed::new(ws_url, config),
        }
    }

    pub fn arc(inner: E, ws_url: impl Into<String>) -> Arc<dyn ChainEndpoint> {
        Arc::new(Self::new(inner, ws_url, WsFeedConfig::default()))
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn ws_url(&self) -> &str {
        self.feed.url()
    }
}

#[async_trait]
impl<E: ChainEndpoint> ChainEndpoint for StreamingEndpoint<E> {
    fn url(&self) -> &str {
        self.inner.url()
    }

    async fn probe_liveness(&self) -> Result<(), TransportError> {
        self.inner.probe_liveness().await
    }

    async fn latest_height(&self) -> Result<Height, TransportError> {
        self.inner.latest_height().await
    }

    async fn submit(&self, tx: &SignedTx) -> Result<SubmitAck, TransportError> {
        self.inner.submit(tx).await
    }

    async fn query_status(&self, hash: &TxHash) -> Result<TxStatus, TransportError> {
        self.inner.query_status(hash).await
    }

    async fn subscribe_heights(&self) -> Result<Option<HeightStream>, TransportError> {
        self.feed.open().await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    #[async_trait]
    impl ChainEndpoint for Fixed {
        fn url(&self) -> &str {
            "http://127.0.0.1:26657"
        }

        async fn latest_height(&self) -> Result<Height, TransportError> {
            Ok(7)
        }

        async fn submit(&self, _tx: &SignedTx) -> Result<SubmitAck, TransportError> {
            Err(TransportError::Other("read-only".into()))
        }

        async fn query_status(&self, _hash: &TxHash) -> Result<TxStatus, TransportError> {
            Ok(TxStatus::Pending)
        }
    }

    #[tokio::test]
    async fn delegates_to_inner() {
        let ep = StreamingEndpoint::new(Fixed, "ws://127.0.0.1:1/websocket", WsFeedConfig::default());
        assert_eq!(ep.url(), "http://127.0.0.1:26657");
        assert_eq!(ep.latest_height().await.unwrap(), 7);
        ep.probe_liveness().await.unwrap();
        assert!(ep.submit(&SignedTx { bytes: vec![] }).await.is_err());
    }

    #[tokio::test]
    async fn unreachable_websocket_is_an_error() {
        let ep = StreamingEndpoint::new(Fixed, "ws://127.0.0.1:1/websocket", WsFeedConfig::default());
        let err = ep.subscribe_heights().await.err().unwrap();
        assert!(err.is_retryable(), "{err:?}");
    }
}
