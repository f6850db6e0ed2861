//! The `ChainEndpoint` trait: the capability every network endpoint provides.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::TransportError;
use crate::types::{Height, SignedTx, SubmitAck, TxHash, TxStatus};

/// A live feed of block heights from one endpoint.
///
/// The stream ends (or yields an error) when the endpoint disconnects.
pub type HeightStream = Pin<Box<dyn Stream<Item = Result<Height, TransportError>> + Send>>;

/// Endpoint health as last observed by the liveness monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// The last probe succeeded.
    Healthy,
    /// The last probe failed.
    Unhealthy,
    /// Not yet probed.
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One network-reachable replica of a chain.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks.
///
/// # Object Safety
/// The trait is object-safe and can be stored as `Arc<dyn ChainEndpoint>`.
#[async_trait]
pub trait ChainEndpoint: Send + Sync + 'static {
    /// The endpoint's address; unique within a chain.
    fn url(&self) -> &str;

    /// Cheap request used to classify the endpoint as reachable.
    ///
    /// Defaults to fetching the latest height and discarding it.
    async fn probe_liveness(&self) -> Result<(), TransportError> {
        self.latest_height().await.map(|_| ())
    }

    /// Latest block height known to the endpoint.
    async fn latest_height(&self) -> Result<Height, TransportError>;

    /// Submit a signed request for pre-inclusion validation.
    async fn submit(&self, tx: &SignedTx) -> Result<SubmitAck, TransportError>;

    /// Look up the status of a previously submitted request.
    async fn query_status(&self, hash: &TxHash) -> Result<TxStatus, TransportError>;

    /// Open a streaming height feed.
    ///
    /// Returns `Ok(None)` if the endpoint cannot stream; callers then poll
    /// [`latest_height`](Self::latest_height) instead.
    async fn subscribe_heights(&self) -> Result<Option<HeightStream>, TransportError> {
        Ok(None)
    }
}
