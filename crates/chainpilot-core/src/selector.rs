//! Endpoint selection: uniform random choice among a chain's live endpoints.
//!
//! Selection reads registry state only and never performs network I/O.

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::error::PilotError;
use crate::registry::EndpointRegistry;
use crate::transport::ChainEndpoint;

/// Picks a usable endpoint for a chain from the registry's current state.
#[derive(Clone)]
pub struct EndpointSelector {
    registry: Arc<EndpointRegistry>,
}

impl EndpointSelector {
    pub fn new(registry: Arc<EndpointRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Select an active endpoint for `chain`.
    ///
    /// Fails with [`PilotError::NoActiveEndpoints`] if none is active and
    /// [`PilotError::UnknownChain`] if the chain is not configured.
    pub fn select(&self, chain: &str) -> Result<Arc<dyn ChainEndpoint>, PilotError> {
        let active = self
            .registry
            .active_endpoints(chain)
            .ok_or_else(|| PilotError::UnknownChain(chain.to_string()))?;

        let chosen = match active.as_slice() {
            [] => None,
            [only] => Some(Arc::clone(only)),
            many => many.choose(&mut thread_rng()).cloned(),
        };
        let endpoint = chosen.ok_or_else(|| PilotError::NoActiveEndpoints {
            chain: chain.to_string(),
        })?;

        tracing::debug!(chain, url = endpoint.url(), active = active.len(), "selected endpoint");
        Ok(endpoint)
    }
}
