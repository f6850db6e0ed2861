//! Endpoint registry: per chain, the static endpoint set and each
//! endpoint's liveness state.
//!
//! The set of chains and endpoints is fixed at construction. Only liveness
//! fields change afterwards, and only through [`EndpointRegistry::mark_checked`].
//! Readers may observe slightly stale values; liveness is approximate anyway.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::transport::{ChainEndpoint, HealthStatus};

/// Liveness fields of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Liveness {
    /// Result of the most recent probe. `false` until the first success.
    pub active: bool,
    /// When the endpoint was last probed.
    pub last_checked: Option<Instant>,
    /// When a probe last succeeded.
    pub last_active: Option<Instant>,
}

impl Liveness {
    pub fn health(&self) -> HealthStatus {
        match (self.last_checked, self.active) {
            (None, _) => HealthStatus::Unknown,
            (Some(_), true) => HealthStatus::Healthy,
            (Some(_), false) => HealthStatus::Unhealthy,
        }
    }

    /// `true` if never checked or last checked more than `threshold` ago.
    pub fn is_stale(&self, threshold: Duration, now: Instant) -> bool {
        match self.last_checked {
            None => true,
            Some(at) => now.saturating_duration_since(at) > threshold,
        }
    }
}

/// Reporting view of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointStatus {
    pub url: String,
    pub health: HealthStatus,
    pub since_checked: Option<Duration>,
    pub since_active: Option<Duration>,
}

struct EndpointSlot {
    endpoint: Arc<dyn ChainEndpoint>,
    liveness: Mutex<Liveness>,
}

impl EndpointSlot {
    fn liveness(&self) -> Liveness {
        *self.liveness.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Per-chain endpoint sets with liveness state.
#[derive(Default)]
pub struct EndpointRegistry {
    chains: BTreeMap<String, Vec<EndpointSlot>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chain and its endpoints. Every endpoint starts inactive.
    ///
    /// Endpoints whose URL is already registered for the chain are skipped.
    pub fn insert_chain(
        &mut self,
        chain: impl Into<String>,
        endpoints: impl IntoIterator<Item = Arc<dyn ChainEndpoint>>,
    ) {
        let slots = self.chains.entry(chain.into()).or_default();
        for endpoint in endpoints {
            if slots.iter().any(|s| s.endpoint.url() == endpoint.url()) {
                continue;
            }
            slots.push(EndpointSlot {
                endpoint,
                liveness: Mutex::new(Liveness::default()),
            });
        }
    }

    /// Builder-style [`insert_chain`](Self::insert_chain).
    pub fn with_chain(
        mut self,
        chain: impl Into<String>,
        endpoints: impl IntoIterator<Item = Arc<dyn ChainEndpoint>>,
    ) -> Self {
        self.insert_chain(chain, endpoints);
        self
    }

    /// Names of all tracked chains, sorted.
    pub fn chains(&self) -> Vec<String> {
        self.chains.keys().cloned().collect()
    }

    pub fn contains(&self, chain: &str) -> bool {
        self.chains.contains_key(chain)
    }

    /// Number of endpoints configured for `chain` (0 if unknown).
    pub fn endpoint_count(&self, chain: &str) -> usize {
        self.chains.get(chain).map_or(0, Vec::len)
    }

    /// Record a probe result: `active = success`, `last_checked = now`, and
    /// on success `last_active = now`.
    ///
    /// # Panics
    /// If `chain` or `url` is not registered. The endpoint set is static, so
    /// this can only happen through a programming error.
    pub fn mark_checked(&self, chain: &str, url: &str, success: bool) {
        let slot = self
            .chains
            .get(chain)
            .and_then(|slots| slots.iter().find(|s| s.endpoint.url() == url))
            .unwrap_or_else(|| panic!("endpoint {url} is not registered for chain {chain}"));

        let now = Instant::now();
        let mut liveness = slot.liveness.lock().unwrap_or_else(|e| e.into_inner());
        liveness.active = success;
        liveness.last_checked = Some(now);
        if success {
            liveness.last_active = Some(now);
        }
    }

    /// Current liveness of one endpoint.
    pub fn liveness(&self, chain: &str, url: &str) -> Option<Liveness> {
        self.chains
            .get(chain)?
            .iter()
            .find(|s| s.endpoint.url() == url)
            .map(EndpointSlot::liveness)
    }

    /// The active subset of a chain's endpoints. `None` if the chain is unknown.
    pub fn active_endpoints(&self, chain: &str) -> Option<Vec<Arc<dyn ChainEndpoint>>> {
        let slots = self.chains.get(chain)?;
        Some(
            slots
                .iter()
                .filter(|s| s.liveness().active)
                .map(|s| Arc::clone(&s.endpoint))
                .collect(),
        )
    }

    pub fn active_count(&self, chain: &str) -> usize {
        self.chains
            .get(chain)
            .map_or(0, |slots| slots.iter().filter(|s| s.liveness().active).count())
    }

    /// Endpoints of `chain` not checked within `threshold`.
    pub fn stale_endpoints(&self, chain: &str, threshold: Duration) -> Vec<Arc<dyn ChainEndpoint>> {
        let now = Instant::now();
        self.chains
            .get(chain)
            .map(|slots| {
                slots
                    .iter()
                    .filter(|s| s.liveness().is_stale(threshold, now))
                    .map(|s| Arc::clone(&s.endpoint))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `true` if any endpoint of `chain` is active now or was active within `window`.
    pub fn recently_active(&self, chain: &str, window: Duration) -> bool {
        let now = Instant::now();
        self.chains.get(chain).is_some_and(|slots| {
            slots.iter().any(|s| {
                let l = s.liveness();
                l.active
                    || l.last_active
                        .is_some_and(|at| now.saturating_duration_since(at) <= window)
            })
        })
    }

    /// Reporting view of every endpoint of `chain`, in configuration order.
    pub fn snapshot(&self, chain: &str) -> Vec<EndpointStatus> {
        let now = Instant::now();
        self.chains
            .get(chain)
            .map(|slots| {
                slots
                    .iter()
                    .map(|s| {
                        let l = s.liveness();
                        EndpointStatus {
                            url: s.endpoint.url().to_string(),
                            health: l.health(),
                            since_checked: l.last_checked.map(|at| now.saturating_duration_since(at)),
                            since_active: l.last_active.map(|at| now.saturating_duration_since(at)),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for EndpointRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (chain, slots) in &self.chains {
            map.entry(chain, &slots.iter().map(|s| s.endpoint.url()).collect::<Vec<_>>());
        }
        map.finish()
    }
}
