//! `ChainPilot`: the facade that wires the registry, liveness monitor,
//! observer registry and poller together and exposes them to callers.

use std::sync::Arc;

use crate::broadcast::Broadcaster;
use crate::config::{ChainConfig, ConfigProvider, PilotConfig};
use crate::error::PilotError;
use crate::liveness::LivenessMonitor;
use crate::observer::{HeightChannel, HeightObserver, HeightReceiver, ObserverId, ObserverRegistry};
use crate::poller::BlockPoller;
use crate::registry::{EndpointRegistry, EndpointStatus};
use crate::selector::EndpointSelector;
use crate::signer::TxSigner;
use crate::transport::ChainEndpoint;

/// Client-side coordinator for a set of replicated chains.
///
/// # Example
/// ```rust,ignore
/// let pilot = ChainPilot::new(config, |_, chain| {
///     HttpEndpoint::arcs_for_chain(chain).map_err(PilotError::from)
/// })?;
/// pilot.start();
/// let mut heights = pilot.watch("osmosis", 16)?;
/// while let Some(height) = heights.recv().await {
///     println!("osmosis at {height}");
/// }
/// ```
pub struct ChainPilot {
    config: PilotConfig,
    registry: Arc<EndpointRegistry>,
    selector: EndpointSelector,
    monitor: LivenessMonitor,
    observers: Arc<ObserverRegistry>,
    poller: BlockPoller,
}

impl ChainPilot {
    /// Build a coordinator, asking `connect` for the endpoints of every
    /// configured chain.
    pub fn new<F>(config: PilotConfig, mut connect: F) -> Result<Self, PilotError>
    where
        F: FnMut(&str, &ChainConfig) -> Result<Vec<Arc<dyn ChainEndpoint>>, PilotError>,
    {
        config.validate()?;
        let mut registry = EndpointRegistry::new();
        for (name, chain) in ConfigProvider::chains(&config) {
            let endpoints = connect(&name, &chain)?;
            registry.insert_chain(name, endpoints);
        }
        Ok(Self::with_registry(config, registry))
    }

    /// Build a coordinator around an already populated registry.
    pub fn with_registry(config: PilotConfig, registry: EndpointRegistry) -> Self {
        let registry = Arc::new(registry);
        let selector = EndpointSelector::new(Arc::clone(&registry));
        let observers = Arc::new(ObserverRegistry::new());
        let monitor = LivenessMonitor::new(Arc::clone(&registry), config.liveness_config());
        let poller = BlockPoller::new(selector.clone(), Arc::clone(&observers), config.poller_config());
        Self {
            config,
            registry,
            selector,
            monitor,
            observers,
            poller,
        }
    }

    pub fn config(&self) -> &PilotConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &LivenessMonitor {
        &self.monitor
    }

    pub fn poller(&self) -> &BlockPoller {
        &self.poller
    }

    /// Start liveness monitoring and the block poller.
    pub fn start(&self) {
        self.monitor.start();
        self.poller.start();
        tracing::info!(chains = ?self.registry.chains(), "chainpilot started");
    }

    /// Stop the poller, then the liveness monitor, waiting for both.
    pub async fn stop(&self) {
        self.poller.stop().await;
        self.monitor.stop().await;
        tracing::info!("chainpilot stopped");
    }

    /// Register `observer` for new heights of `chain`. Returns `false` if it
    /// was already registered.
    pub fn subscribe(&self, chain: &str, observer: Arc<dyn HeightObserver>) -> Result<bool, PilotError> {
        self.ensure_chain(chain)?;
        Ok(self.observers.subscribe(chain, observer))
    }

    pub fn unsubscribe(&self, chain: &str, id: ObserverId) -> bool {
        self.observers.unsubscribe(chain, id)
    }

    /// Subscribe a fresh [`HeightChannel`] to `chain` and return its receiver.
    /// Dropping the receiver ends the subscription.
    pub fn watch(&self, chain: &str, capacity: usize) -> Result<HeightReceiver, PilotError> {
        self.ensure_chain(chain)?;
        let (channel, receiver) = HeightChannel::new(capacity, format!("watch:{chain}"));
        self.observers.subscribe(chain, channel);
        Ok(receiver)
    }

    /// An active endpoint of `chain`, for ad hoc queries.
    pub fn select_endpoint(&self, chain: &str) -> Result<Arc<dyn ChainEndpoint>, PilotError> {
        self.selector.select(chain)
    }

    /// A submit-and-confirm pipeline for `chain`, configured from the
    /// chain's settings.
    pub fn broadcaster(&self, chain: &str, signer: Arc<dyn TxSigner>) -> Result<Broadcaster, PilotError> {
        self.ensure_chain(chain)?;
        let config = self.config.broadcast_config(chain)?;
        Ok(Broadcaster::new(chain, self.selector.clone(), signer, config))
    }

    /// Liveness report for each endpoint of `chain`.
    pub fn endpoint_status(&self, chain: &str) -> Result<Vec<EndpointStatus>, PilotError> {
        self.ensure_chain(chain)?;
        Ok(self.registry.snapshot(chain))
    }

    fn ensure_chain(&self, chain: &str) -> Result<(), PilotError> {
        if self.registry.contains(chain) {
            Ok(())
        } else {
            Err(PilotError::UnknownChain(chain.to_string()))
        }
    }
}
