//! Block poller: follows the head of every observed chain and pushes new
//! heights to that chain's observers.
//!
//! # Per-chain loop ([`BlockPoller::run_chain`])
//! 1. Skip the chain if nobody observes it.
//! 2. Take the chain's poll lock without waiting; if it is held, another
//!    loop already follows this chain.
//! 3. Select an endpoint and open a height feed: the endpoint's stream if it
//!    offers one, otherwise a polling loop over `latest_height`.
//! 4. Deliver every height strictly above the chain's cursor, advancing the
//!    cursor first. The cursor outlives the loop, so a restarted feed on a
//!    different endpoint never repeats or regresses.
//! 5. Stop when the feed errors or ends, the last observer leaves, or the
//!    loop is cancelled. The lock is released on every exit path.
//!
//! # Driver ([`BlockPoller::start`])
//! Every `driver_interval` the driver scans the subscribed chains and spawns
//! a loop for each chain without one. A chain whose loop found no active
//! endpoint is held back with a capped exponential backoff.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::observer::ObserverRegistry;
use crate::policy::{RetryConfig, RetryPolicy};
use crate::selector::EndpointSelector;
use crate::transport::{ChainEndpoint, HeightStream};
use crate::types::Height;

/// Timing of the poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Pause between driver scans.
    pub driver_interval: Duration,
    /// Pause between `latest_height` calls when the endpoint has no stream.
    pub poll_interval: Duration,
    /// First backoff after a chain had no active endpoint.
    pub select_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            driver_interval: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            select_backoff: Duration::from_secs(9),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Why a per-chain loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another loop holds the chain's poll lock.
    AlreadyRunning,
    /// Endpoint selection failed.
    NoActiveEndpoints,
    /// The height feed errored or closed after delivering `delivered` heights.
    FeedEnded { delivered: usize },
    /// The chain has no observers.
    Unobserved,
    Cancelled,
}

struct PollerInner {
    selector: EndpointSelector,
    observers: Arc<ObserverRegistry>,
    config: PollerConfig,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    cursors: Mutex<HashMap<String, Height>>,
}

struct Driver {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Drives one polling loop per observed chain.
pub struct BlockPoller {
    inner: Arc<PollerInner>,
    driver: Mutex<Option<Driver>>,
}

impl BlockPoller {
    pub fn new(selector: EndpointSelector, observers: Arc<ObserverRegistry>, config: PollerConfig) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                selector,
                observers,
                config,
                locks: Mutex::new(HashMap::new()),
                cursors: Mutex::new(HashMap::new()),
            }),
            driver: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.inner.config
    }

    /// Highest height delivered for `chain` so far.
    pub fn cursor(&self, chain: &str) -> Option<Height> {
        self.inner
            .cursors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(chain)
            .copied()
    }

    /// Follow `chain` until its feed ends, it loses its observers, or
    /// `cancel` fires. Safe to call concurrently: only one caller per chain
    /// gets past the poll lock.
    pub async fn run_chain(&self, chain: &str, cancel: &CancellationToken) -> PollOutcome {
        self.inner.run_chain(chain, cancel).await
    }

    /// Spawn the driver. Does nothing if it is already running.
    pub fn start(&self) {
        let mut driver = self.driver.lock().unwrap_or_else(|e| e.into_inner());
        if driver.as_ref().is_some_and(|d| !d.handle.is_finished()) {
            return;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(drive(Arc::clone(&self.inner), cancel.clone()));
        *driver = Some(Driver { cancel, handle });
    }

    pub fn is_running(&self) -> bool {
        self.driver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|d| !d.handle.is_finished())
    }

    /// Cancel the driver and every polling loop, and wait for them to exit.
    pub async fn stop(&self) {
        let driver = self.driver.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(driver) = driver {
            driver.cancel.cancel();
            let _ = driver.handle.await;
        }
    }
}

impl Drop for BlockPoller {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().unwrap_or_else(|e| e.into_inner()) {
            driver.cancel.cancel();
        }
    }
}

impl PollerInner {
    fn poll_lock(&self, chain: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(chain.to_string()).or_default())
    }

    /// Move the cursor to `height` if it is strictly newer.
    fn advance_cursor(&self, chain: &str, height: Height) -> bool {
        let mut cursors = self.cursors.lock().unwrap_or_else(|e| e.into_inner());
        match cursors.get_mut(chain) {
            Some(cursor) if height <= *cursor => false,
            Some(cursor) => {
                *cursor = height;
                true
            }
            None => {
                cursors.insert(chain.to_string(), height);
                true
            }
        }
    }

    async fn open_feed(&self, chain: &str, endpoint: &Arc<dyn ChainEndpoint>) -> HeightStream {
        match endpoint.subscribe_heights().await {
            Ok(Some(stream)) => {
                tracing::debug!(chain, url = endpoint.url(), "following height stream");
                stream
            }
            Ok(None) => polling_feed(Arc::clone(endpoint), self.config.poll_interval),
            Err(e) => {
                tracing::warn!(
                    chain,
                    url = endpoint.url(),
                    error = %e,
                    "height subscription failed, falling back to polling"
                );
                polling_feed(Arc::clone(endpoint), self.config.poll_interval)
            }
        }
    }

    async fn run_chain(&self, chain: &str, cancel: &CancellationToken) -> PollOutcome {
        if !self.observers.has_observers(chain) {
            return PollOutcome::Unobserved;
        }
        let Ok(_guard) = self.poll_lock(chain).try_lock_owned() else {
            return PollOutcome::AlreadyRunning;
        };

        let endpoint = match self.selector.select(chain) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                tracing::warn!(chain, error = %e, "cannot poll chain");
                return PollOutcome::NoActiveEndpoints;
            }
        };

        let mut feed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            feed = self.open_feed(chain, &endpoint) => feed,
        };

        let mut delivered = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollOutcome::Cancelled,
                next = feed.next() => next,
            };
            match next {
                Some(Ok(height)) => {
                    if self.advance_cursor(chain, height) {
                        self.observers.notify(chain, height);
                        delivered += 1;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(chain, url = endpoint.url(), error = %e, "height feed failed");
                    break;
                }
                None => {
                    tracing::debug!(chain, url = endpoint.url(), "height feed closed");
                    break;
                }
            }
            if !self.observers.has_observers(chain) {
                tracing::debug!(chain, delivered, "last observer left, stopping poll loop");
                return PollOutcome::Unobserved;
            }
        }
        PollOutcome::FeedEnded { delivered }
    }
}

/// Feed that asks `endpoint` for its latest height every `interval`.
fn polling_feed(endpoint: Arc<dyn ChainEndpoint>, interval: Duration) -> HeightStream {
    Box::pin(futures::stream::unfold((endpoint, true), move |(endpoint, first)| async move {
        if !first {
            tokio::time::sleep(interval).await;
        }
        let next = endpoint.latest_height().await;
        Some((next, (endpoint, false)))
    }))
}

async fn drive(inner: Arc<PollerInner>, cancel: CancellationToken) {
    let backoff = RetryPolicy::new(RetryConfig {
        max_attempts: u32::MAX,
        initial_backoff: inner.config.select_backoff,
        max_backoff: inner.config.max_backoff,
        multiplier: 2.0,
    });
    let mut loops: HashMap<String, JoinHandle<PollOutcome>> = HashMap::new();
    // chain -> (consecutive selection failures, earliest retry)
    let mut held_back: HashMap<String, (u32, Instant)> = HashMap::new();

    let mut ticker = tokio::time::interval(inner.config.driver_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!("block poller started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let finished: Vec<String> = loops
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(chain, _)| chain.clone())
            .collect();
        for chain in finished {
            let Some(handle) = loops.remove(&chain) else {
                continue;
            };
            match handle.await {
                Ok(PollOutcome::NoActiveEndpoints) => {
                    let entry = held_back.entry(chain.clone()).or_insert((0, Instant::now()));
                    entry.0 += 1;
                    let delay = backoff.delay_for(entry.0);
                    entry.1 = Instant::now() + delay;
                    tracing::warn!(
                        chain = %chain,
                        failures = entry.0,
                        retry_in_ms = delay.as_millis() as u64,
                        "no active endpoints, backing off"
                    );
                }
                Ok(outcome) => {
                    held_back.remove(&chain);
                    tracing::debug!(chain = %chain, ?outcome, "poll loop finished");
                }
                Err(e) => {
                    tracing::error!(chain = %chain, error = %e, "poll loop panicked");
                }
            }
        }

        let now = Instant::now();
        for chain in inner.observers.list_subscribed_chains() {
            if loops.contains_key(&chain) {
                continue;
            }
            if held_back.get(&chain).is_some_and(|(_, until)| *until > now) {
                continue;
            }
            let task_inner = Arc::clone(&inner);
            let token = cancel.child_token();
            let name = chain.clone();
            loops.insert(
                chain,
                tokio::spawn(async move { task_inner.run_chain(&name, &token).await }),
            );
        }
    }

    join_all(loops.into_values()).await;
    tracing::info!("block poller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEndpoint;
    use crate::observer::{HeightChannel, HeightObserver, HeightReceiver};
    use crate::registry::EndpointRegistry;

    fn config() -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_millis(100),
            ..PollerConfig::default()
        }
    }

    fn setup(endpoint: MockEndpoint, active: bool) -> (BlockPoller, Arc<EndpointRegistry>, HeightReceiver) {
        let url = endpoint.url().to_string();
        let dyn_endpoint: Arc<dyn ChainEndpoint> = Arc::new(endpoint);
        let registry = Arc::new(EndpointRegistry::new().with_chain("osmosis", [dyn_endpoint]));
        if active {
            registry.mark_checked("osmosis", &url, true);
        }
        let observers = Arc::new(ObserverRegistry::new());
        let (channel, rx) = HeightChannel::new(64, "test");
        observers.subscribe("osmosis", channel);
        let poller = BlockPoller::new(EndpointSelector::new(Arc::clone(&registry)), observers, config());
        (poller, registry, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_and_stale_heights_are_skipped() {
        let endpoint = MockEndpoint::new("https://a").with_heights(&[5, 5, 6, 8, 8, 9]);
        let (poller, _registry, mut rx) = setup(endpoint, true);

        let outcome = poller.run_chain("osmosis", &CancellationToken::new()).await;
        assert_eq!(outcome, PollOutcome::FeedEnded { delivered: 4 });
        assert_eq!(rx.drain(), vec![5, 6, 8, 9]);
        assert_eq!(poller.cursor("osmosis"), Some(9));
    }

    #[tokio::test]
    async fn stream_feed_is_preferred() {
        let endpoint = MockEndpoint::new("https://a")
            .with_stream(&[3, 4, 4, 2, 7])
            .with_heights(&[100]);
        let (poller, _registry, mut rx) = setup(endpoint, true);

        let outcome = poller.run_chain("osmosis", &CancellationToken::new()).await;
        assert_eq!(outcome, PollOutcome::FeedEnded { delivered: 3 });
        assert_eq!(rx.drain(), vec![3, 4, 7]);
    }

    #[tokio::test(start_paused = true)]
    async fn cursor_survives_feed_restart() {
        let endpoint = MockEndpoint::new("https://a")
            .with_stream(&[10, 11])
            .with_heights(&[9, 11, 12]);
        let (poller, _registry, mut rx) = setup(endpoint, true);
        let cancel = CancellationToken::new();

        poller.run_chain("osmosis", &cancel).await;
        // second run polls, since the stream was consumed
        let outcome = poller.run_chain("osmosis", &cancel).await;
        assert_eq!(outcome, PollOutcome::FeedEnded { delivered: 1 });
        assert_eq!(rx.drain(), vec![10, 11, 12]);
    }

    #[tokio::test(start_paused = true)]
    async fn one_loop_per_chain() {
        let heights: Vec<Height> = (1..=1000).collect();
        let endpoint = MockEndpoint::new("https://a").with_heights(&heights);
        let (poller, _registry, _rx) = setup(endpoint, true);
        let poller = Arc::new(poller);
        let cancel = CancellationToken::new();

        let first = {
            let poller = Arc::clone(&poller);
            let cancel = cancel.clone();
            tokio::spawn(async move { poller.run_chain("osmosis", &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(poller.run_chain("osmosis", &cancel).await, PollOutcome::AlreadyRunning);

        cancel.cancel();
        assert_eq!(first.await.unwrap(), PollOutcome::Cancelled);

        // lock released on cancellation
        let again = CancellationToken::new();
        again.cancel();
        assert_eq!(poller.run_chain("osmosis", &again).await, PollOutcome::Cancelled);
    }

    #[tokio::test]
    async fn no_active_endpoint() {
        let endpoint = MockEndpoint::new("https://a").with_heights(&[1]);
        let (poller, _registry, mut rx) = setup(endpoint, false);

        let outcome = poller.run_chain("osmosis", &CancellationToken::new()).await;
        assert_eq!(outcome, PollOutcome::NoActiveEndpoints);
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn unobserved_chain_is_not_polled() {
        let endpoint = MockEndpoint::new("https://a").with_heights(&[1]);
        let (poller, _registry, _rx) = setup(endpoint, true);
        assert_eq!(
            poller.run_chain("juno", &CancellationToken::new()).await,
            PollOutcome::Unobserved
        );
    }

    #[tokio::test(start_paused = true)]
    async fn loop_ends_when_last_observer_leaves() {
        let heights: Vec<Height> = (1..=1000).collect();
        let dyn_endpoint: Arc<dyn ChainEndpoint> =
            Arc::new(MockEndpoint::new("https://a").with_heights(&heights));
        let registry = Arc::new(EndpointRegistry::new().with_chain("osmosis", [dyn_endpoint]));
        registry.mark_checked("osmosis", "https://a", true);
        let observers = Arc::new(ObserverRegistry::new());
        let (channel, _rx) = HeightChannel::new(4, "test");
        let id = channel.id();
        observers.subscribe("osmosis", channel);

        let poller = Arc::new(BlockPoller::new(
            EndpointSelector::new(registry),
            Arc::clone(&observers),
            config(),
        ));
        let task = {
            let poller = Arc::clone(&poller);
            tokio::spawn(async move { poller.run_chain("osmosis", &CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(350)).await;
        observers.unsubscribe("osmosis", id);

        assert_eq!(task.await.unwrap(), PollOutcome::Unobserved);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_backs_off_until_an_endpoint_is_active() {
        let endpoint = MockEndpoint::new("https://a").with_stream(&[1, 2, 3]);
        let (poller, registry, mut rx) = setup(endpoint, false);

        poller.start();
        assert!(poller.is_running());
        tokio::time::sleep(Duration::from_secs(2)).await;
        registry.mark_checked("osmosis", "https://a", true);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_none(), "chain should still be backing off");

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(rx.drain(), vec![1, 2, 3]);

        poller.stop().await;
        assert!(!poller.is_running());
    }
}
