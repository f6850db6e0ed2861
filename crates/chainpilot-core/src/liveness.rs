//! Liveness monitor: periodically probes endpoints and records the result
//! in the [`EndpointRegistry`].
//!
//! Each chain runs its own monitoring task:
//!
//! ```text
//! every tick_interval:
//!     stale = endpoints not checked within stale_after
//!     probe all stale endpoints concurrently (each bounded by probe_timeout)
//!     wait for every probe, then mark_checked(result)
//!     stop this chain if idle_shutdown elapsed with no endpoint active
//! ```
//!
//! `stale_after` must be shorter than `tick_interval`, otherwise an endpoint
//! checked late in one round is skipped in the next. A chain runs one round
//! at a time: the background task and [`LivenessMonitor::tick`] take the
//! same per-chain round lock, so an endpoint is never checked twice at once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::registry::EndpointRegistry;

/// Timing of the liveness monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessConfig {
    pub tick_interval: Duration,
    /// Endpoints checked more recently than this are skipped on a tick.
    pub stale_after: Duration,
    pub probe_timeout: Duration,
    /// Stop a chain's monitor once none of its endpoints has been active for
    /// this long. `None` keeps monitoring forever.
    pub idle_shutdown: Option<Duration>,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            stale_after: Duration::from_secs(9),
            probe_timeout: Duration::from_secs(5),
            idle_shutdown: Some(Duration::from_secs(600)),
        }
    }
}

/// Outcome of one monitoring round for a chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Endpoints probed this round (the stale ones).
    pub probed: usize,
    /// Probes that succeeded.
    pub healthy: usize,
}

type RoundLock = Arc<tokio::sync::Mutex<()>>;

struct ChainTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns one background probing task per chain.
pub struct LivenessMonitor {
    registry: Arc<EndpointRegistry>,
    config: LivenessConfig,
    tasks: Mutex<HashMap<String, ChainTask>>,
    rounds: HashMap<String, RoundLock>,
}

impl LivenessMonitor {
    pub fn new(registry: Arc<EndpointRegistry>, config: LivenessConfig) -> Self {
        let rounds = registry
            .chains()
            .into_iter()
            .map(|chain| (chain, RoundLock::default()))
            .collect();
        Self {
            registry,
            config,
            tasks: Mutex::new(HashMap::new()),
            rounds,
        }
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Start monitoring every chain in the registry. Chains already being
    /// monitored are left alone.
    pub fn start(&self) {
        for chain in self.registry.chains() {
            self.start_chain(&chain);
        }
    }

    /// Start monitoring one chain. Returns `false` if the chain is unknown or
    /// its monitor is already running.
    pub fn start_chain(&self, chain: &str) -> bool {
        let Some(round) = self.rounds.get(chain) else {
            tracing::warn!(chain, "cannot monitor unknown chain");
            return false;
        };
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if tasks.get(chain).is_some_and(|t| !t.handle.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor_chain(
            Arc::clone(&self.registry),
            self.config.clone(),
            chain.to_string(),
            Arc::clone(round),
            cancel.clone(),
        ));
        tasks.insert(chain.to_string(), ChainTask { cancel, handle });
        true
    }

    /// `true` while the chain's monitoring task is alive.
    pub fn is_running(&self, chain: &str) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(chain)
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Stop one chain's monitor and wait for it to exit.
    pub async fn stop_chain(&self, chain: &str) -> bool {
        let task = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(chain);
        match task {
            Some(task) => {
                task.cancel.cancel();
                let _ = task.handle.await;
                true
            }
            None => false,
        }
    }

    /// Stop every chain's monitor and wait for all of them to exit.
    pub async fn stop(&self) {
        let tasks: Vec<ChainTask> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, t)| t)
            .collect();
        for task in &tasks {
            task.cancel.cancel();
        }
        join_all(tasks.into_iter().map(|t| t.handle)).await;
    }

    /// Run one monitoring round for `chain` right now.
    ///
    /// Waits for a round already in progress on the chain, then checks only
    /// the endpoints that are still stale.
    pub async fn tick(&self, chain: &str) -> TickReport {
        let Some(round) = self.rounds.get(chain) else {
            return TickReport::default();
        };
        let _round = round.lock().await;
        probe_stale(&self.registry, &self.config, chain).await
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(|e| e.into_inner());
        for task in tasks.values() {
            task.cancel.cancel();
        }
    }
}

/// Probe every stale endpoint of `chain` concurrently and record the results.
async fn probe_stale(registry: &EndpointRegistry, config: &LivenessConfig, chain: &str) -> TickReport {
    let stale = registry.stale_endpoints(chain, config.stale_after);
    let probes = stale.iter().map(|endpoint| async move {
        let url = endpoint.url();
        let ok = match tokio::time::timeout(config.probe_timeout, endpoint.probe_liveness()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::debug!(chain, url, error = %e, "liveness probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(
                    chain,
                    url,
                    timeout_ms = config.probe_timeout.as_millis() as u64,
                    "liveness probe timed out"
                );
                false
            }
        };
        registry.mark_checked(chain, url, ok);
        ok
    });

    let results = join_all(probes).await;
    TickReport {
        probed: results.len(),
        healthy: results.into_iter().filter(|ok| *ok).count(),
    }
}

async fn monitor_chain(
    registry: Arc<EndpointRegistry>,
    config: LivenessConfig,
    chain: String,
    round: RoundLock,
    cancel: CancellationToken,
) {
    let started = Instant::now();
    let mut ticker = tokio::time::interval(config.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(chain = %chain, "liveness monitor started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let report = tokio::select! {
            _ = cancel.cancelled() => break,
            report = async {
                let _round = round.lock().await;
                probe_stale(&registry, &config, &chain).await
            } => report,
        };
        if report.probed > 0 {
            tracing::debug!(
                chain = %chain,
                probed = report.probed,
                healthy = report.healthy,
                active = registry.active_count(&chain),
                "liveness tick"
            );
        }

        if let Some(window) = config.idle_shutdown {
            if started.elapsed() >= window && !registry.recently_active(&chain, window) {
                tracing::warn!(
                    chain = %chain,
                    idle_secs = window.as_secs(),
                    "no endpoint active within idle window, stopping liveness checks"
                );
                break;
            }
        }
    }
    tracing::info!(chain = %chain, "liveness monitor stopped");
}
