//! Height observers: per-chain subscriber sets and the push channel used
//! to hand new block heights to consumers.
//!
//! An observer is any [`HeightObserver`]. The common case is a
//! [`HeightChannel`], a bounded buffer that drops the oldest height when the
//! consumer falls behind, so a slow reader never blocks delivery to others.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::Notify;

use crate::types::Height;

/// Stable identity of an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl ObserverId {
    /// Allocate a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

/// Receives block heights for the chains it is subscribed to.
///
/// `deliver` is called from the poller's task and must not block.
pub trait HeightObserver: Send + Sync {
    fn id(&self) -> ObserverId;

    /// Human-readable name used in logs.
    fn label(&self) -> &str {
        "observer"
    }

    fn deliver(&self, chain: &str, height: Height);

    /// A closed observer is dropped from every chain on the next delivery.
    fn is_closed(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// HeightChannel
// ---------------------------------------------------------------------------

/// Bounded push buffer implementing [`HeightObserver`].
pub struct HeightChannel {
    id: ObserverId,
    label: String,
    capacity: usize,
    buffer: Mutex<VecDeque<Height>>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl HeightChannel {
    /// Create a channel holding at most `capacity` undelivered heights
    /// (minimum 1) and the receiver that drains it.
    pub fn new(capacity: usize, label: impl Into<String>) -> (Arc<Self>, HeightReceiver) {
        let channel = Arc::new(Self {
            id: ObserverId::next(),
            label: label.into(),
            capacity: capacity.max(1),
            buffer: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        });
        let receiver = HeightReceiver {
            channel: Arc::clone(&channel),
        };
        (channel, receiver)
    }

    /// Heights discarded because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wake the receiver and make further `recv` calls return `None` once
    /// the buffer is drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Height> {
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }
}

impl HeightObserver for HeightChannel {
    fn id(&self) -> ObserverId {
        self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn deliver(&self, chain: &str, height: Height) {
        if self.is_closed() {
            return;
        }
        {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            if buffer.len() >= self.capacity {
                buffer.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(chain, observer = %self.label, "buffer full, dropped oldest height");
            }
            buffer.push_back(height);
        }
        self.notify.notify_one();
    }
}

/// Consumer side of a [`HeightChannel`].
pub struct HeightReceiver {
    channel: Arc<HeightChannel>,
}

impl HeightReceiver {
    pub fn id(&self) -> ObserverId {
        self.channel.id
    }

    /// Wait for the next height. Returns `None` once the channel is closed
    /// and drained.
    pub async fn recv(&mut self) -> Option<Height> {
        loop {
            let notified = self.channel.notify.notified();
            if let Some(height) = self.channel.pop() {
                return Some(height);
            }
            if self.channel.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    /// Take the next buffered height without waiting.
    pub fn try_recv(&mut self) -> Option<Height> {
        self.channel.pop()
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<Height> {
        let mut buffer = self.channel.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.drain(..).collect()
    }

    pub fn dropped(&self) -> u64 {
        self.channel.dropped()
    }
}

impl Drop for HeightReceiver {
    fn drop(&mut self) {
        self.channel.closed.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// ObserverRegistry
// ---------------------------------------------------------------------------

type ObserverSet = HashMap<ObserverId, Arc<dyn HeightObserver>>;

/// Per-chain observer sets.
///
/// A chain has an entry only while it has at least one observer, so
/// [`list_subscribed_chains`](Self::list_subscribed_chains) is exactly the
/// set of chains worth polling.
#[derive(Default)]
pub struct ObserverRegistry {
    chains: RwLock<HashMap<String, ObserverSet>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `observer` to `chain`'s set. Returns `false` if it was already
    /// subscribed.
    pub fn subscribe(&self, chain: &str, observer: Arc<dyn HeightObserver>) -> bool {
        let mut chains = self.chains.write().unwrap_or_else(|e| e.into_inner());
        let set = chains.entry(chain.to_string()).or_default();
        let id = observer.id();
        if set.contains_key(&id) {
            return false;
        }
        tracing::debug!(chain, observer = observer.label(), id = id.as_u64(), "observer subscribed");
        set.insert(id, observer);
        true
    }

    /// Remove an observer from `chain`. Returns `false` if it was not
    /// subscribed. Removing the last observer removes the chain.
    pub fn unsubscribe(&self, chain: &str, id: ObserverId) -> bool {
        let mut chains = self.chains.write().unwrap_or_else(|e| e.into_inner());
        let Some(set) = chains.get_mut(chain) else {
            return false;
        };
        let removed = set.remove(&id).is_some();
        if set.is_empty() {
            chains.remove(chain);
        }
        if removed {
            tracing::debug!(chain, id = id.as_u64(), "observer unsubscribed");
        }
        removed
    }

    /// Deliver `height` to every open observer of `chain` and drop the closed
    /// ones. Returns the number of observers notified.
    pub fn notify(&self, chain: &str, height: Height) -> usize {
        // deliver outside the lock so observers may (un)subscribe re-entrantly
        let observers: Vec<Arc<dyn HeightObserver>> = {
            let chains = self.chains.read().unwrap_or_else(|e| e.into_inner());
            match chains.get(chain) {
                Some(set) => set.values().cloned().collect(),
                None => return 0,
            }
        };
        let mut delivered = 0;
        let mut closed = Vec::new();
        for observer in &observers {
            if observer.is_closed() {
                closed.push(observer.id());
                continue;
            }
            observer.deliver(chain, height);
            delivered += 1;
        }
        for id in closed {
            self.unsubscribe(chain, id);
        }
        delivered
    }

    /// Chains with at least one observer, sorted.
    pub fn list_subscribed_chains(&self) -> Vec<String> {
        let chains = self.chains.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = chains.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_observers(&self, chain: &str) -> bool {
        self.observer_count(chain) > 0
    }

    pub fn observer_count(&self, chain: &str) -> usize {
        self.chains
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(chain)
            .map_or(0, HashMap::len)
    }
}
