//! chainpilot-core — client-side coordination for replicated chain endpoints.
//!
//! # Overview
//!
//! ChainPilot keeps track of which replicas of each chain are reachable,
//! follows block heights for the chains somebody cares about, and pushes
//! requests through a bounded submit-and-confirm pipeline. The core crate
//! defines:
//!
//! - [`ChainEndpoint`]: the async trait every endpoint transport implements
//! - [`EndpointRegistry`] / [`LivenessMonitor`]: per-endpoint liveness state
//!   and the per-chain probing tasks that maintain it
//! - [`EndpointSelector`]: uniform random choice among live endpoints
//! - [`ObserverRegistry`] / [`BlockPoller`]: height subscriptions and the
//!   loops that feed them
//! - [`Broadcaster`]: submit, then confirm, with explicit retry budgets
//! - [`ChainPilot`]: facade tying the above to a [`PilotConfig`]
//! - [`policy`] module: bounded retry and backoff

pub mod broadcast;
pub mod client;
pub mod config;
pub mod error;
pub mod liveness;
pub mod observer;
pub mod poller;
pub mod policy;
pub mod registry;
pub mod request;
pub mod selector;
pub mod signer;
pub mod transport;
pub mod types;

#[cfg(test)]
mod mock;

pub use broadcast::{BroadcastConfig, Broadcaster, SubmissionRecord, SubmissionStatus};
pub use client::ChainPilot;
pub use config::{ChainConfig, ConfigProvider, LogConfig, PilotConfig};
pub use error::{PilotError, TransportError};
pub use liveness::{LivenessConfig, LivenessMonitor, TickReport};
pub use observer::{HeightChannel, HeightObserver, HeightReceiver, ObserverId, ObserverRegistry};
pub use poller::{BlockPoller, PollOutcome, PollerConfig};
pub use registry::{EndpointRegistry, EndpointStatus, Liveness};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use selector::EndpointSelector;
pub use signer::{SignRequest, TxSigner};
pub use transport::{ChainEndpoint, HealthStatus, HeightStream};
pub use types::{
    AccountInfo, EventAttribute, Height, Identity, Message, SignedTx, SubmitAck, TerminalRecord,
    TxEvent, TxHash, TxOptions, TxStatus,
};
