//! chainpilot-http — CometBFT JSON-RPC endpoint over HTTP.
//!
//! [`HttpEndpoint`] implements [`chainpilot_core::ChainEndpoint`] with the
//! `status`, `broadcast_tx_sync` and `tx` RPC methods. It has no streaming
//! height feed; wrap it in `chainpilot_ws::StreamingEndpoint` for one.

pub mod client;
pub mod wire;

pub use client::{HttpEndpoint, HttpEndpointConfig};
