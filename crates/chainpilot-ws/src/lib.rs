//! chainpilot-ws — streaming block heights over CometBFT WebSockets.
//!
//! # Features
//! - [`WsHeightFeed`]: one `subscribe` to `tm.event='NewBlock'`, yielding heights
//! - [`StreamingEndpoint`]: wraps any [`chainpilot_core::ChainEndpoint`] and
//!   serves its `subscribe_heights` from the feed
//!
//! Feeds do not reconnect on their own; the block poller re-selects an
//! endpoint and opens a new feed when one ends.

pub mod endpoint;
pub mod feed;

pub use endpoint::StreamingEndpoint;
pub use feed::{websocket_url, WsFeedConfig, WsHeightFeed};
