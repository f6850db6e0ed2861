//! Retry and backoff policy shared by the poller and the broadcaster.
//!
//! Every retry loop in the crate is bounded by a [`RetryConfig`] passed in
//! by the caller; there are no process-wide retry knobs.

pub mod retry;

pub use retry::{RetryConfig, RetryError, RetryPolicy};
