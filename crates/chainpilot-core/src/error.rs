//! Error types for endpoint transport and for the coordination layer.

use thiserror::Error;

use crate::request::JsonRpcError;
use crate::types::TxHash;

/// Errors that can occur while talking to a single endpoint.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, timeout, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// WebSocket connection/send/receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// Response decoded but carried an unusable value, e.g. a non-hex hash.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if this error is retryable (transient).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::WebSocket(_) | Self::Timeout { .. }
        )
    }

    /// Returns `true` if the endpoint answered but the payload was unusable.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Deserialization(_) | Self::Malformed(_))
    }
}

/// Caller-facing errors of the coordination layer.
#[derive(Debug, Error)]
pub enum PilotError {
    /// A liveness probe failed. Only recorded in endpoint state and logs.
    #[error("Endpoint {endpoint} unavailable: {reason}")]
    EndpointUnavailable { endpoint: String, reason: String },

    /// The selector found no live endpoint for the chain.
    #[error("No active endpoints for chain {chain}")]
    NoActiveEndpoints { chain: String },

    /// The chain name is not configured.
    #[error("Unknown chain: {0}")]
    UnknownChain(String),

    /// The endpoint refused the request during pre-inclusion validation.
    #[error("Submission rejected with code {code}: {log}")]
    SubmissionRejected {
        hash: Option<TxHash>,
        code: u32,
        log: String,
    },

    /// The request was included but finished with a non-zero status code.
    #[error("Request {hash} included with error code {code}: {log}")]
    ExecutionRejected { hash: TxHash, code: u32, log: String },

    /// A bounded retry budget or the submission deadline ran out.
    #[error("Timed out in {phase} after {attempts} attempt(s)")]
    Timeout { phase: &'static str, attempts: u32 },

    /// A terminal record or acknowledgement could not be decoded.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A submission was attempted with no messages.
    #[error("Submission contains no messages")]
    EmptySubmission,

    /// The signing capability failed.
    #[error("Signing failed: {0}")]
    Signing(String),

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Endpoint-level failure that is not covered by a more specific variant.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl PilotError {
    /// Returns `true` if the request reached a block but did not succeed.
    pub fn is_execution_error(&self) -> bool {
        matches!(self, Self::ExecutionRejected { .. })
    }

    /// Returns `true` if a retry budget or deadline was exhausted.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_is_not_retryable() {
        let err: TransportError = serde_json::from_str::<u64>("\"x\"").unwrap_err().into();
        assert!(err.is_malformed());
        assert!(!err.is_retryable());
        assert!(TransportError::Timeout { ms: 10 }.is_retryable());

        let bad_hash = TransportError::Malformed("invalid transaction hash xyz".into());
        assert!(bad_hash.is_malformed());
        assert!(!bad_hash.is_retryable());
    }

    #[test]
    fn execution_rejected_display() {
        let err = PilotError::ExecutionRejected {
            hash: TxHash::from("ABCD"),
            code: 7,
            log: "insufficient funds".into(),
        };
        assert!(err.is_execution_error());
        assert_eq!(
            err.to_string(),
            "Request ABCD included with error code 7: insufficient funds"
        );
    }
}
