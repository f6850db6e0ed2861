//! Signing capability consumed by the broadcaster.
//!
//! Key storage, transaction encoding and signature algorithms live behind
//! this trait; the broadcaster only orders the calls.

use async_trait::async_trait;

use crate::error::PilotError;
use crate::transport::ChainEndpoint;
use crate::types::{AccountInfo, Identity, Message, SignedTx, TxOptions};

/// Everything needed to build one signed request.
#[derive(Debug, Clone, Copy)]
pub struct SignRequest<'a> {
    pub chain_id: &'a str,
    pub identity: &'a Identity,
    pub account: &'a AccountInfo,
    /// Bundled atomically: the chain applies all of them or none.
    pub messages: &'a [Message],
    pub options: &'a TxOptions,
}

/// Produces signed, submittable requests for an identity.
#[async_trait]
pub trait TxSigner: Send + Sync {
    /// Resolve the identity's account number and current sequence through
    /// `endpoint`.
    async fn account(
        &self,
        identity: &Identity,
        endpoint: &dyn ChainEndpoint,
    ) -> Result<AccountInfo, PilotError>;

    /// Sign a request bundling every message in `request.messages`.
    async fn sign(&self, request: SignRequest<'_>) -> Result<SignedTx, PilotError>;
}
