//! Submit-and-confirm pipeline.
//!
//! A submission goes through two phases:
//!
//! 1. **Submit**: select an endpoint, resolve the signer's account, sign one
//!    request bundling every message, and send it for pre-inclusion
//!    validation. A non-zero validation code is a [`PilotError::SubmissionRejected`].
//! 2. **Confirm**: poll the endpoint for the request's status, first with a
//!    short budget until the endpoint can answer for the hash at all, then
//!    with a longer budget until the request is committed. A committed
//!    request with a non-zero code is a [`PilotError::ExecutionRejected`].
//!
//! Exhausting either budget, or the optional overall deadline, yields
//! [`PilotError::Timeout`]. A broadcaster runs one submission at a time;
//! concurrent callers queue on an internal lock.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::PilotError;
use crate::policy::{RetryConfig, RetryError, RetryPolicy};
use crate::selector::EndpointSelector;
use crate::signer::{SignRequest, TxSigner};
use crate::transport::ChainEndpoint;
use crate::types::{Identity, Message, SubmitAck, TerminalRecord, TxHash, TxOptions, TxStatus};

const ACK_PHASE: &str = "acknowledgement";
const INCLUSION_PHASE: &str = "inclusion";
const DEADLINE_PHASE: &str = "deadline";

/// Retry budgets and signing options of a [`Broadcaster`].
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Chain id signed into every request.
    pub chain_id: String,
    /// Budget for the endpoint to start answering for a fresh hash.
    pub ack_retry: RetryConfig,
    /// Budget for the request to be committed.
    pub confirm_retry: RetryConfig,
    /// Upper bound on a whole submission, on top of the retry budgets.
    pub deadline: Option<Duration>,
    pub tx_options: TxOptions,
}

impl BroadcastConfig {
    pub fn new(chain_id: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            ..Self::default()
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            chain_id: String::new(),
            ack_retry: RetryConfig::fixed(5, Duration::from_millis(400)),
            confirm_retry: RetryConfig::fixed(12, Duration::from_secs(5)),
            deadline: None,
            tx_options: TxOptions::default(),
        }
    }
}

/// Where a submission ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SubmissionStatus {
    /// Passed validation, not yet confirmed.
    Accepted,
    Confirmed,
    /// Refused at validation or failed during execution.
    Rejected { code: u32 },
    TimedOut,
}

/// Outcome of one submission, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionRecord {
    pub request_id: TxHash,
    pub chain: String,
    /// URL of the endpoint the request was sent to.
    pub endpoint: String,
    pub submitted_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub status: SubmissionStatus,
    pub ack: SubmitAck,
    pub terminal: Option<TerminalRecord>,
}

impl SubmissionRecord {
    /// Height the request was included at, once committed.
    pub fn height(&self) -> Option<u64> {
        self.terminal.as_ref().map(|t| t.height)
    }
}

/// Submit-and-confirm pipeline bound to one chain and one signer.
pub struct Broadcaster {
    chain: String,
    selector: EndpointSelector,
    signer: Arc<dyn TxSigner>,
    config: BroadcastConfig,
    flight: tokio::sync::Mutex<()>,
    last: Mutex<Option<SubmissionRecord>>,
}

impl Broadcaster {
    pub fn new(
        chain: impl Into<String>,
        selector: EndpointSelector,
        signer: Arc<dyn TxSigner>,
        config: BroadcastConfig,
    ) -> Self {
        Self {
            chain: chain.into(),
            selector,
            signer,
            config,
            flight: tokio::sync::Mutex::new(()),
            last: Mutex::new(None),
        }
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    /// The record of the most recent submission that reached an endpoint.
    pub fn last_submission(&self) -> Option<SubmissionRecord> {
        self.last.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Submit `messages` as one atomic request signed by `identity` and wait
    /// until it is committed.
    pub async fn submit(
        &self,
        identity: &Identity,
        messages: Vec<Message>,
    ) -> Result<SubmissionRecord, PilotError> {
        self.submit_with_cancel(identity, messages, &CancellationToken::new())
            .await
    }

    /// Like [`submit`](Self::submit), returning [`PilotError::Cancelled`] as
    /// soon as `cancel` fires.
    pub async fn submit_with_cancel(
        &self,
        identity: &Identity,
        messages: Vec<Message>,
        cancel: &CancellationToken,
    ) -> Result<SubmissionRecord, PilotError> {
        if messages.is_empty() {
            return Err(PilotError::EmptySubmission);
        }

        let _flight = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PilotError::Cancelled),
            guard = self.flight.lock() => guard,
        };

        let run = self.run(identity, &messages, cancel);
        match self.config.deadline {
            Some(deadline) => tokio::time::timeout(deadline, run).await.unwrap_or_else(|_| {
                tracing::warn!(
                    chain = %self.chain,
                    deadline_ms = deadline.as_millis() as u64,
                    "submission deadline passed"
                );
                Err(PilotError::Timeout {
                    phase: DEADLINE_PHASE,
                    attempts: 1,
                })
            }),
            None => run.await,
        }
    }

    async fn run(
        &self,
        identity: &Identity,
        messages: &[Message],
        cancel: &CancellationToken,
    ) -> Result<SubmissionRecord, PilotError> {
        let endpoint = self.selector.select(&self.chain)?;
        let url = endpoint.url().to_string();

        let account = cancellable(cancel, self.signer.account(identity, endpoint.as_ref())).await?;
        let signed = cancellable(
            cancel,
            self.signer.sign(SignRequest {
                chain_id: &self.config.chain_id,
                identity,
                account: &account,
                messages,
                options: &self.config.tx_options,
            }),
        )
        .await?;

        let submitted_at = Utc::now();
        let ack = cancellable(cancel, async { endpoint.submit(&signed).await.map_err(PilotError::from) }).await?;
        let hash = ack.hash.clone();

        let mut record = SubmissionRecord {
            request_id: hash.clone(),
            chain: self.chain.clone(),
            endpoint: url.clone(),
            submitted_at,
            confirmed_at: None,
            status: SubmissionStatus::Accepted,
            ack,
            terminal: None,
        };

        if !record.ack.is_accepted() {
            let code = record.ack.code;
            let log = record.ack.log.clone();
            tracing::warn!(chain = %self.chain, url = %url, hash = %hash, code, log = %log, "submission rejected");
            record.status = SubmissionStatus::Rejected { code };
            self.remember(record);
            return Err(PilotError::SubmissionRejected {
                hash: Some(hash),
                code,
                log,
            });
        }
        tracing::info!(
            chain = %self.chain,
            url = %url,
            hash = %hash,
            sequence = account.sequence,
            messages = messages.len(),
            "submission accepted"
        );

        let terminal = match self.confirm(endpoint.as_ref(), &hash, cancel).await {
            Ok(terminal) => terminal,
            Err(e) => {
                if e.is_timeout() {
                    record.status = SubmissionStatus::TimedOut;
                    self.remember(record);
                }
                tracing::warn!(chain = %self.chain, hash = %hash, error = %e, "confirmation failed");
                return Err(e);
            }
        };

        record.confirmed_at = Some(Utc::now());
        let code = terminal.code;
        let log = terminal.log.clone();
        let height = terminal.height;
        record.terminal = Some(terminal);

        if code != 0 {
            record.status = SubmissionStatus::Rejected { code };
            self.remember(record);
            tracing::warn!(chain = %self.chain, hash = %hash, height, code, "request failed during execution");
            return Err(PilotError::ExecutionRejected { hash, code, log });
        }

        record.status = SubmissionStatus::Confirmed;
        tracing::info!(chain = %self.chain, hash = %hash, height, "request confirmed");
        self.remember(record.clone());
        Ok(record)
    }

    /// Run both confirmation phases and return the committed record.
    async fn confirm(
        &self,
        endpoint: &dyn ChainEndpoint,
        hash: &TxHash,
        cancel: &CancellationToken,
    ) -> Result<TerminalRecord, PilotError> {
        let ack_policy = RetryPolicy::new(self.config.ack_retry.clone());
        let first = ack_policy
            .poll_until(cancel, move |attempt| query_once(endpoint, hash, ACK_PHASE, attempt))
            .await
            .map_err(|e| phase_error(ACK_PHASE, e))?;

        if let TxStatus::Committed(terminal) = first {
            return Ok(terminal);
        }

        let confirm_policy = RetryPolicy::new(self.config.confirm_retry.clone());
        confirm_policy
            .poll_until(cancel, move |attempt| async move {
                let status = query_once(endpoint, hash, INCLUSION_PHASE, attempt).await?;
                Ok::<_, PilotError>(match status {
                    Some(TxStatus::Committed(terminal)) => Some(terminal),
                    _ => None,
                })
            })
            .await
            .map_err(|e| phase_error(INCLUSION_PHASE, e))
    }

    fn remember(&self, record: SubmissionRecord) {
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(record);
    }
}

/// One status query. Transport failures count as "not yet"; undecodable
/// answers abort the phase.
async fn query_once(
    endpoint: &dyn ChainEndpoint,
    hash: &TxHash,
    phase: &'static str,
    attempt: u32,
) -> Result<Option<TxStatus>, PilotError> {
    match endpoint.query_status(hash).await {
        Ok(status) => Ok(Some(status)),
        Err(e) if e.is_malformed() => Err(PilotError::MalformedResponse(e.to_string())),
        Err(e) => {
            tracing::debug!(url = endpoint.url(), hash = %hash, phase, attempt, error = %e, "status query failed");
            Ok(None)
        }
    }
}

fn phase_error(phase: &'static str, err: RetryError<PilotError>) -> PilotError {
    match err {
        RetryError::Exhausted { attempts } => PilotError::Timeout { phase, attempts },
        RetryError::Cancelled => PilotError::Cancelled,
        RetryError::Aborted(e) => e,
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, PilotError>>,
) -> Result<T, PilotError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PilotError::Cancelled),
        result = fut => result,
    }
}
