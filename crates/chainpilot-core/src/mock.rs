//! Scripted endpoint and signer used by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{PilotError, TransportError};
use crate::signer::{SignRequest, TxSigner};
use crate::transport::{ChainEndpoint, HeightStream};
use crate::types::{AccountInfo, Height, Identity, SignedTx, SubmitAck, TerminalRecord, TxHash, TxStatus};

pub(crate) struct MockEndpoint {
    url: String,
    healthy: AtomicBool,
    liveness_delay: Mutex<Duration>,
    heights: Mutex<VecDeque<Height>>,
    stream: Mutex<Option<Vec<Height>>>,
    ack_code: AtomicU32,
    statuses: Mutex<VecDeque<Result<TxStatus, TransportError>>>,
    pub liveness_checks: AtomicU32,
    pub submits: AtomicU32,
    pub status_queries: AtomicU32,
}

impl MockEndpoint {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            healthy: AtomicBool::new(true),
            liveness_delay: Mutex::new(Duration::ZERO),
            heights: Mutex::new(VecDeque::new()),
            stream: Mutex::new(None),
            ack_code: AtomicU32::new(0),
            statuses: Mutex::new(VecDeque::new()),
            liveness_checks: AtomicU32::new(0),
            submits: AtomicU32::new(0),
            status_queries: AtomicU32::new(0),
        }
    }

    pub fn arc(url: &str) -> Arc<dyn ChainEndpoint> {
        Arc::new(Self::new(url))
    }

    pub fn healthy(self, healthy: bool) -> Self {
        self.healthy.store(healthy, Ordering::SeqCst);
        self
    }

    pub fn with_heights(self, heights: &[Height]) -> Self {
        self.heights.lock().unwrap().extend(heights.iter().copied());
        self
    }

    pub fn with_stream(self, heights: &[Height]) -> Self {
        *self.stream.lock().unwrap() = Some(heights.to_vec());
        self
    }

    pub fn with_liveness_delay(self, delay: Duration) -> Self {
        *self.liveness_delay.lock().unwrap() = delay;
        self
    }

    pub fn with_ack_code(self, code: u32) -> Self {
        self.ack_code.store(code, Ordering::SeqCst);
        self
    }

    pub fn with_statuses(self, statuses: Vec<Result<TxStatus, TransportError>>) -> Self {
        self.statuses.lock().unwrap().extend(statuses);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

pub(crate) fn committed(hash: &str, height: Height, code: u32) -> TxStatus {
    TxStatus::Committed(TerminalRecord {
        hash: TxHash::from(hash),
        height,
        code,
        codespace: String::new(),
        log: if code == 0 { String::new() } else { "failed to execute message".into() },
        gas_wanted: 200_000,
        gas_used: 91_245,
        events: vec![],
        raw: serde_json::Value::Null,
    })
}

#[async_trait]
impl ChainEndpoint for MockEndpoint {
    fn url(&self) -> &str {
        &self.url
    }

    async fn probe_liveness(&self) -> Result<(), TransportError> {
        self.liveness_checks.fetch_add(1, Ordering::SeqCst);
        let delay = *self.liveness_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Http("connection refused".into()))
        }
    }

    async fn latest_height(&self) -> Result<Height, TransportError> {
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(TransportError::Http("connection refused".into()));
        }
        self.heights
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TransportError::Http("connection reset".into()))
    }

    async fn submit(&self, _tx: &SignedTx) -> Result<SubmitAck, TransportError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        let code = self.ack_code.load(Ordering::SeqCst);
        Ok(SubmitAck {
            hash: TxHash::from("C0FFEE"),
            code,
            codespace: if code == 0 { String::new() } else { "sdk".into() },
            log: if code == 0 { "[]".into() } else { "account sequence mismatch".into() },
            raw: serde_json::json!({ "code": code, "hash": "C0FFEE" }),
        })
    }

    async fn query_status(&self, _hash: &TxHash) -> Result<TxStatus, TransportError> {
        self.status_queries.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(TxStatus::Pending))
    }

    async fn subscribe_heights(&self) -> Result<Option<HeightStream>, TransportError> {
        let stream = self.stream.lock().unwrap().take();
        Ok(stream.map(|heights| {
            Box::pin(futures::stream::iter(heights.into_iter().map(Ok))) as HeightStream
        }))
    }
}

/// Signer that hands out increasing sequences and never touches the network.
#[derive(Default)]
pub(crate) struct MockSigner {
    pub signed: AtomicU32,
    pub fail: AtomicBool,
}

#[async_trait]
impl TxSigner for MockSigner {
    async fn account(
        &self,
        _identity: &Identity,
        _endpoint: &dyn ChainEndpoint,
    ) -> Result<AccountInfo, PilotError> {
        Ok(AccountInfo {
            account_number: 42,
            sequence: u64::from(self.signed.load(Ordering::SeqCst)),
        })
    }

    async fn sign(&self, request: SignRequest<'_>) -> Result<SignedTx, PilotError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PilotError::Signing("key not found".into()));
        }
        self.signed.fetch_add(1, Ordering::SeqCst);
        let mut bytes = request.account.sequence.to_be_bytes().to_vec();
        for msg in request.messages {
            bytes.extend_from_slice(msg.type_url.as_bytes());
        }
        Ok(SignedTx { bytes })
    }
}
