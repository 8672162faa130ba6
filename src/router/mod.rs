// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Request Router
//!
//! Turns a [`SessionRequest`] into exactly one JSON-RPC response.
//!
//! ## Pipeline
//!
//! 1. Session lookup (`SessionNotFound` / `SessionExpired`)
//! 2. Resolved log and in-flight table: redeliveries get the first response
//!    for as long as the session lives
//! 3. Chain, method, account and params checks against the session
//! 4. FIFO worker per `(namespace, chainId, address)`: a second session check,
//!    user approval, then the handler, bounded by the request timeout and the
//!    topic's cancellation token
//!
//! Transient signer failures are retried once after a backoff. Irrevocable
//! handlers (broadcasts) are never abandoned once invoked.
//!
//! [`RequestRouter::submit`] fixes a request's queue position synchronously;
//! [`RequestRouter::route`] submits and waits.

pub mod cache;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::approval::{Decision, UserApproval};
use crate::codec::{self, JsonRpcResponse};
use crate::dispatch::{MethodEntry, MethodRegistry, PreparedInput};
use crate::error::{BridgeError, InvariantViolation};
use crate::lifecycle::TopicTokens;
use crate::models::{AccountId, ChainId, Session, SessionRequest, EIP155};
use crate::signer::{ChainSigner, SignerError, SignerRegistry};
use crate::storage::{SessionStore, StoreError};

use cache::{fingerprint, Fingerprint, RequestKey, Resolved, ResolvedLog};

/// Default bound on approval plus signing.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Default pause before the single retry of a transient failure.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub request_timeout: Duration,
    pub retry_backoff: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

/// Serialization domain: one signer address on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QueueKey {
    namespace: String,
    chain_id: String,
    address: String,
}

impl QueueKey {
    fn for_account(account: &AccountId) -> Self {
        let address = if account.namespace() == EIP155 {
            account.address().to_ascii_lowercase()
        } else {
            account.address().to_string()
        };
        Self {
            namespace: account.namespace().to_string(),
            chain_id: account.chain().to_string(),
            address,
        }
    }
}

struct Job {
    request: SessionRequest,
    account: AccountId,
    entry: MethodEntry,
    input: PreparedInput,
    signer: Arc<dyn ChainSigner>,
    cancel: CancellationToken,
    fingerprint: Fingerprint,
}

struct InFlight {
    fingerprint: Fingerprint,
    done: watch::Receiver<Option<JsonRpcResponse>>,
    notify: watch::Sender<Option<JsonRpcResponse>>,
}

/// Response handle returned by [`RequestRouter::submit`].
pub struct PendingResponse {
    inner: Pending,
}

enum Pending {
    Ready(Result<JsonRpcResponse, InvariantViolation>),
    Waiting {
        id: u64,
        done: watch::Receiver<Option<JsonRpcResponse>>,
    },
}

impl PendingResponse {
    fn ready(response: JsonRpcResponse) -> Self {
        Self {
            inner: Pending::Ready(Ok(response)),
        }
    }

    /// Wait for the response.
    pub async fn response(self) -> Result<JsonRpcResponse, InvariantViolation> {
        match self.inner {
            Pending::Ready(result) => result,
            Pending::Waiting { id, mut done } => {
                let response = match done.wait_for(Option::is_some).await {
                    Ok(response) => response.clone(),
                    // The worker went away without answering (runtime teardown).
                    Err(_) => None,
                };
                Ok(response.unwrap_or_else(|| BridgeError::SessionDisconnected.to_response(id)))
            }
        }
    }
}

pub struct RequestRouter {
    store: Arc<SessionStore>,
    methods: Arc<MethodRegistry>,
    signers: Arc<SignerRegistry>,
    approval: Arc<dyn UserApproval>,
    tokens: Arc<TopicTokens>,
    resolved: Arc<ResolvedLog>,
    in_flight: Mutex<HashMap<RequestKey, InFlight>>,
    queues: Mutex<HashMap<QueueKey, mpsc::UnboundedSender<Job>>>,
    config: RouterConfig,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RequestRouter {
    pub fn new(
        store: Arc<SessionStore>,
        methods: Arc<MethodRegistry>,
        signers: Arc<SignerRegistry>,
        approval: Arc<dyn UserApproval>,
        tokens: Arc<TopicTokens>,
        config: RouterConfig,
    ) -> Self {
        Self {
            store,
            methods,
            signers,
            approval,
            tokens,
            resolved: Arc::new(ResolvedLog::new()),
            in_flight: Mutex::new(HashMap::new()),
            queues: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Route `request` and wait for its response.
    ///
    /// `Err` is only returned for a request id reused with a different payload.
    pub async fn route(self: &Arc<Self>, request: SessionRequest) -> Result<JsonRpcResponse, InvariantViolation> {
        self.submit(request).response().await
    }

    /// Accept `request` and fix its position in its signer queue.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(self: &Arc<Self>, request: SessionRequest) -> PendingResponse {
        let id = request.id;
        // Taken before the lookup so a disconnect racing this call either
        // hides the session or cancels this token.
        let cancel = self.tokens.token(&request.topic);
        let session = match self.store.get(&request.topic) {
            Ok(session) => session,
            Err(e) => {
                if matches!(e, StoreError::NotFound(_)) {
                    self.tokens.cancel(&request.topic);
                }
                return PendingResponse::ready(BridgeError::from(e).to_response(id));
            }
        };
        let now = self.store.now();
        if !session.is_active(now) {
            debug!(topic = %request.topic, id, "Request on expired session");
            return PendingResponse::ready(BridgeError::SessionExpired(request.topic).to_response(id));
        }

        let key: RequestKey = (request.topic.clone(), id);
        let fingerprint = fingerprint(&request);

        let mut in_flight = lock(&self.in_flight);
        if let Some(resolved) = self.resolved.get(&key) {
            return self.replay(&key, fingerprint, resolved.fingerprint, || {
                Pending::Ready(Ok(resolved.response.clone()))
            });
        }
        if let Some(running) = in_flight.get(&key) {
            let done = running.done.clone();
            return self.replay(&key, fingerprint, running.fingerprint, || Pending::Waiting { id, done });
        }

        let (account, entry, input, signer) = match self.prepare(&request, &session) {
            Ok(prepared) => prepared,
            Err(e) => {
                debug!(topic = %request.topic, id, error = %e, "Request refused");
                let response = e.to_response(id);
                self.resolved.record(
                    key,
                    Resolved {
                        fingerprint,
                        response: response.clone(),
                    },
                    &cancel,
                );
                return PendingResponse::ready(response);
            }
        };

        let (notify, done) = watch::channel(None);
        in_flight.insert(
            key,
            InFlight {
                fingerprint,
                done: done.clone(),
                notify,
            },
        );
        drop(in_flight);

        let queue = QueueKey::for_account(&account);
        debug!(
            topic = %request.topic,
            id,
            method = %request.method,
            account = %account,
            "Request queued"
        );
        self.enqueue(
            queue,
            Job {
                request,
                account,
                entry,
                input,
                signer,
                cancel,
                fingerprint,
            },
        );

        PendingResponse {
            inner: Pending::Waiting { id, done },
        }
    }

    fn replay(
        &self,
        key: &RequestKey,
        incoming: Fingerprint,
        recorded: Fingerprint,
        pending: impl FnOnce() -> Pending,
    ) -> PendingResponse {
        if incoming != recorded {
            warn!(topic = %key.0, id = key.1, "Request id reused with a different payload");
            return PendingResponse {
                inner: Pending::Ready(Err(InvariantViolation::ReplayMismatch {
                    topic: key.0.clone(),
                    id: key.1,
                })),
            };
        }
        debug!(topic = %key.0, id = key.1, "Duplicate delivery");
        PendingResponse { inner: pending() }
    }

    /// Chain, method, account, signer and params checks.
    fn prepare(
        &self,
        request: &SessionRequest,
        session: &Session,
    ) -> Result<(AccountId, MethodEntry, PreparedInput, Arc<dyn ChainSigner>), BridgeError> {
        let chain: ChainId = request
            .chain_id
            .parse()
            .map_err(|_| BridgeError::UnauthorizedChain(request.chain_id.clone()))?;
        let namespace = session
            .namespace_for(&chain)
            .ok_or_else(|| BridgeError::UnauthorizedChain(request.chain_id.clone()))?;

        if !namespace.has_method(&request.method) {
            return Err(BridgeError::UnsupportedMethod(request.method.clone()));
        }
        let entry = self
            .methods
            .get(chain.namespace(), &request.method)
            .cloned()
            .ok_or_else(|| BridgeError::UnsupportedMethod(request.method.clone()))?;

        let account = namespace
            .accounts_on(&chain)
            .into_iter()
            .next()
            .ok_or_else(|| BridgeError::UnauthorizedChain(request.chain_id.clone()))?;
        let signer = self
            .signers
            .lookup(&account)
            .ok_or_else(|| BridgeError::SignerError(format!("no signer for {account}")))?;

        let input = entry
            .handler
            .validate(&request.params, &account)
            .map_err(BridgeError::InvalidParams)?;

        Ok((account, entry, input, signer))
    }

    fn enqueue(self: &Arc<Self>, key: QueueKey, job: Job) {
        let mut queues = lock(&self.queues);
        let job = match queues.get(&key) {
            Some(sender) => match sender.send(job) {
                Ok(()) => return,
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        // The receiver is alive, so this cannot fail.
        let _ = sender.send(job);
        queues.insert(key.clone(), sender);
        tokio::spawn(Arc::clone(self).run_queue(key, receiver));
    }

    async fn run_queue(self: Arc<Self>, key: QueueKey, mut jobs: mpsc::UnboundedReceiver<Job>) {
        debug!(chain = %key.chain_id, address = %key.address, "Signer queue started");
        let shutdown = self.tokens.root().clone();
        loop {
            let job = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            let response = self.execute(&job).await;
            self.finish(job, response);
        }

        // Anything still queued at shutdown is answered, not dropped.
        jobs.close();
        while let Some(job) = jobs.recv().await {
            let response = BridgeError::SessionDisconnected.to_response(job.request.id);
            self.finish(job, response);
        }
        debug!(chain = %key.chain_id, address = %key.address, "Signer queue stopped");
    }

    fn finish(&self, job: Job, response: JsonRpcResponse) {
        let key: RequestKey = (job.request.topic, job.request.id);
        let mut in_flight = lock(&self.in_flight);
        self.resolved.record(
            key.clone(),
            Resolved {
                fingerprint: job.fingerprint,
                response: response.clone(),
            },
            &job.cancel,
        );
        if let Some(running) = in_flight.remove(&key) {
            running.notify.send_replace(Some(response));
        }
    }

    async fn execute(&self, job: &Job) -> JsonRpcResponse {
        let id = job.request.id;
        if job.cancel.is_cancelled() {
            return BridgeError::SessionDisconnected.to_response(id);
        }
        // The session may have gone while the job was queued.
        match self.store.get(&job.request.topic) {
            Ok(session) if session.is_active(self.store.now()) => {}
            Ok(_) => return BridgeError::SessionExpired(job.request.topic.clone()).to_response(id),
            Err(StoreError::NotFound(_)) => {
                debug!(topic = %job.request.topic, id, "Session gone before approval");
                return BridgeError::SessionDisconnected.to_response(id);
            }
            Err(e) => return BridgeError::from(e).to_response(id),
        }
        let deadline = Instant::now() + self.config.request_timeout;
        let account = job.account.to_string();

        let decision = tokio::select! {
            _ = job.cancel.cancelled() => return BridgeError::SessionDisconnected.to_response(id),
            decision = tokio::time::timeout_at(deadline, self.approval.review(&job.request, &account)) => decision,
        };
        match decision {
            Err(_) => return BridgeError::RequestTimeout.to_response(id),
            Ok(Decision::Reject) => {
                info!(topic = %job.request.topic, id, "Request rejected by user");
                return BridgeError::SignerRejected.to_response(id);
            }
            Ok(Decision::Approve) => {}
        }

        let result = if job.entry.contract.irrevocable {
            // Once handed to the signer a broadcast is never abandoned.
            self.invoke_with_retry(job).await
        } else {
            tokio::select! {
                _ = job.cancel.cancelled() => Err(BridgeError::SessionDisconnected),
                result = tokio::time::timeout_at(deadline, self.invoke_with_retry(job)) => {
                    result.unwrap_or(Err(BridgeError::RequestTimeout))
                }
            }
        };

        match result {
            Ok(value) => {
                debug!(topic = %job.request.topic, id, method = %job.request.method, "Request resolved");
                codec::ok(id, value)
            }
            Err(e) => {
                warn!(topic = %job.request.topic, id, method = %job.request.method, error = %e, "Request failed");
                e.to_response(id)
            }
        }
    }

    async fn invoke_with_retry(&self, job: &Job) -> Result<Value, BridgeError> {
        let handler = &job.entry.handler;
        match handler.invoke(&job.input, job.signer.as_ref()).await {
            Err(SignerError::Transient(first)) => {
                warn!(
                    topic = %job.request.topic,
                    id = job.request.id,
                    error = %first,
                    backoff_ms = self.config.retry_backoff.as_millis() as u64,
                    "Transient signer failure, retrying once"
                );
                tokio::time::sleep(self.config.retry_backoff).await;
                handler
                    .invoke(&job.input, job.signer.as_ref())
                    .await
                    .map_err(signer_error)
            }
            other => other.map_err(signer_error),
        }
    }

    /// Forget resolved requests for `topic`.
    pub fn forget_topic(&self, topic: &str) {
        let purged = self.resolved.purge_topic(topic);
        if purged > 0 {
            debug!(topic, purged, "Resolved requests purged");
        }
    }

    /// Number of requests accepted but not yet answered.
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }
}

fn signer_error(e: SignerError) -> BridgeError {
    match e {
        SignerError::Rejected => BridgeError::SignerRejected,
        SignerError::Failed(reason) => BridgeError::SignerError(reason),
        SignerError::Transient(reason) => BridgeError::TransientRpcError(reason),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::approval::ApprovalPolicy;
    use crate::clock::ManualClock;
    use crate::models::{Metadata, SessionNamespace, SessionNamespaces, SOLANA};
    use crate::negotiation::ChainSupport;
    use crate::signer::testing::ScriptedSigner;
    use crate::storage::{MemoryBackend, SessionSweeper};

    const TOPIC: &str = "topic-a";
    const EVM_A: &str = "0xAAA";
    const EVM_B: &str = "0xBBB";
    const SOL: &str = "7xKX";

    struct Harness {
        router: Arc<RequestRouter>,
        store: Arc<SessionStore>,
        clock: Arc<ManualClock>,
        tokens: Arc<TopicTokens>,
    }

    fn session(expiry: i64) -> Session {
        let mut namespaces = SessionNamespaces::new();
        namespaces.insert(
            EIP155.into(),
            SessionNamespace {
                chains: vec!["eip155:1".into(), "eip155:137".into()],
                methods: vec![
                    "personal_sign".into(),
                    "eth_sendTransaction".into(),
                    "eth_accounts".into(),
                ],
                events: vec![],
                accounts: vec![
                    format!("eip155:1:{EVM_A}"),
                    format!("eip155:137:{EVM_B}"),
                ],
            },
        );
        namespaces.insert(
            SOLANA.into(),
            SessionNamespace {
                chains: vec!["solana:mainnet-beta".into()],
                methods: vec!["solana_signMessage".into()],
                events: vec![],
                accounts: vec![format!("solana:mainnet-beta:{SOL}")],
            },
        );
        Session {
            topic: TOPIC.into(),
            namespaces,
            peer_metadata: Metadata::default(),
            expiry,
        }
    }

    fn harness_with(
        signers: Vec<(&str, Arc<ScriptedSigner>)>,
        approval: Arc<dyn UserApproval>,
    ) -> Harness {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(SessionStore::open(Arc::new(MemoryBackend::new()), clock.clone()).unwrap());
        store.put(session(2_000)).unwrap();

        let registry = Arc::new(SignerRegistry::new());
        for (namespace, signer) in signers {
            registry.register(namespace, ChainSupport::Any, signer);
        }
        let tokens = Arc::new(TopicTokens::new(CancellationToken::new()));
        let router = Arc::new(RequestRouter::new(
            store.clone(),
            Arc::new(MethodRegistry::with_defaults()),
            registry,
            approval,
            tokens.clone(),
            RouterConfig {
                request_timeout: Duration::from_secs(300),
                retry_backoff: Duration::from_millis(100),
            },
        ));
        Harness {
            router,
            store,
            clock,
            tokens,
        }
    }

    fn harness(signer: Arc<ScriptedSigner>) -> Harness {
        harness_with(vec![(EIP155, signer)], Arc::new(ApprovalPolicy::AutoApprove))
    }

    fn sign(id: u64, message: &str) -> SessionRequest {
        SessionRequest {
            topic: TOPIC.into(),
            id,
            chain_id: "eip155:1".into(),
            method: "personal_sign".into(),
            params: json!([message, EVM_A]),
        }
    }

    fn error_of(response: &JsonRpcResponse) -> &str {
        response.error_message().unwrap_or("<success>")
    }

    #[tokio::test]
    async fn routes_to_signer() {
        let signer = Arc::new(ScriptedSigner::new(EVM_A));
        let h = harness(signer.clone());

        let response = h.router.route(sign(1, "0x01")).await.unwrap();
        assert_eq!(response.result(), Some(&json!("sign_message:0x01")));
        assert_eq!(signer.call_count(), 1);
        assert_eq!(h.router.in_flight(), 0);
    }

    #[tokio::test]
    async fn missing_and_expired_sessions_are_refused() {
        let signer = Arc::new(ScriptedSigner::new(EVM_A));
        let h = harness(signer.clone());

        let mut unknown = sign(1, "0x01");
        unknown.topic = "nope".into();
        assert_eq!(error_of(&h.router.route(unknown).await.unwrap()), "SessionNotFound");

        // Expiry gating wins even over a cached resolution.
        h.router.route(sign(2, "0x02")).await.unwrap();
        h.clock.set(2_000);
        let response = h.router.route(sign(2, "0x02")).await.unwrap();
        assert_eq!(response.id, 2);
        assert_eq!(error_of(&response), "SessionExpired");
        assert_eq!(signer.call_count(), 1);
    }

    #[tokio::test]
    async fn expired_transaction_gets_wire_exact_error() {
        let h = harness(Arc::new(ScriptedSigner::new(EVM_A)));
        h.clock.set(5_000);
        let request = SessionRequest {
            topic: TOPIC.into(),
            id: 1,
            chain_id: "eip155:1".into(),
            method: "eth_sendTransaction".into(),
            params: json!([{ "from": EVM_A }]),
        };
        let response = h.router.route(request).await.unwrap();
        assert_eq!(
            serde_json::to_value(response).unwrap(),
            json!({ "id": 1, "jsonrpc": "2.0", "error": { "code": 5000, "message": "SessionExpired" } })
        );
    }

    #[tokio::test]
    async fn chain_method_and_params_are_checked() {
        let signer = Arc::new(ScriptedSigner::new(EVM_A));
        let h = harness(signer.clone());

        let mut wrong_chain = sign(1, "0x01");
        wrong_chain.chain_id = "eip155:10".into();
        assert_eq!(error_of(&h.router.route(wrong_chain).await.unwrap()), "UnauthorizedChain");

        let mut not_negotiated = sign(2, "0x01");
        not_negotiated.method = "eth_signTypedData_v4".into();
        assert_eq!(error_of(&h.router.route(not_negotiated).await.unwrap()), "UnsupportedMethod");

        // Negotiated but without a handler.
        let mut unhandled = sign(3, "0x01");
        unhandled.method = "eth_accounts".into();
        assert_eq!(error_of(&h.router.route(unhandled).await.unwrap()), "UnsupportedMethod");

        let mut bad_params = sign(4, "0x01");
        bad_params.params = json!(["0x01", "0xNotMine"]);
        assert_eq!(error_of(&h.router.route(bad_params).await.unwrap()), "InvalidParams");

        assert_eq!(signer.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_signer_is_a_signer_error() {
        let h = harness(Arc::new(ScriptedSigner::new(EVM_A)));
        let request = SessionRequest {
            topic: TOPIC.into(),
            id: 1,
            chain_id: "solana:mainnet-beta".into(),
            method: "solana_signMessage".into(),
            params: json!({ "message": "3Bxs", "pubkey": SOL }),
        };
        assert_eq!(error_of(&h.router.route(request).await.unwrap()), "SignerError");
    }

    #[tokio::test]
    async fn duplicate_delivery_executes_once() {
        let signer = Arc::new(ScriptedSigner::new(EVM_A));
        let h = harness(signer.clone());

        let first = h.router.route(sign(7, "0x07")).await.unwrap();
        let second = h.router.route(sign(7, "0x07")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(signer.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_duplicates_share_one_execution() {
        let signer = Arc::new(ScriptedSigner::new(EVM_A).with_delay(Duration::from_secs(1)));
        let h = harness(signer.clone());

        let a = h.router.submit(sign(7, "0x07"));
        let b = h.router.submit(sign(7, "0x07"));
        let (a, b) = tokio::join!(a.response(), b.response());
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(signer.call_count(), 1);
    }

    #[tokio::test]
    async fn reused_id_with_other_payload_is_a_violation() {
        let h = harness(Arc::new(ScriptedSigner::new(EVM_A)));
        h.router.route(sign(9, "0x09")).await.unwrap();
        assert_eq!(
            h.router.route(sign(9, "0xff")).await,
            Err(InvariantViolation::ReplayMismatch {
                topic: TOPIC.into(),
                id: 9
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn same_address_requests_run_in_submission_order() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let signer = Arc::new(
            ScriptedSigner::new(EVM_A)
                .with_delay(Duration::from_millis(50))
                .with_log(log.clone()),
        );
        let h = harness(signer);

        let pending: Vec<_> = (1..=4).map(|i| h.router.submit(sign(i, &format!("0x0{i}")))).collect();
        for p in pending {
            assert!(!p.response().await.unwrap().is_error());
        }

        let expected: Vec<String> = (1..=4)
            .flat_map(|i| [format!("start 0x0{i}"), format!("end 0x0{i}")])
            .collect();
        assert_eq!(*log.lock().unwrap(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn different_addresses_run_concurrently() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let a = Arc::new(
            ScriptedSigner::new(EVM_A)
                .with_delay(Duration::from_millis(50))
                .with_log(log.clone()),
        );
        let b = Arc::new(
            ScriptedSigner::new(EVM_B)
                .with_delay(Duration::from_millis(50))
                .with_log(log.clone()),
        );
        let h = harness_with(
            vec![(EIP155, a), (EIP155, b)],
            Arc::new(ApprovalPolicy::AutoApprove),
        );

        let on_polygon = SessionRequest {
            topic: TOPIC.into(),
            id: 2,
            chain_id: "eip155:137".into(),
            method: "personal_sign".into(),
            params: json!(["0xbb", EVM_B]),
        };
        let first = h.router.submit(sign(1, "0xaa"));
        let second = h.router.submit(on_polygon);
        first.response().await.unwrap();
        second.response().await.unwrap();

        let log = log.lock().unwrap();
        assert!(log[0].starts_with("start") && log[1].starts_with("start"));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried_once() {
        let signer = Arc::new(ScriptedSigner::new(EVM_A).with_script(vec![
            Err(SignerError::Transient("node busy".into())),
            Ok("0xsig".into()),
        ]));
        let h = harness(signer.clone());
        let response = h.router.route(sign(1, "0x01")).await.unwrap();
        assert_eq!(response.result(), Some(&json!("0xsig")));
        assert_eq!(signer.call_count(), 2);

        let signer = Arc::new(ScriptedSigner::new(EVM_A).with_script(vec![
            Err(SignerError::Transient("node busy".into())),
            Err(SignerError::Transient("still busy".into())),
            Ok("never".into()),
        ]));
        let h = harness(signer.clone());
        let response = h.router.route(sign(1, "0x01")).await.unwrap();
        assert_eq!(error_of(&response), "TransientRpcError");
        assert_eq!(signer.call_count(), 2);
    }

    #[tokio::test]
    async fn rejections_are_never_retried() {
        let signer = Arc::new(ScriptedSigner::new(EVM_A).with_script(vec![Err(SignerError::Rejected)]));
        let h = harness(signer.clone());
        assert_eq!(error_of(&h.router.route(sign(1, "0x01")).await.unwrap()), "SignerRejected");
        assert_eq!(signer.call_count(), 1);

        let signer = Arc::new(ScriptedSigner::new(EVM_A).with_script(vec![Err(SignerError::Failed("bad".into()))]));
        let h = harness(signer.clone());
        assert_eq!(error_of(&h.router.route(sign(1, "0x01")).await.unwrap()), "SignerError");
        assert_eq!(signer.call_count(), 1);
    }

    #[tokio::test]
    async fn user_rejection_skips_signer() {
        let signer = Arc::new(ScriptedSigner::new(EVM_A));
        let h = harness_with(vec![(EIP155, signer.clone())], Arc::new(ApprovalPolicy::Deny));
        assert_eq!(error_of(&h.router.route(sign(1, "0x01")).await.unwrap()), "SignerRejected");
        assert_eq!(signer.call_count(), 0);
    }

    struct NeverAnswers;

    #[async_trait]
    impl UserApproval for NeverAnswers {
        async fn review(&self, _request: &SessionRequest, _account: &str) -> Decision {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_approval_times_out() {
        let signer = Arc::new(ScriptedSigner::new(EVM_A));
        let h = harness_with(vec![(EIP155, signer.clone())], Arc::new(NeverAnswers));
        let response = h.router.route(sign(1, "0x01")).await.unwrap();
        assert_eq!(error_of(&response), "RequestTimeout");
        assert_eq!(signer.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_signer_times_out() {
        let signer = Arc::new(ScriptedSigner::new(EVM_A).with_delay(Duration::from_secs(600)));
        let h = harness(signer);
        let response = h.router.route(sign(1, "0x01")).await.unwrap();
        assert_eq!(error_of(&response), "RequestTimeout");
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_in_flight_and_queued() {
        let signer = Arc::new(ScriptedSigner::new(EVM_A).with_delay(Duration::from_secs(10)));
        let h = harness(signer.clone());

        let running = h.router.submit(sign(1, "0x01"));
        let queued = h.router.submit(sign(2, "0x02"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.store.delete(TOPIC).unwrap();
        h.tokens.cancel(TOPIC);

        assert_eq!(error_of(&running.response().await.unwrap()), "SessionDisconnected");
        assert_eq!(error_of(&queued.response().await.unwrap()), "SessionDisconnected");
        assert_eq!(signer.call_count(), 1);

        // Redelivery after disconnect.
        h.router.forget_topic(TOPIC);
        assert_eq!(error_of(&h.router.route(sign(1, "0x01")).await.unwrap()), "SessionNotFound");
    }

    #[tokio::test(start_paused = true)]
    async fn session_deleted_while_queued_is_not_signed() {
        let signer = Arc::new(ScriptedSigner::new(EVM_A).with_delay(Duration::from_secs(10)));
        let h = harness(signer.clone());

        let running = h.router.submit(sign(1, "0x01"));
        let queued = h.router.submit(sign(2, "0x02"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        // The session row is gone but the topic token was never cancelled.
        h.store.delete(TOPIC).unwrap();

        assert!(!running.response().await.unwrap().is_error());
        assert_eq!(error_of(&queued.response().await.unwrap()), "SessionDisconnected");
        assert_eq!(signer.call_count(), 1);
    }

    #[tokio::test]
    async fn token_taken_before_disconnect_is_cancelled_by_it() {
        let h = harness(Arc::new(ScriptedSigner::new(EVM_A)));
        let token = h.tokens.token(TOPIC);
        h.store.delete(TOPIC).unwrap();
        h.tokens.cancel(TOPIC);
        assert!(token.is_cancelled());

        // A request arriving after the disconnect leaves no live token behind.
        let response = h.router.route(sign(1, "0x01")).await.unwrap();
        assert_eq!(error_of(&response), "SessionNotFound");
        assert!(!h.tokens.cancel(TOPIC));
    }

    fn send_transaction(id: u64) -> SessionRequest {
        SessionRequest {
            topic: TOPIC.into(),
            id,
            chain_id: "eip155:1".into(),
            method: "eth_sendTransaction".into(),
            params: json!([{ "from": EVM_A, "to": "0x70997970C51812dc3A010C7d01b50e0d17dc79C8" }]),
        }
    }

    fn broadcasts(signer: &ScriptedSigner) -> usize {
        signer
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(capability, _)| capability == "send_transaction")
            .count()
    }

    #[tokio::test]
    async fn redelivered_broadcast_is_not_resent_after_many_requests() {
        let signer = Arc::new(ScriptedSigner::new(EVM_A));
        let h = harness(signer.clone());

        let first = h.router.route(send_transaction(1)).await.unwrap();
        assert!(!first.is_error());
        for id in 2..=5_000 {
            h.router.route(sign(id, "0x02")).await.unwrap();
        }

        let again = h.router.route(send_transaction(1)).await.unwrap();
        assert_eq!(again, first);
        assert_eq!(broadcasts(&signer), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_sweep_drops_resolved_requests() {
        let h = harness(Arc::new(ScriptedSigner::new(EVM_A)));
        h.router.route(sign(1, "0x01")).await.unwrap();
        assert_eq!(h.router.resolved.len(), 1);

        h.clock.set(2_000);
        let swept = SessionSweeper::new(h.store.clone(), h.tokens.clone()).sweep_once();
        assert_eq!(swept, vec![TOPIC.to_string()]);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(h.router.resolved.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_survives_disconnect() {
        let signer = Arc::new(ScriptedSigner::new(EVM_A).with_delay(Duration::from_secs(10)));
        let h = harness(signer.clone());

        let send = SessionRequest {
            topic: TOPIC.into(),
            id: 1,
            chain_id: "eip155:1".into(),
            method: "eth_sendTransaction".into(),
            params: json!([{ "from": EVM_A, "to": "0x70997970C51812dc3A010C7d01b50e0d17dc79C8" }]),
        };
        let pending = h.router.submit(send);
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.tokens.cancel(TOPIC);

        let response = pending.response().await.unwrap();
        assert!(!response.is_error());
        assert!(response.result().unwrap().as_str().unwrap().starts_with("send_transaction:"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_answers_queued_requests() {
        let signer = Arc::new(ScriptedSigner::new(EVM_A).with_delay(Duration::from_secs(10)));
        let h = harness(signer);

        let running = h.router.submit(sign(1, "0x01"));
        let queued = h.router.submit(sign(2, "0x02"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.tokens.cancel_all();

        assert_eq!(error_of(&running.response().await.unwrap()), "SessionDisconnected");
        assert_eq!(error_of(&queued.response().await.unwrap()), "SessionDisconnected");
    }
}
