// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Wallet Bridge
//!
//! Owns every bridge component and the background sweeper. Built once with
//! [`WalletBridge::new`], started with [`WalletBridge::start`] and torn down
//! with [`WalletBridge::shutdown`]; there is no global state.
//!
//! ```text
//! relay ──pair/proposal──▶ PairingController ──▶ SessionController ──▶ SessionStore
//!   ▲                                                                    │
//!   └──────────── responses ◀── RequestRouter ◀── sessionRequest ────────┘
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::approval::UserApproval;
use crate::clock::Clock;
use crate::codec::JsonRpcResponse;
use crate::config::BridgeSettings;
use crate::dispatch::MethodRegistry;
use crate::error::{BridgeResult, InvariantViolation};
use crate::lifecycle::TopicTokens;
use crate::models::{Proposal, Session, SessionEvent, SessionRequest};
use crate::negotiation::LocalAccount;
use crate::pairing::{PairingController, PairingState};
use crate::relay::{PairingEvent, RelayTransport};
use crate::router::RequestRouter;
use crate::session::SessionController;
use crate::signer::SignerRegistry;
use crate::storage::{SessionBackend, SessionStore, SessionSweeper};

/// External collaborators the bridge is wired to.
pub struct BridgeDeps {
    pub relay: Arc<dyn RelayTransport>,
    pub backend: Arc<dyn SessionBackend>,
    pub clock: Arc<dyn Clock>,
    pub signers: Arc<SignerRegistry>,
    pub approval: Arc<dyn UserApproval>,
}

pub struct WalletBridge {
    store: Arc<SessionStore>,
    pairing: PairingController,
    sessions: SessionController,
    router: Arc<RequestRouter>,
    relay: Arc<dyn RelayTransport>,
    signers: Arc<SignerRegistry>,
    tokens: Arc<TopicTokens>,
    settings: BridgeSettings,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl WalletBridge {
    /// Load persisted sessions and wire the components together.
    pub fn new(deps: BridgeDeps, settings: BridgeSettings) -> BridgeResult<Self> {
        let store = Arc::new(SessionStore::open(deps.backend, deps.clock.clone())?);
        let tokens = Arc::new(TopicTokens::new(CancellationToken::new()));

        let pairing = PairingController::new(deps.relay.clone(), deps.clock, settings.pairing_timeout);
        let sessions = SessionController::new(
            store.clone(),
            deps.relay.clone(),
            tokens.clone(),
            settings.session_ttl,
        );
        let router = Arc::new(RequestRouter::new(
            store.clone(),
            Arc::new(MethodRegistry::with_defaults()),
            deps.signers.clone(),
            deps.approval,
            tokens.clone(),
            settings.router_config(),
        ));

        Ok(Self {
            store,
            pairing,
            sessions,
            router,
            relay: deps.relay,
            signers: deps.signers,
            tokens,
            settings,
            sweeper: Mutex::new(None),
        })
    }

    /// Spawn the expiry sweeper. Calling it again is a no-op.
    pub fn start(&self) {
        let mut sweeper = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if sweeper.is_some() {
            return;
        }
        let task = SessionSweeper::new(self.store.clone(), self.tokens.clone())
            .with_interval(self.settings.sweep_interval);
        *sweeper = Some(tokio::spawn(task.run(self.tokens.root().clone())));
        info!(
            sessions = self.store.list_active(self.store.now()).map(|s| s.len()).unwrap_or(0),
            signers = self.signers.len(),
            "Wallet bridge started"
        );
    }

    /// Cancel every queued and in-flight request and stop the sweeper.
    ///
    /// Sessions stay persisted; they are not disconnected.
    pub async fn shutdown(&self) {
        self.tokens.cancel_all();
        let task = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Session sweeper did not stop cleanly");
            }
        }
        info!("Wallet bridge stopped");
    }

    /// Token cancelled by [`WalletBridge::shutdown`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.tokens.root().clone()
    }

    // =========================================================================
    // Pairing & proposals
    // =========================================================================

    /// Pair with a dApp. A received proposal is queued for approval.
    pub async fn pair(&self, uri: &str) -> BridgeResult<PairingEvent> {
        let event = self.pairing.pair(uri).await?;
        if let PairingEvent::ProposalReceived(proposal) = &event {
            self.sessions.receive_proposal(proposal.clone())?;
        }
        Ok(event)
    }

    pub fn pairing_state(&self, topic: &str) -> PairingState {
        self.pairing.state(topic)
    }

    /// Queue a proposal that arrived outside of [`WalletBridge::pair`].
    pub fn receive_proposal(&self, proposal: Proposal) -> BridgeResult<()> {
        self.sessions.receive_proposal(proposal)
    }

    pub fn pending_proposals(&self) -> Vec<Proposal> {
        self.sessions.pending_proposals()
    }

    /// Approve proposal `id` with every account the registered signers offer.
    pub async fn approve(&self, id: u64) -> BridgeResult<Session> {
        let accounts = self.signers.local_accounts();
        self.sessions.approve(id, &accounts).await
    }

    /// Approve proposal `id` with an explicit account selection.
    pub async fn approve_with(&self, id: u64, accounts: &[LocalAccount]) -> BridgeResult<Session> {
        self.sessions.approve(id, accounts).await
    }

    pub async fn reject(&self, id: u64, reason: &str) -> BridgeResult<()> {
        self.sessions.reject(id, reason).await
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    pub async fn disconnect(&self, topic: &str, reason: &str) -> BridgeResult<()> {
        self.sessions.disconnect(topic, reason).await?;
        self.router.forget_topic(topic);
        Ok(())
    }

    /// The dApp deleted `topic`. Returns whether the session existed.
    pub fn handle_peer_delete(&self, topic: &str) -> BridgeResult<bool> {
        let existed = self.sessions.handle_peer_delete(topic)?;
        self.router.forget_topic(topic);
        Ok(existed)
    }

    pub async fn extend(&self, topic: &str) -> BridgeResult<i64> {
        self.sessions.extend(topic).await
    }

    pub async fn emit_event(&self, topic: &str, chain_id: &str, event: SessionEvent) -> BridgeResult<()> {
        self.sessions.emit_event(topic, chain_id, event).await
    }

    pub fn session(&self, topic: &str) -> BridgeResult<Session> {
        self.sessions.active(topic)
    }

    pub fn active_sessions(&self) -> BridgeResult<Vec<Session>> {
        self.sessions.active_sessions()
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Route `request`, deliver the response to the peer and return it.
    pub async fn handle_request(&self, request: SessionRequest) -> Result<JsonRpcResponse, InvariantViolation> {
        let topic = request.topic.clone();
        let response = self.router.route(request).await?;
        deliver(self.relay.as_ref(), &topic, &response).await;
        Ok(response)
    }

    /// Queue `request` now and deliver its response in the background.
    ///
    /// The request's queue position is fixed before this returns, so calling
    /// it in arrival order keeps per-account ordering.
    pub fn dispatch_request(&self, request: SessionRequest) -> JoinHandle<()> {
        let topic = request.topic.clone();
        let id = request.id;
        let pending = self.router.submit(request);
        let relay = self.relay.clone();
        tokio::spawn(async move {
            match pending.response().await {
                Ok(response) => deliver(relay.as_ref(), &topic, &response).await,
                Err(e) => error!(topic = %topic, id, error = %e, "Request dropped"),
            }
        })
    }
}

async fn deliver(relay: &dyn RelayTransport, topic: &str, response: &JsonRpcResponse) {
    if let Err(e) = relay.send_response(topic, response).await {
        warn!(topic, id = response.id, error = %e, "Response not delivered");
    }
}
