// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Session Controller
//!
//! Resolves proposals into settled sessions and drives their lifecycle.
//!
//! ## Proposal Resolution
//!
//! Each proposal id resolves exactly once. `approve` and `reject` on an id that
//! was already resolved (or is being resolved) fail with
//! `ProposalAlreadyResolved`. A failed negotiation or settlement leaves the
//! proposal pending so the caller can reject it.
//!
//! ## Session Lifecycle
//!
//! | Operation | Store | Relay | In-flight requests |
//! |-----------|-------|-------|--------------------|
//! | `approve` | put | settle | n/a |
//! | `extend` | replace | extend | untouched |
//! | `disconnect` | delete | notify peer | cancelled |
//! | `handle_peer_delete` | delete | none | cancelled |

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{BridgeError, BridgeResult};
use crate::lifecycle::TopicTokens;
use crate::models::{ChainId, Proposal, Session, SessionEvent};
use crate::negotiation::{negotiate, LocalAccount};
use crate::relay::RelayTransport;
use crate::storage::SessionStore;

/// Default session lifetime (7 days).
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

enum Slot {
    Pending(Proposal),
    Resolving,
}

#[derive(Default)]
struct Proposals {
    slots: HashMap<u64, Slot>,
    consumed: HashSet<u64>,
    consumed_order: VecDeque<u64>,
}

impl Proposals {
    fn is_resolved(&self, id: u64) -> bool {
        self.consumed.contains(&id) || matches!(self.slots.get(&id), Some(Slot::Resolving))
    }

    /// Move a pending proposal into `Resolving`.
    fn claim(&mut self, id: u64) -> BridgeResult<Proposal> {
        if self.is_resolved(id) {
            return Err(BridgeError::ProposalAlreadyResolved(id));
        }
        match self.slots.insert(id, Slot::Resolving) {
            Some(Slot::Pending(proposal)) => Ok(proposal),
            _ => {
                self.slots.remove(&id);
                Err(BridgeError::ProposalNotFound(id))
            }
        }
    }

    fn release(&mut self, proposal: Proposal) {
        self.slots.insert(proposal.id, Slot::Pending(proposal));
    }

    fn consume(&mut self, id: u64) {
        self.slots.remove(&id);
        if self.consumed.insert(id) {
            self.consumed_order.push_back(id);
        }
    }
}

pub struct SessionController {
    store: Arc<SessionStore>,
    relay: Arc<dyn RelayTransport>,
    tokens: Arc<TopicTokens>,
    ttl: Duration,
    proposals: Mutex<Proposals>,
}

/// Fresh 64-hex-character session topic.
fn new_topic() -> String {
    format!("{:x}", Sha256::digest(Uuid::new_v4().as_bytes()))
}

impl SessionController {
    pub fn new(
        store: Arc<SessionStore>,
        relay: Arc<dyn RelayTransport>,
        tokens: Arc<TopicTokens>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            relay,
            tokens,
            ttl,
            proposals: Mutex::new(Proposals::default()),
        }
    }

    fn proposals(&self) -> MutexGuard<'_, Proposals> {
        self.proposals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ttl_secs(&self) -> i64 {
        i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX)
    }

    /// Register an inbound proposal for the caller to approve or reject.
    pub fn receive_proposal(&self, proposal: Proposal) -> BridgeResult<()> {
        let mut proposals = self.proposals();
        if proposals.is_resolved(proposal.id) {
            return Err(BridgeError::ProposalAlreadyResolved(proposal.id));
        }
        if proposals.slots.contains_key(&proposal.id) {
            debug!(proposal_id = proposal.id, "Proposal already pending");
            return Ok(());
        }
        info!(
            proposal_id = proposal.id,
            proposer = %proposal.proposer.name,
            "Proposal pending"
        );
        proposals.release(proposal);
        Ok(())
    }

    /// Proposals waiting for a decision, ordered by id.
    pub fn pending_proposals(&self) -> Vec<Proposal> {
        let mut pending: Vec<Proposal> = self
            .proposals()
            .slots
            .values()
            .filter_map(|slot| match slot {
                Slot::Pending(p) => Some(p.clone()),
                Slot::Resolving => None,
            })
            .collect();
        pending.sort_by_key(|p| p.id);
        pending
    }

    /// Settle proposal `id` with the given local accounts.
    pub async fn approve(&self, id: u64, accounts: &[LocalAccount]) -> BridgeResult<Session> {
        let proposal = self.proposals().claim(id)?;

        let namespaces = match negotiate(
            &proposal.required_namespaces,
            &proposal.optional_namespaces,
            accounts,
        ) {
            Ok(namespaces) => namespaces,
            Err(e) => {
                warn!(proposal_id = id, error = %e, "Negotiation failed");
                self.proposals().release(proposal);
                return Err(BridgeError::NegotiationFailed(e.to_string()));
            }
        };

        let mut topic = new_topic();
        while self.store.contains(&topic) {
            topic = new_topic();
        }
        let session = Session {
            topic,
            namespaces,
            peer_metadata: proposal.proposer.clone(),
            expiry: self.store.now().saturating_add(self.ttl_secs()),
        };

        if let Err(e) = self.store.put(session.clone()) {
            self.proposals().release(proposal);
            return Err(e.into());
        }

        if let Err(e) = self.relay.settle_session(&proposal, &session).await {
            warn!(proposal_id = id, topic = %session.topic, error = %e, "Settlement failed");
            if let Err(e) = self.store.delete(&session.topic) {
                warn!(topic = %session.topic, error = %e, "Failed to roll back session");
            }
            self.proposals().release(proposal);
            return Err(BridgeError::Relay(e.to_string()));
        }

        self.proposals().consume(id);
        info!(
            proposal_id = id,
            topic = %session.topic,
            namespaces = session.namespaces.len(),
            expiry = session.expiry,
            "Session approved"
        );
        Ok(session)
    }

    /// Decline proposal `id`. The proposal is consumed even if the relay
    /// cannot deliver the rejection.
    pub async fn reject(&self, id: u64, reason: &str) -> BridgeResult<()> {
        let proposal = self.proposals().claim(id)?;
        self.proposals().consume(id);
        info!(proposal_id = id, reason, "Proposal rejected");

        self.relay
            .reject_proposal(&proposal, reason)
            .await
            .map_err(|e| BridgeError::Relay(e.to_string()))
    }

    /// Close `topic` from the wallet side. Closing an unknown topic is a no-op.
    pub async fn disconnect(&self, topic: &str, reason: &str) -> BridgeResult<()> {
        let existed = self.store.delete(topic)?;
        self.tokens.cancel(topic);
        if !existed {
            debug!(topic, "Disconnect of unknown session");
            return Ok(());
        }

        info!(topic, reason, "Session disconnected");
        if let Err(e) = self.relay.disconnect_session(topic, reason).await {
            warn!(topic, error = %e, "Peer was not notified of disconnect");
        }
        Ok(())
    }

    /// The dApp closed `topic`. Returns whether the session existed.
    pub fn handle_peer_delete(&self, topic: &str) -> BridgeResult<bool> {
        let existed = self.store.delete(topic)?;
        self.tokens.cancel(topic);
        if existed {
            info!(topic, "Session deleted by peer");
        }
        Ok(existed)
    }

    /// Push the expiry of an active session to `now + ttl`. Returns the new expiry.
    pub async fn extend(&self, topic: &str) -> BridgeResult<i64> {
        let mut session = self.active(topic)?;
        session.expiry = self.store.now().saturating_add(self.ttl_secs());
        let expiry = session.expiry;
        self.store.replace(session)?;

        info!(topic, expiry, "Session extended");
        self.relay
            .extend_session(topic, expiry)
            .await
            .map_err(|e| BridgeError::Relay(e.to_string()))?;
        Ok(expiry)
    }

    /// Publish a wallet event (e.g. `accountsChanged`) on `topic`.
    pub async fn emit_event(&self, topic: &str, chain_id: &str, event: SessionEvent) -> BridgeResult<()> {
        let session = self.active(topic)?;
        let chain: ChainId = chain_id
            .parse()
            .map_err(|_| BridgeError::UnauthorizedChain(chain_id.to_string()))?;
        let namespace = session
            .namespace_for(&chain)
            .ok_or_else(|| BridgeError::UnauthorizedChain(chain_id.to_string()))?;
        if !namespace.has_event(&event.name) {
            return Err(BridgeError::UnsupportedEvent(event.name));
        }

        debug!(topic, chain_id, event = %event.name, "Emitting session event");
        self.relay
            .emit_event(topic, chain_id, &event)
            .await
            .map_err(|e| BridgeError::Relay(e.to_string()))
    }

    /// Session on `topic` if it is still active.
    pub fn active(&self, topic: &str) -> BridgeResult<Session> {
        let session = self.store.get(topic)?;
        if !session.is_active(self.store.now()) {
            return Err(BridgeError::SessionExpired(topic.to_string()));
        }
        Ok(session)
    }

    pub fn active_sessions(&self) -> BridgeResult<Vec<Session>> {
        Ok(self.store.list_active(self.store.now())?)
    }

    /// Forget all but the `keep` most recently consumed proposal ids.
    pub fn prune_consumed(&self, keep: usize) -> usize {
        let mut proposals = self.proposals();
        let mut pruned = 0;
        while proposals.consumed_order.len() > keep {
            if let Some(id) = proposals.consumed_order.pop_front() {
                proposals.consumed.remove(&id);
                pruned += 1;
            }
        }
        pruned
    }
}
