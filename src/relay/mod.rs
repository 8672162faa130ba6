// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Relay Transport
//!
//! Pub/sub transport between the wallet and dApps, keyed by topic. The bridge
//! never talks to the network directly; everything outbound goes through
//! [`RelayTransport`].
//!
//! - [`stdio::JsonLinesRelay`]: line-delimited JSON over stdin/stdout, used by
//!   the `wc-bridge` binary

pub mod stdio;

use async_trait::async_trait;

use crate::codec::JsonRpcResponse;
use crate::models::{Proposal, Session, SessionEvent};
use crate::pairing::PairingUri;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("relay timed out")]
    Timeout,

    #[error("relay network error: {0}")]
    Network(String),

    #[error("relay channel closed")]
    Closed,
}

/// Outcome of opening a pairing channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingEvent {
    /// The dApp published a session proposal on the pairing topic.
    ProposalReceived(Proposal),
    /// Pairing could not complete.
    Failed(String),
}

#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Subscribe to the pairing topic and wait for the dApp's proposal.
    async fn open_pairing(&self, uri: &PairingUri) -> Result<Proposal, RelayError>;

    /// Publish the settlement of `proposal` as `session`.
    async fn settle_session(&self, proposal: &Proposal, session: &Session) -> Result<(), RelayError>;

    async fn reject_proposal(&self, proposal: &Proposal, reason: &str) -> Result<(), RelayError>;

    /// Notify the peer that `topic` is closed.
    async fn disconnect_session(&self, topic: &str, reason: &str) -> Result<(), RelayError>;

    async fn extend_session(&self, topic: &str, expiry: i64) -> Result<(), RelayError>;

    async fn emit_event(
        &self,
        topic: &str,
        chain_id: &str,
        event: &SessionEvent,
    ) -> Result<(), RelayError>;

    /// Deliver a JSON-RPC response on `topic`.
    async fn send_response(&self, topic: &str, response: &JsonRpcResponse) -> Result<(), RelayError>;
}
