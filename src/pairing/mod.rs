// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Pairing Controller
//!
//! Consumes a pairing URI and waits for the dApp's session proposal.
//!
//! ```text
//! Idle ──pair()──▶ Pairing ──proposal──▶ ProposalReceived(id)
//!                     │
//!                     └──relay error / timeout──▶ Failed(reason)
//! ```
//!
//! URIs are single use: a topic that was ever paired, successfully or not,
//! is refused with `DuplicatePairing`.

pub mod uri;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::{BridgeError, BridgeResult};
use crate::relay::{PairingEvent, RelayTransport};

pub use uri::{PairingUri, UriError};

/// Default bound on waiting for a proposal after opening a pairing.
pub const DEFAULT_PAIRING_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingState {
    Idle,
    Pairing,
    ProposalReceived(u64),
    Failed(String),
}

pub struct PairingController {
    relay: Arc<dyn RelayTransport>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    states: Mutex<HashMap<String, PairingState>>,
}

impl PairingController {
    pub fn new(relay: Arc<dyn RelayTransport>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            relay,
            clock,
            timeout,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn set_state(&self, topic: &str, state: PairingState) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.to_string(), state);
    }

    /// Current state of the pairing on `topic`.
    pub fn state(&self, topic: &str) -> PairingState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .cloned()
            .unwrap_or(PairingState::Idle)
    }

    /// Pair with the dApp behind `raw` and wait for its proposal.
    ///
    /// URI and reuse problems are errors; relay failures and timeouts are
    /// reported as [`PairingEvent::Failed`].
    pub async fn pair(&self, raw: &str) -> BridgeResult<PairingEvent> {
        let uri: PairingUri = raw
            .parse()
            .map_err(|e: UriError| BridgeError::InvalidPairingUri(e.to_string()))?;
        if uri.is_expired(self.clock.now()) {
            return Err(BridgeError::InvalidPairingUri(format!(
                "pairing {} expired",
                uri.topic
            )));
        }

        {
            let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
            if states.contains_key(&uri.topic) {
                return Err(BridgeError::DuplicatePairing(uri.topic));
            }
            states.insert(uri.topic.clone(), PairingState::Pairing);
        }
        info!(topic = %uri.topic, relay = %uri.relay_protocol, "Pairing started");

        let event = match tokio::time::timeout(self.timeout, self.relay.open_pairing(&uri)).await {
            Ok(Ok(mut proposal)) => {
                if proposal.pairing_topic.is_empty() {
                    proposal.pairing_topic = uri.topic.clone();
                }
                info!(topic = %uri.topic, proposal_id = proposal.id, "Session proposal received");
                self.set_state(&uri.topic, PairingState::ProposalReceived(proposal.id));
                PairingEvent::ProposalReceived(proposal)
            }
            Ok(Err(e)) => {
                warn!(topic = %uri.topic, error = %e, "Pairing failed");
                self.set_state(&uri.topic, PairingState::Failed(e.to_string()));
                PairingEvent::Failed(e.to_string())
            }
            Err(_) => {
                let reason = format!("no proposal within {}s", self.timeout.as_secs());
                warn!(topic = %uri.topic, "Pairing timed out");
                self.set_state(&uri.topic, PairingState::Failed(reason.clone()));
                PairingEvent::Failed(reason)
            }
        };
        Ok(event)
    }
}
