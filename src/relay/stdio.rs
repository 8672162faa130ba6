// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Line-Delimited JSON Relay
//!
//! [`JsonLinesRelay`] speaks one JSON object per line. It is the transport of
//! the `wc-bridge` binary: a relay client (or an operator) on the other end of
//! stdin/stdout forwards dApp traffic and wallet commands.
//!
//! ## Inbound (`type` field)
//!
//! | Type | Fields | Effect |
//! |------|--------|--------|
//! | `pair` | `uri` | Start pairing |
//! | `sessionProposal` | `proposal` | Proposal from a dApp |
//! | `sessionRequest` | `topic`, `chainId`, `request` | Route a JSON-RPC request |
//! | `sessionDelete` | `topic` | The dApp closed the session |
//! | `approve` | `id` | Approve a pending proposal |
//! | `reject` | `id`, `reason` | Reject a pending proposal |
//! | `disconnect` | `topic`, `reason` | Close a session from the wallet |
//! | `extend` | `topic` | Extend a session |
//! | `emitEvent` | `topic`, `chainId`, `event` | Publish a wallet event |
//!
//! ## Outbound
//!
//! `pairingOpened`, `proposalPending`, `pairingFailed`, `sessionSettle`,
//! `sessionReject`, `sessionDelete`, `sessionExtend`, `sessionEvent`,
//! `sessionResponse` and `error`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{PairingEvent, RelayError, RelayTransport};
use crate::bridge::WalletBridge;
use crate::codec::{JsonRpcRequest, JsonRpcResponse};
use crate::error::BridgeError;
use crate::models::{Proposal, Session, SessionEvent, SessionRequest};
use crate::pairing::PairingUri;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
enum Inbound {
    Pair {
        uri: String,
    },
    SessionProposal {
        proposal: Proposal,
    },
    SessionRequest {
        topic: String,
        chain_id: String,
        request: JsonRpcRequest,
    },
    SessionDelete {
        topic: String,
    },
    Approve {
        id: u64,
    },
    Reject {
        id: u64,
        #[serde(default = "default_reason")]
        reason: String,
    },
    Disconnect {
        topic: String,
        #[serde(default = "default_reason")]
        reason: String,
    },
    Extend {
        topic: String,
    },
    EmitEvent {
        topic: String,
        chain_id: String,
        event: SessionEvent,
    },
}

fn default_reason() -> String {
    "USER_REJECTED".to_string()
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
enum Outbound<'a> {
    PairingOpened {
        topic: &'a str,
        uri: &'a str,
    },
    ProposalPending {
        proposal: &'a Proposal,
    },
    PairingFailed {
        uri: &'a str,
        reason: &'a str,
    },
    SessionSettle {
        proposal_id: u64,
        pairing_topic: &'a str,
        session: &'a Session,
    },
    SessionReject {
        proposal_id: u64,
        reason: &'a str,
    },
    SessionDelete {
        topic: &'a str,
        reason: &'a str,
    },
    SessionExtend {
        topic: &'a str,
        expiry: i64,
    },
    SessionEvent {
        topic: &'a str,
        chain_id: &'a str,
        event: &'a SessionEvent,
    },
    SessionResponse {
        topic: &'a str,
        response: &'a JsonRpcResponse,
    },
    Error {
        kind: &'a str,
        message: &'a str,
    },
}

type LineWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct JsonLinesRelay {
    writer: AsyncMutex<LineWriter>,
    /// Pairings waiting for their proposal, keyed by pairing topic.
    pending_pairings: Mutex<HashMap<String, oneshot::Sender<Proposal>>>,
}

impl JsonLinesRelay {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: AsyncMutex::new(Box::new(writer)),
            pending_pairings: Mutex::new(HashMap::new()),
        }
    }

    async fn publish(&self, message: &Outbound<'_>) -> Result<(), RelayError> {
        let mut line =
            serde_json::to_string(message).map_err(|e| RelayError::Network(e.to_string()))?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| RelayError::Network(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| RelayError::Network(e.to_string()))
    }

    async fn report(&self, kind: &str, message: &str) {
        if let Err(e) = self.publish(&Outbound::Error { kind, message }).await {
            warn!(error = %e, "Failed to report error");
        }
    }

    async fn report_error(&self, error: &BridgeError) {
        self.report(error.kind(), &error.to_string()).await;
    }

    /// Read inbound lines and feed them to `bridge` until EOF or `shutdown`.
    pub async fn run<R>(
        self: Arc<Self>,
        bridge: Arc<WalletBridge>,
        input: R,
        shutdown: CancellationToken,
    ) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        info!("Relay reading input");
        let mut lines = input.lines();
        loop {
            let line = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                line = lines.next_line() => line?,
            };
            match line {
                Some(line) => self.handle_line(&bridge, &line).await,
                None => {
                    info!("Relay input closed");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn handle_line(self: &Arc<Self>, bridge: &Arc<WalletBridge>, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let inbound: Inbound = match serde_json::from_str(line) {
            Ok(inbound) => inbound,
            Err(e) => {
                debug!(error = %e, "Malformed relay line");
                self.report("MalformedLine", &e.to_string()).await;
                return;
            }
        };

        let outcome = match inbound {
            Inbound::Pair { uri } => {
                self.spawn_pairing(bridge, uri);
                Ok(())
            }
            Inbound::SessionProposal { proposal } => {
                self.deliver_proposal(bridge, proposal).await;
                Ok(())
            }
            Inbound::SessionRequest {
                topic,
                chain_id,
                request,
            } => {
                if let Err(e) = request.validate() {
                    // The dApp still gets an answer for its id.
                    let response = BridgeError::InvalidParams(e.to_string()).to_response(request.id);
                    if let Err(send) = self.send_response(&topic, &response).await {
                        warn!(topic = %topic, error = %send, "Failed to answer malformed request");
                    }
                    self.report("InvalidRequest", &e.to_string()).await;
                    return;
                }
                bridge.dispatch_request(SessionRequest::from_envelope(topic, chain_id, request));
                Ok(())
            }
            Inbound::SessionDelete { topic } => bridge.handle_peer_delete(&topic).map(|_| ()),
            Inbound::Approve { id } => bridge.approve(id).await.map(|_| ()),
            Inbound::Reject { id, reason } => bridge.reject(id, &reason).await,
            Inbound::Disconnect { topic, reason } => bridge.disconnect(&topic, &reason).await,
            Inbound::Extend { topic } => bridge.extend(&topic).await.map(|_| ()),
            Inbound::EmitEvent {
                topic,
                chain_id,
                event,
            } => bridge.emit_event(&topic, &chain_id, event).await,
        };
        if let Err(e) = outcome {
            self.report_error(&e).await;
        }
    }

    /// Pair in the background so the proposal line can still be read.
    fn spawn_pairing(self: &Arc<Self>, bridge: &Arc<WalletBridge>, uri: String) {
        let relay = Arc::clone(self);
        let bridge = Arc::clone(bridge);
        tokio::spawn(async move {
            let published = match bridge.pair(&uri).await {
                Ok(PairingEvent::ProposalReceived(proposal)) => {
                    relay
                        .publish(&Outbound::ProposalPending {
                            proposal: &proposal,
                        })
                        .await
                }
                Ok(PairingEvent::Failed(reason)) => {
                    relay
                        .publish(&Outbound::PairingFailed {
                            uri: &uri,
                            reason: &reason,
                        })
                        .await
                }
                Err(e) => {
                    relay.report_error(&e).await;
                    Ok(())
                }
            };
            if let Err(e) = published {
                warn!(error = %e, "Failed to publish pairing outcome");
            }
        });
    }

    async fn deliver_proposal(&self, bridge: &WalletBridge, proposal: Proposal) {
        let waiting = self
            .pending_pairings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&proposal.pairing_topic);
        let proposal = match waiting {
            Some(tx) => match tx.send(proposal) {
                Ok(()) => return,
                // The pairing gave up waiting.
                Err(proposal) => proposal,
            },
            None => proposal,
        };

        match bridge.receive_proposal(proposal.clone()) {
            Ok(()) => {
                if let Err(e) = self
                    .publish(&Outbound::ProposalPending {
                        proposal: &proposal,
                    })
                    .await
                {
                    warn!(error = %e, "Failed to publish pending proposal");
                }
            }
            Err(e) => self.report_error(&e).await,
        }
    }
}

#[async_trait]
impl RelayTransport for JsonLinesRelay {
    async fn open_pairing(&self, uri: &PairingUri) -> Result<Proposal, RelayError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self
                .pending_pairings
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            pending.retain(|_, waiting| !waiting.is_closed());
            pending.insert(uri.topic.clone(), tx);
        }

        let raw = uri.to_string();
        self.publish(&Outbound::PairingOpened {
            topic: &uri.topic,
            uri: &raw,
        })
        .await?;
        rx.await.map_err(|_| RelayError::Closed)
    }

    async fn settle_session(&self, proposal: &Proposal, session: &Session) -> Result<(), RelayError> {
        self.publish(&Outbound::SessionSettle {
            proposal_id: proposal.id,
            pairing_topic: &proposal.pairing_topic,
            session,
        })
        .await
    }

    async fn reject_proposal(&self, proposal: &Proposal, reason: &str) -> Result<(), RelayError> {
        self.publish(&Outbound::SessionReject {
            proposal_id: proposal.id,
            reason,
        })
        .await
    }

    async fn disconnect_session(&self, topic: &str, reason: &str) -> Result<(), RelayError> {
        self.publish(&Outbound::SessionDelete { topic, reason }).await
    }

    async fn extend_session(&self, topic: &str, expiry: i64) -> Result<(), RelayError> {
        self.publish(&Outbound::SessionExtend { topic, expiry }).await
    }

    async fn emit_event(
        &self,
        topic: &str,
        chain_id: &str,
        event: &SessionEvent,
    ) -> Result<(), RelayError> {
        self.publish(&Outbound::SessionEvent {
            topic,
            chain_id,
            event,
        })
        .await
    }

    async fn send_response(&self, topic: &str, response: &JsonRpcResponse) -> Result<(), RelayError> {
        self.publish(&Outbound::SessionResponse { topic, response })
            .await
    }
}
