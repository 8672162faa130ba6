// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bridge error taxonomy.
//!
//! Every remote or protocol condition is a [`BridgeError`] and is turned into a
//! JSON-RPC error object before it reaches the relay. Caller bugs are reported
//! separately as [`InvariantViolation`].

use crate::codec::{self, JsonRpcResponse};
use crate::storage::StoreError;

/// Generic application-rejection code used for every bridge error response.
/// The error kind is carried in the `message`.
pub const APP_REJECTION_CODE: i64 = 5000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("invalid pairing URI: {0}")]
    InvalidPairingUri(String),

    #[error("pairing topic {0} was already used")]
    DuplicatePairing(String),

    #[error("namespace negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("chain {0} is not authorized for this session")]
    UnauthorizedChain(String),

    #[error("method {0} is not supported")]
    UnsupportedMethod(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("request rejected by user")]
    SignerRejected,

    #[error("signer error: {0}")]
    SignerError(String),

    #[error("transient RPC error: {0}")]
    TransientRpcError(String),

    #[error("request timed out")]
    RequestTimeout,

    #[error("session disconnected")]
    SessionDisconnected,

    #[error("event {0} is not negotiated for this session")]
    UnsupportedEvent(String),

    #[error("proposal {0} not found")]
    ProposalNotFound(u64),

    #[error("proposal {0} was already resolved")]
    ProposalAlreadyResolved(u64),

    #[error("relay error: {0}")]
    Relay(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl BridgeError {
    /// Wire name of the error kind, used as the JSON-RPC error message.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::InvalidPairingUri(_) => "InvalidPairingURI",
            BridgeError::DuplicatePairing(_) => "DuplicatePairing",
            BridgeError::NegotiationFailed(_) => "NegotiationFailed",
            BridgeError::SessionNotFound(_) => "SessionNotFound",
            BridgeError::SessionExpired(_) => "SessionExpired",
            BridgeError::UnauthorizedChain(_) => "UnauthorizedChain",
            BridgeError::UnsupportedMethod(_) => "UnsupportedMethod",
            BridgeError::InvalidParams(_) => "InvalidParams",
            BridgeError::SignerRejected => "SignerRejected",
            BridgeError::SignerError(_) => "SignerError",
            BridgeError::TransientRpcError(_) => "TransientRpcError",
            BridgeError::RequestTimeout => "RequestTimeout",
            BridgeError::SessionDisconnected => "SessionDisconnected",
            BridgeError::UnsupportedEvent(_) => "UnsupportedEvent",
            BridgeError::ProposalNotFound(_) => "ProposalNotFound",
            BridgeError::ProposalAlreadyResolved(_) => "ProposalAlreadyResolved",
            BridgeError::Relay(_) => "RelayError",
            BridgeError::Storage(_) => "StorageError",
        }
    }

    /// JSON-RPC error code for this error.
    pub fn code(&self) -> i64 {
        APP_REJECTION_CODE
    }

    /// Build the JSON-RPC error envelope answering request `id`.
    pub fn to_response(&self, id: u64) -> JsonRpcResponse {
        codec::err(id, self.code(), self.kind())
    }
}

impl From<StoreError> for BridgeError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(topic) => BridgeError::SessionNotFound(topic),
            other => BridgeError::Storage(other.to_string()),
        }
    }
}

/// Conditions that indicate a bug in the caller rather than a remote fault.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("request {id} on topic {topic} replayed with a different payload")]
    ReplayMismatch { topic: String, id: u64 },
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ResponsePayload;

    #[test]
    fn every_error_maps_to_generic_code() {
        let errors = [
            BridgeError::SessionExpired("t".into()),
            BridgeError::SignerRejected,
            BridgeError::InvalidParams("bad".into()),
            BridgeError::RequestTimeout,
        ];
        for e in errors {
            assert_eq!(e.code(), APP_REJECTION_CODE);
        }
    }

    #[test]
    fn to_response_uses_kind_as_message() {
        let response = BridgeError::SessionExpired("topic-a".into()).to_response(1);
        assert_eq!(response.id, 1);
        match response.payload {
            ResponsePayload::Error(err) => {
                assert_eq!(err.code, 5000);
                assert_eq!(err.message, "SessionExpired");
            }
            ResponsePayload::Result(_) => panic!("expected error payload"),
        }
    }

    #[test]
    fn store_not_found_becomes_session_not_found() {
        let err: BridgeError = StoreError::NotFound("abc".into()).into();
        assert_eq!(err, BridgeError::SessionNotFound("abc".into()));
    }
}
