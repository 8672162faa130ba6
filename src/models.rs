// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Protocol Data Models
//!
//! Proposals, sessions and requests exchanged with dApps, plus the
//! chain/account identifier newtypes they are built from.
//!
//! ## Identifier Formats
//!
//! | Type | Format | Example |
//! |------|--------|---------|
//! | [`ChainId`] | `<namespace>:<reference>` | `eip155:1` |
//! | [`AccountId`] | `<namespace>:<reference>:<address>` | `solana:mainnet-beta:7xKX...` |
//!
//! ## Lifecycle
//!
//! - **Proposal**: ephemeral, resolved exactly once (approved or rejected)
//! - **Session**: durable, keyed by `topic`, inactive once `now >= expiry`
//! - **SessionRequest**: one per inbound JSON-RPC call, unique per `(topic, id)`

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::JsonRpcRequest;

/// Namespace key for Ethereum-family chains.
pub const EIP155: &str = "eip155";

/// Namespace key for Solana clusters.
pub const SOLANA: &str = "solana";

/// Errors raised while parsing identifiers or validating records.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("invalid chain id: {0}")]
    InvalidChainId(String),

    #[error("invalid account id: {0}")]
    InvalidAccountId(String),

    #[error("session {topic}: {reason}")]
    InvalidSession { topic: String, reason: String },
}

// =============================================================================
// Identifiers
// =============================================================================

/// Fully qualified chain identifier, e.g. `eip155:137`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId {
    namespace: String,
    reference: String,
}

impl ChainId {
    pub fn new(namespace: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            reference: reference.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl FromStr for ChainId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, reference) = s
            .split_once(':')
            .ok_or_else(|| ModelError::InvalidChainId(s.to_string()))?;
        if !valid_segment(namespace) || !valid_segment(reference) {
            return Err(ModelError::InvalidChainId(s.to_string()));
        }
        Ok(Self::new(namespace, reference))
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

/// Chain-qualified account, e.g. `eip155:1:0xabc...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId {
    chain: ChainId,
    address: String,
}

impl AccountId {
    pub fn new(chain: ChainId, address: impl Into<String>) -> Self {
        Self {
            chain,
            address: address.into(),
        }
    }

    pub fn chain(&self) -> &ChainId {
        &self.chain
    }

    pub fn namespace(&self) -> &str {
        self.chain.namespace()
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl FromStr for AccountId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(namespace), Some(reference), Some(address)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ModelError::InvalidAccountId(s.to_string()));
        };
        if !valid_segment(namespace)
            || !valid_segment(reference)
            || address.is_empty()
            || address.contains(':')
        {
            return Err(ModelError::InvalidAccountId(s.to_string()));
        }
        Ok(Self::new(ChainId::new(namespace, reference), address))
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain, self.address)
    }
}

// =============================================================================
// Proposal
// =============================================================================

/// Peer display metadata. Opaque to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub icons: Vec<String>,
}

/// Namespace as requested by a dApp proposal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ProposalNamespace {
    #[serde(default)]
    pub chains: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

pub type ProposalNamespaces = BTreeMap<String, ProposalNamespace>;

/// Inbound session proposal, surfaced by the pairing flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: u64,
    #[serde(default)]
    pub pairing_topic: String,
    pub proposer: Metadata,
    #[serde(default)]
    pub required_namespaces: ProposalNamespaces,
    #[serde(default)]
    pub optional_namespaces: ProposalNamespaces,
}

// =============================================================================
// Session
// =============================================================================

/// Namespace accepted for a settled session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SessionNamespace {
    pub chains: Vec<String>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
    pub accounts: Vec<String>,
}

impl SessionNamespace {
    pub fn has_chain(&self, chain_id: &str) -> bool {
        self.chains.iter().any(|c| c == chain_id)
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }

    pub fn has_event(&self, event: &str) -> bool {
        self.events.iter().any(|e| e == event)
    }

    /// Accounts bound to `chain`, in negotiated order.
    pub fn accounts_on(&self, chain: &ChainId) -> Vec<AccountId> {
        self.accounts
            .iter()
            .filter_map(|a| a.parse::<AccountId>().ok())
            .filter(|a| a.chain() == chain)
            .collect()
    }
}

pub type SessionNamespaces = BTreeMap<String, SessionNamespace>;

/// Durable session record, persisted as `{ topic, namespaces, peerMetadata, expiry }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub topic: String,
    pub namespaces: SessionNamespaces,
    pub peer_metadata: Metadata,
    /// Unix timestamp (seconds).
    pub expiry: i64,
}

impl Session {
    /// A session is live while `now < expiry`.
    pub fn is_active(&self, now: i64) -> bool {
        self.expiry > now
    }

    /// Check the structural invariants of a session record.
    pub fn validate(&self) -> Result<(), ModelError> {
        let invalid = |reason: String| ModelError::InvalidSession {
            topic: self.topic.clone(),
            reason,
        };

        if self.topic.is_empty() {
            return Err(invalid("empty topic".into()));
        }
        if self.namespaces.is_empty() {
            return Err(invalid("no namespaces".into()));
        }

        for (key, namespace) in &self.namespaces {
            if namespace.accounts.is_empty() {
                return Err(invalid(format!("namespace {key} has no accounts")));
            }
            for raw in &namespace.accounts {
                let account: AccountId = raw
                    .parse()
                    .map_err(|e: ModelError| invalid(e.to_string()))?;
                if account.namespace() != key {
                    return Err(invalid(format!("account {raw} listed under {key}")));
                }
                if !namespace.has_chain(&account.chain().to_string()) {
                    return Err(invalid(format!("account {raw} on unlisted chain")));
                }
            }
        }
        Ok(())
    }

    /// Negotiated namespace covering `chain`, if any.
    pub fn namespace_for(&self, chain: &ChainId) -> Option<&SessionNamespace> {
        self.namespaces
            .get(chain.namespace())
            .filter(|ns| ns.has_chain(&chain.to_string()))
    }
}

// =============================================================================
// Requests & Events
// =============================================================================

/// Signing or transaction request delivered on a session topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub topic: String,
    pub id: u64,
    pub chain_id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl SessionRequest {
    /// Attach the relay routing data to a JSON-RPC envelope.
    pub fn from_envelope(
        topic: impl Into<String>,
        chain_id: impl Into<String>,
        envelope: JsonRpcRequest,
    ) -> Self {
        Self {
            topic: topic.into(),
            id: envelope.id,
            chain_id: chain_id.into(),
            method: envelope.method,
            params: envelope.params,
        }
    }
}

/// Wallet-originated session event such as `accountsChanged`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEvent {
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evm_session(expiry: i64) -> Session {
        let mut namespaces = SessionNamespaces::new();
        namespaces.insert(
            EIP155.to_string(),
            SessionNamespace {
                chains: vec!["eip155:1".into()],
                methods: vec!["personal_sign".into()],
                events: vec!["chainChanged".into()],
                accounts: vec!["eip155:1:0xAAA".into()],
            },
        );
        Session {
            topic: "topic-1".into(),
            namespaces,
            peer_metadata: Metadata::default(),
            expiry,
        }
    }

    #[test]
    fn chain_id_parses_and_displays() {
        let chain: ChainId = "solana:mainnet-beta".parse().unwrap();
        assert_eq!(chain.namespace(), "solana");
        assert_eq!(chain.reference(), "mainnet-beta");
        assert_eq!(chain.to_string(), "solana:mainnet-beta");

        assert!("eip155".parse::<ChainId>().is_err());
        assert!(":1".parse::<ChainId>().is_err());
    }

    #[test]
    fn account_id_parses_three_segments() {
        let account: AccountId = "eip155:137:0xAbC".parse().unwrap();
        assert_eq!(account.namespace(), "eip155");
        assert_eq!(account.chain().to_string(), "eip155:137");
        assert_eq!(account.address(), "0xAbC");

        assert!("eip155:1".parse::<AccountId>().is_err());
        assert!("eip155:1:".parse::<AccountId>().is_err());
    }

    #[test]
    fn session_serializes_with_persisted_field_names() {
        let value = serde_json::to_value(evm_session(100)).unwrap();
        assert!(value.get("peerMetadata").is_some());
        assert_eq!(value["expiry"], json!(100));
        assert_eq!(value["namespaces"]["eip155"]["accounts"][0], "eip155:1:0xAAA");
    }

    #[test]
    fn session_activity_is_strict() {
        let session = evm_session(100);
        assert!(session.is_active(99));
        assert!(!session.is_active(100));
    }

    #[test]
    fn validate_rejects_mismatched_account_prefix() {
        let mut session = evm_session(100);
        session.validate().unwrap();

        session
            .namespaces
            .get_mut(EIP155)
            .unwrap()
            .accounts
            .push("solana:mainnet-beta:7xKX".into());
        assert!(matches!(
            session.validate(),
            Err(ModelError::InvalidSession { .. })
        ));
    }

    #[test]
    fn validate_rejects_empty_accounts() {
        let mut session = evm_session(100);
        session.namespaces.get_mut(EIP155).unwrap().accounts.clear();
        assert!(session.validate().is_err());
    }

    #[test]
    fn namespace_for_requires_negotiated_chain() {
        let session = evm_session(100);
        assert!(session.namespace_for(&"eip155:1".parse().unwrap()).is_some());
        assert!(session.namespace_for(&"eip155:10".parse().unwrap()).is_none());
        assert!(session
            .namespace_for(&"solana:mainnet-beta".parse().unwrap())
            .is_none());
    }

    #[test]
    fn proposal_deserializes_camel_case() {
        let proposal: Proposal = serde_json::from_value(json!({
            "id": 42,
            "pairingTopic": "abc",
            "proposer": { "name": "dApp", "url": "https://dapp.example" },
            "requiredNamespaces": {
                "eip155": { "chains": ["eip155:1"], "methods": ["personal_sign"], "events": [] }
            }
        }))
        .unwrap();
        assert_eq!(proposal.id, 42);
        assert!(proposal.optional_namespaces.is_empty());
        assert_eq!(proposal.required_namespaces["eip155"].chains, vec!["eip155:1"]);
    }
}
