// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Method Dispatch Table
//!
//! Maps `(namespace, method)` to a handler that validates the JSON-RPC params
//! against the session account and calls the matching signer capability.
//!
//! | Namespace | Methods |
//! |-----------|---------|
//! | `eip155` | `personal_sign`, `eth_sign`, `eth_signTypedData`, `eth_signTypedData_v4`, `eth_signTransaction`, `eth_sendTransaction` |
//! | `solana` | `solana_signMessage`, `solana_signTransaction`, `solana_signAndSendTransaction` |
//!
//! Broadcasting methods are marked irrevocable: once their handler has been
//! invoked it runs to completion even if the session goes away.

pub mod eip155;
pub mod solana;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{AccountId, EIP155, SOLANA};
use crate::signer::{ChainSigner, SignerError};

/// Signer capability a method needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignerCapability {
    SignMessage,
    SignTypedPayload,
    SignTransaction,
    SendTransaction,
}

/// Shape of a successful result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Hex or base58 signature string.
    Signature,
    /// Serialized signed transaction.
    SignedTransaction,
    /// Transaction hash of a broadcast.
    TransactionHash,
    /// `{ "signature": ... }` object.
    SignatureObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodContract {
    pub capability: SignerCapability,
    pub output: OutputKind,
    pub irrevocable: bool,
}

/// Params after validation, ready to hand to a signer.
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedInput {
    Message(String),
    Payload(Value),
}

#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Check `params` for this method against the session `account`.
    fn validate(&self, params: &Value, account: &AccountId) -> Result<PreparedInput, String>;

    /// Call the signer. May be called twice for the same input on retry.
    async fn invoke(&self, input: &PreparedInput, signer: &dyn ChainSigner) -> Result<Value, SignerError>;
}

#[derive(Clone)]
pub struct MethodEntry {
    pub contract: MethodContract,
    pub handler: Arc<dyn MethodHandler>,
}

/// Registered methods, keyed by `(namespace, method)`.
#[derive(Clone, Default)]
pub struct MethodRegistry {
    entries: HashMap<(String, String), MethodEntry>,
}

impl MethodRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in EVM and Solana method.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        eip155::register(&mut registry);
        solana::register(&mut registry);
        registry
    }

    pub fn register(
        &mut self,
        namespace: &str,
        method: &str,
        contract: MethodContract,
        handler: Arc<dyn MethodHandler>,
    ) {
        self.entries.insert(
            (namespace.to_string(), method.to_string()),
            MethodEntry { contract, handler },
        );
    }

    pub fn get(&self, namespace: &str, method: &str) -> Option<&MethodEntry> {
        self.entries.get(&(namespace.to_string(), method.to_string()))
    }

    /// Registered method names for `namespace`, sorted.
    pub fn methods(&self, namespace: &str) -> Vec<String> {
        let mut methods: Vec<String> = self
            .entries
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, method)| method.clone())
            .collect();
        methods.sort();
        methods
    }

    /// Namespaces with at least one method.
    pub fn namespaces(&self) -> Vec<&'static str> {
        [EIP155, SOLANA]
            .into_iter()
            .filter(|ns| !self.methods(ns).is_empty())
            .collect()
    }
}

/// Run the capability named by `contract` on `signer`.
pub(crate) async fn call_signer(
    capability: SignerCapability,
    input: &PreparedInput,
    signer: &dyn ChainSigner,
) -> Result<String, SignerError> {
    match (capability, input) {
        (SignerCapability::SignMessage, PreparedInput::Message(message)) => {
            signer.sign_message(message).await
        }
        (SignerCapability::SignTypedPayload, PreparedInput::Payload(payload)) => {
            signer.sign_typed_payload(payload).await
        }
        (SignerCapability::SignTransaction, PreparedInput::Payload(tx)) => {
            signer.sign_transaction(tx).await
        }
        (SignerCapability::SendTransaction, PreparedInput::Payload(tx)) => {
            signer.send_transaction(tx).await
        }
        (capability, _) => Err(SignerError::Failed(format!(
            "input does not match capability {capability:?}"
        ))),
    }
}

/// Positional param `index` as a string.
pub(crate) fn string_param<'a>(params: &'a Value, index: usize, name: &str) -> Result<&'a str, String> {
    params
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("expected {name} at position {index}"))
}
