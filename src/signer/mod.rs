// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Chain Signers
//!
//! Key-holding collaborators the router dispatches to. A signer owns one
//! address and signs on behalf of the chains it was registered for.
//!
//! - [`ChainSigner`]: capability trait (message, typed payload, transaction)
//! - [`SignerRegistry`]: lookup by session account
//! - [`evm::LocalEvmSigner`]: alloy-backed signer for `eip155` chains

pub mod evm;

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{AccountId, EIP155};
use crate::negotiation::{ChainSupport, LocalAccount};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    /// The key holder declined to sign.
    #[error("signing rejected")]
    Rejected,

    /// Network or node hiccup; the same call may succeed if repeated.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("signing failed: {0}")]
    Failed(String),
}

/// Capabilities a method handler can call on a signer.
///
/// Inputs arrive in their wire encoding; outputs are returned encoded the way
/// the chain's JSON-RPC convention expects (`0x` hex for EVM, base58 for
/// Solana).
#[async_trait]
pub trait ChainSigner: Send + Sync {
    /// Address this signer holds the key for.
    fn address(&self) -> String;

    async fn sign_message(&self, message: &str) -> Result<String, SignerError>;

    async fn sign_typed_payload(&self, payload: &Value) -> Result<String, SignerError>;

    /// Sign without broadcasting. Returns the serialized signed transaction.
    async fn sign_transaction(&self, transaction: &Value) -> Result<String, SignerError>;

    /// Sign and broadcast. Returns the transaction hash or signature.
    async fn send_transaction(&self, transaction: &Value) -> Result<String, SignerError>;
}

struct Registered {
    account: LocalAccount,
    signer: Arc<dyn ChainSigner>,
}

/// Signers the wallet exposes, with the chains each one serves.
#[derive(Default)]
pub struct SignerRegistry {
    entries: RwLock<Vec<Registered>>,
}

fn same_address(namespace: &str, a: &str, b: &str) -> bool {
    if namespace == EIP155 {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

impl SignerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `signer` for `namespace`, limited to `chains`.
    pub fn register(&self, namespace: &str, chains: ChainSupport, signer: Arc<dyn ChainSigner>) {
        let account = LocalAccount {
            namespace: namespace.to_string(),
            address: signer.address(),
            chains,
        };
        tracing::info!(
            namespace,
            address = %account.address,
            "Signer registered"
        );
        if let Ok(mut entries) = self.entries.write() {
            entries.push(Registered { account, signer });
        }
    }

    /// Accounts available for namespace negotiation.
    pub fn local_accounts(&self) -> Vec<LocalAccount> {
        self.entries
            .read()
            .map(|entries| entries.iter().map(|e| e.account.clone()).collect())
            .unwrap_or_default()
    }

    /// Signer holding the key for `account` on its chain.
    pub fn lookup(&self, account: &AccountId) -> Option<Arc<dyn ChainSigner>> {
        let entries = self.entries.read().ok()?;
        entries
            .iter()
            .find(|e| {
                e.account.supports(account.chain())
                    && same_address(account.namespace(), &e.account.address, account.address())
            })
            .map(|e| e.signer.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted signer shared by router and dispatch tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    #[derive(Default)]
    pub struct ScriptedSigner {
        pub address: String,
        /// Outcomes consumed one per call; an empty script succeeds.
        pub script: Mutex<VecDeque<Result<String, SignerError>>>,
        /// Time each call takes.
        pub delay: Option<Duration>,
        /// `(capability, input)` per call, in call order.
        pub calls: Mutex<Vec<(String, String)>>,
        /// Shared log of `label` entries, used to observe cross-signer order.
        pub log: Option<Arc<Mutex<Vec<String>>>>,
    }

    impl ScriptedSigner {
        pub fn new(address: &str) -> Self {
            Self {
                address: address.to_string(),
                ..Self::default()
            }
        }

        pub fn with_script(self, outcomes: Vec<Result<String, SignerError>>) -> Self {
            *self.script.lock().unwrap() = outcomes.into();
            self
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn with_log(mut self, log: Arc<Mutex<Vec<String>>>) -> Self {
            self.log = Some(log);
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        async fn run(&self, capability: &str, input: String) -> Result<String, SignerError> {
            self.calls
                .lock()
                .unwrap()
                .push((capability.to_string(), input.clone()));
            if let Some(log) = &self.log {
                log.lock().unwrap().push(format!("start {input}"));
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(log) = &self.log {
                log.lock().unwrap().push(format!("end {input}"));
            }
            let scripted = self.script.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| Ok(format!("{capability}:{input}")))
        }
    }

    #[async_trait]
    impl ChainSigner for ScriptedSigner {
        fn address(&self) -> String {
            self.address.clone()
        }

        async fn sign_message(&self, message: &str) -> Result<String, SignerError> {
            self.run("sign_message", message.to_string()).await
        }

        async fn sign_typed_payload(&self, payload: &Value) -> Result<String, SignerError> {
            self.run("sign_typed_payload", payload.to_string()).await
        }

        async fn sign_transaction(&self, transaction: &Value) -> Result<String, SignerError> {
            self.run("sign_transaction", transaction.to_string()).await
        }

        async fn send_transaction(&self, transaction: &Value) -> Result<String, SignerError> {
            self.run("send_transaction", transaction.to_string()).await
        }
    }
}
