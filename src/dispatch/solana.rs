// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! `solana` method handlers.
//!
//! Params are objects. Messages are base58, transactions are base64-encoded
//! wire transactions; every result is `{ "signature": <base58> }`.

use std::sync::Arc;

use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use serde_json::{json, Value};

use super::{
    call_signer, MethodContract, MethodHandler, MethodRegistry, OutputKind, PreparedInput,
    SignerCapability,
};
use crate::models::{AccountId, SOLANA};
use crate::signer::{ChainSigner, SignerError};

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SolanaMethod {
    SignMessage,
    SignTransaction,
    SignAndSendTransaction,
}

impl SolanaMethod {
    fn contract(self) -> MethodContract {
        let capability = match self {
            SolanaMethod::SignMessage => SignerCapability::SignMessage,
            SolanaMethod::SignTransaction => SignerCapability::SignTransaction,
            SolanaMethod::SignAndSendTransaction => SignerCapability::SendTransaction,
        };
        MethodContract {
            capability,
            output: OutputKind::SignatureObject,
            irrevocable: self == SolanaMethod::SignAndSendTransaction,
        }
    }
}

pub struct SolanaHandler {
    method: SolanaMethod,
}

pub(super) fn register(registry: &mut MethodRegistry) {
    let methods = [
        ("solana_signMessage", SolanaMethod::SignMessage),
        ("solana_signTransaction", SolanaMethod::SignTransaction),
        ("solana_signAndSendTransaction", SolanaMethod::SignAndSendTransaction),
    ];
    for (name, method) in methods {
        registry.register(SOLANA, name, method.contract(), Arc::new(SolanaHandler { method }));
    }
}

fn is_base58(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| BASE58_ALPHABET.contains(c))
}

fn field<'a>(params: &'a Value, name: &str) -> Result<&'a str, String> {
    params
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("expected string field {name}"))
}

/// `pubkey`, when given, must be the session account.
fn check_pubkey(params: &Value, account: &AccountId, required: bool) -> Result<(), String> {
    match params.get("pubkey") {
        Some(pubkey) => {
            let pubkey = pubkey.as_str().ok_or("pubkey must be a string")?;
            if pubkey != account.address() {
                return Err(format!("pubkey {pubkey} is not the session account"));
            }
            Ok(())
        }
        None if required => Err("expected string field pubkey".into()),
        None => Ok(()),
    }
}

fn transaction(params: &Value) -> Result<Value, String> {
    let encoded = field(params, "transaction")?;
    let bytes = Base64::decode_vec(encoded).map_err(|_| "transaction is not valid base64".to_string())?;
    if bytes.is_empty() {
        return Err("transaction is empty".into());
    }
    Ok(params.clone())
}

#[async_trait]
impl MethodHandler for SolanaHandler {
    fn validate(&self, params: &Value, account: &AccountId) -> Result<PreparedInput, String> {
        if !params.is_object() {
            return Err("expected params object".into());
        }
        match self.method {
            SolanaMethod::SignMessage => {
                check_pubkey(params, account, true)?;
                let message = field(params, "message")?;
                if !is_base58(message) {
                    return Err("message is not base58".into());
                }
                Ok(PreparedInput::Message(message.to_string()))
            }
            SolanaMethod::SignTransaction | SolanaMethod::SignAndSendTransaction => {
                check_pubkey(params, account, false)?;
                Ok(PreparedInput::Payload(transaction(params)?))
            }
        }
    }

    async fn invoke(&self, input: &PreparedInput, signer: &dyn ChainSigner) -> Result<Value, SignerError> {
        let signature = call_signer(self.method.contract().capability, input, signer).await?;
        Ok(json!({ "signature": signature }))
    }
}
