// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! `eip155` method handlers.
//!
//! | Method | Params | Result |
//! |--------|--------|--------|
//! | `personal_sign` | `[message, address]` | `0x` signature |
//! | `eth_sign` | `[address, message]` | `0x` signature |
//! | `eth_signTypedData(_v4)` | `[address, typedData]` | `0x` signature |
//! | `eth_signTransaction` | `[tx]` | `0x` signed transaction |
//! | `eth_sendTransaction` | `[tx]` | `0x` transaction hash |

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{
    call_signer, string_param, MethodContract, MethodHandler, MethodRegistry, OutputKind,
    PreparedInput, SignerCapability,
};
use crate::models::{AccountId, EIP155};
use crate::signer::{ChainSigner, SignerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvmMethod {
    PersonalSign,
    EthSign,
    SignTypedData,
    SignTransaction,
    SendTransaction,
}

impl EvmMethod {
    fn contract(self) -> MethodContract {
        let (capability, output) = match self {
            EvmMethod::PersonalSign | EvmMethod::EthSign => {
                (SignerCapability::SignMessage, OutputKind::Signature)
            }
            EvmMethod::SignTypedData => (SignerCapability::SignTypedPayload, OutputKind::Signature),
            EvmMethod::SignTransaction => {
                (SignerCapability::SignTransaction, OutputKind::SignedTransaction)
            }
            EvmMethod::SendTransaction => {
                (SignerCapability::SendTransaction, OutputKind::TransactionHash)
            }
        };
        MethodContract {
            capability,
            output,
            irrevocable: self == EvmMethod::SendTransaction,
        }
    }
}

pub struct EvmHandler {
    method: EvmMethod,
}

pub(super) fn register(registry: &mut MethodRegistry) {
    let methods = [
        ("personal_sign", EvmMethod::PersonalSign),
        ("eth_sign", EvmMethod::EthSign),
        ("eth_signTypedData", EvmMethod::SignTypedData),
        ("eth_signTypedData_v4", EvmMethod::SignTypedData),
        ("eth_signTransaction", EvmMethod::SignTransaction),
        ("eth_sendTransaction", EvmMethod::SendTransaction),
    ];
    for (name, method) in methods {
        registry.register(EIP155, name, method.contract(), Arc::new(EvmHandler { method }));
    }
}

fn check_address(claimed: &str, account: &AccountId) -> Result<(), String> {
    if claimed.eq_ignore_ascii_case(account.address()) {
        Ok(())
    } else {
        Err(format!("address {claimed} is not the session account"))
    }
}

fn is_hex_address(value: &str) -> bool {
    value
        .strip_prefix("0x")
        .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Typed data may arrive as an object or as its JSON string encoding.
fn typed_data(raw: &Value) -> Result<Value, String> {
    let parsed = match raw {
        Value::String(s) => {
            serde_json::from_str(s).map_err(|e| format!("typed data is not JSON: {e}"))?
        }
        other => other.clone(),
    };
    for field in ["types", "primaryType", "domain", "message"] {
        if parsed.get(field).is_none() {
            return Err(format!("typed data missing {field}"));
        }
    }
    Ok(parsed)
}

fn transaction(params: &Value, account: &AccountId) -> Result<Value, String> {
    let tx = params
        .get(0)
        .filter(|tx| tx.is_object())
        .ok_or("expected transaction object at position 0")?;
    if let Some(from) = tx.get("from") {
        let from = from.as_str().ok_or("from must be a string")?;
        check_address(from, account)?;
    }
    if let Some(to) = tx.get("to").and_then(Value::as_str) {
        if !is_hex_address(to) {
            return Err(format!("invalid to address {to}"));
        }
    }
    Ok(tx.clone())
}

#[async_trait]
impl MethodHandler for EvmHandler {
    fn validate(&self, params: &Value, account: &AccountId) -> Result<PreparedInput, String> {
        match self.method {
            EvmMethod::PersonalSign => {
                let message = string_param(params, 0, "message")?;
                check_address(string_param(params, 1, "address")?, account)?;
                Ok(PreparedInput::Message(message.to_string()))
            }
            EvmMethod::EthSign => {
                check_address(string_param(params, 0, "address")?, account)?;
                let message = string_param(params, 1, "message")?;
                if !message.starts_with("0x") {
                    return Err("eth_sign expects hex data".into());
                }
                Ok(PreparedInput::Message(message.to_string()))
            }
            EvmMethod::SignTypedData => {
                check_address(string_param(params, 0, "address")?, account)?;
                let raw = params.get(1).ok_or("expected typed data at position 1")?;
                Ok(PreparedInput::Payload(typed_data(raw)?))
            }
            EvmMethod::SignTransaction | EvmMethod::SendTransaction => {
                Ok(PreparedInput::Payload(transaction(params, account)?))
            }
        }
    }

    async fn invoke(&self, input: &PreparedInput, signer: &dyn ChainSigner) -> Result<Value, SignerError> {
        call_signer(self.method.contract().capability, input, signer)
            .await
            .map(Value::String)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::testing::ScriptedSigner;
    use serde_json::json;

    const ADDRESS: &str = "0xAbCdEf0123456789abcdef0123456789ABCDEF01";

    fn account() -> AccountId {
        format!("eip155:1:{ADDRESS}").parse().unwrap()
    }

    fn handler(name: &str) -> Arc<dyn MethodHandler> {
        MethodRegistry::with_defaults()
            .get(EIP155, name)
            .unwrap()
            .handler
            .clone()
    }

    #[test]
    fn personal_sign_checks_address_case_insensitively() {
        let h = handler("personal_sign");
        let ok = h.validate(&json!(["0x68656c6c6f", ADDRESS.to_lowercase()]), &account());
        assert_eq!(ok, Ok(PreparedInput::Message("0x68656c6c6f".into())));

        let other = h.validate(
            &json!(["0x00", "0x0000000000000000000000000000000000000001"]),
            &account(),
        );
        assert!(other.is_err());
        assert!(h.validate(&json!([]), &account()).is_err());
        assert!(h.validate(&json!({ "message": "x" }), &account()).is_err());
    }

    #[test]
    fn eth_sign_expects_address_first() {
        let h = handler("eth_sign");
        assert!(h.validate(&json!([ADDRESS, "0xdead"]), &account()).is_ok());
        assert!(h.validate(&json!(["0xdead", ADDRESS]), &account()).is_err());
        assert!(h.validate(&json!([ADDRESS, "plain text"]), &account()).is_err());
    }

    #[test]
    fn typed_data_accepts_string_or_object() {
        let h = handler("eth_signTypedData_v4");
        let data = json!({
            "types": { "EIP712Domain": [] },
            "primaryType": "EIP712Domain",
            "domain": {},
            "message": {}
        });
        let from_object = h.validate(&json!([ADDRESS, data.clone()]), &account()).unwrap();
        let from_string = h
            .validate(&json!([ADDRESS, data.to_string()]), &account())
            .unwrap();
        assert_eq!(from_object, from_string);

        assert!(h
            .validate(&json!([ADDRESS, { "types": {} }]), &account())
            .is_err());
    }

    #[test]
    fn transaction_from_must_match_account() {
        let h = handler("eth_sendTransaction");
        let tx = json!({ "from": ADDRESS, "to": "0x70997970C51812dc3A010C7d01b50e0d17dc79C8" });
        assert!(h.validate(&json!([tx]), &account()).is_ok());

        let foreign = json!({ "from": "0x70997970C51812dc3A010C7d01b50e0d17dc79C8" });
        assert!(h.validate(&json!([foreign]), &account()).is_err());

        let bad_to = json!({ "to": "0x123" });
        assert!(h.validate(&json!([bad_to]), &account()).is_err());
        assert!(h.validate(&json!(["0xdead"]), &account()).is_err());
    }

    #[tokio::test]
    async fn invoke_returns_signer_output_as_string() {
        let signer = ScriptedSigner::new(ADDRESS).with_script(vec![Ok("0xsig".into())]);
        let h = handler("personal_sign");
        let input = PreparedInput::Message("0x00".into());

        assert_eq!(h.invoke(&input, &signer).await, Ok(json!("0xsig")));
        assert_eq!(signer.calls.lock().unwrap()[0].0, "sign_message");
    }
}
