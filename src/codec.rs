// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JSON-RPC 2.0 envelopes exchanged with dApps over the relay.
//!
//! ```text
//! request:  { id, jsonrpc: "2.0", method, params }
//! success:  { id, jsonrpc: "2.0", result }
//! failure:  { id, jsonrpc: "2.0", error: { code, message } }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version of the JSON-RPC protocol spoken on the wire.
pub const JSON_RPC_VERSION: &str = "2.0";

/// Errors covering envelope validation problems.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("malformed JSON-RPC payload: {0}")]
    Malformed(String),

    #[error("invalid JSON-RPC version")]
    JsonRpcVersion,
}

/// Inbound JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub id: u64,
    pub jsonrpc: Arc<str>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            jsonrpc: JSON_RPC_VERSION.into(),
            method: method.into(),
            params,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.jsonrpc.as_ref() != JSON_RPC_VERSION {
            return Err(ValidationError::JsonRpcVersion);
        }
        Ok(())
    }
}

/// The `error` member of a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponsePayload {
    #[serde(rename = "result")]
    Result(Value),

    #[serde(rename = "error")]
    Error(ErrorObject),
}

/// Outbound JSON-RPC response. Exactly one of `result` / `error` is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub id: u64,
    pub jsonrpc: Arc<str>,
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

impl JsonRpcResponse {
    pub fn is_error(&self) -> bool {
        matches!(self.payload, ResponsePayload::Error(_))
    }

    /// Error message, if this is a failure response.
    pub fn error_message(&self) -> Option<&str> {
        match &self.payload {
            ResponsePayload::Error(e) => Some(e.message.as_str()),
            ResponsePayload::Result(_) => None,
        }
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.payload {
            ResponsePayload::Result(v) => Some(v),
            ResponsePayload::Error(_) => None,
        }
    }
}

/// Success envelope.
pub fn ok(id: u64, result: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        id,
        jsonrpc: JSON_RPC_VERSION.into(),
        payload: ResponsePayload::Result(result),
    }
}

/// Failure envelope.
pub fn err(id: u64, code: i64, message: impl Into<String>) -> JsonRpcResponse {
    JsonRpcResponse {
        id,
        jsonrpc: JSON_RPC_VERSION.into(),
        payload: ResponsePayload::Error(ErrorObject {
            code,
            message: message.into(),
        }),
    }
}

/// Parse and validate a request envelope from its wire form.
pub fn decode_request(raw: &str) -> Result<JsonRpcRequest, ValidationError> {
    let request: JsonRpcRequest =
        serde_json::from_str(raw).map_err(|e| ValidationError::Malformed(e.to_string()))?;
    request.validate()?;
    Ok(request)
}
