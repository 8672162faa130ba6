// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! throughout the bridge. Configuration is loaded from the environment at
//! startup by [`BridgeConfig::from_env`].
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Directory holding the session database | `./data` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |
//! | `SESSION_TTL_SECS` | Lifetime of a settled or extended session | `604800` |
//! | `REQUEST_TIMEOUT_SECS` | Bound on approval plus signing per request | `300` |
//! | `PAIRING_TIMEOUT_SECS` | Wait for a proposal after pairing | `30` |
//! | `RETRY_BACKOFF_MS` | Delay before retrying a transient signer failure | `500` |
//! | `SWEEP_INTERVAL_SECS` | Interval between expired-session sweeps | `60` |
//! | `EVM_KEY_PEM` | Path to a PEM-encoded secp256k1 key | Optional |
//! | `EVM_RPC_URLS` | `eip155:<id>=<url>` pairs, comma separated | Optional |
//! | `APPROVAL_POLICY` | `auto` or `deny` | `deny` |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::approval::ApprovalPolicy;
use crate::models::{ChainId, EIP155};
use crate::pairing::DEFAULT_PAIRING_TIMEOUT;
use crate::router::{RouterConfig, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RETRY_BACKOFF};
use crate::session::DEFAULT_SESSION_TTL;
use crate::storage::sweeper::DEFAULT_SWEEP_INTERVAL;

/// Environment variable name for the data directory path.
///
/// The session database (`sessions.redb`) is created inside it.
///
/// # Default
/// `./data`
pub const DATA_DIR_ENV: &str = "DATA_DIR";

pub const DEFAULT_DATA_DIR: &str = "./data";

/// File name of the session database inside [`DATA_DIR_ENV`].
pub const SESSION_DB_FILE: &str = "sessions.redb";

/// Environment variable selecting the log output format.
///
/// `json` emits one JSON object per event; anything else is human-readable.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Environment variable for the session lifetime, in seconds.
///
/// Applied on approval and on every extend.
pub const SESSION_TTL_ENV: &str = "SESSION_TTL_SECS";

/// Environment variable bounding approval plus signer time per request.
pub const REQUEST_TIMEOUT_ENV: &str = "REQUEST_TIMEOUT_SECS";

pub const PAIRING_TIMEOUT_ENV: &str = "PAIRING_TIMEOUT_SECS";

pub const RETRY_BACKOFF_ENV: &str = "RETRY_BACKOFF_MS";

pub const SWEEP_INTERVAL_ENV: &str = "SWEEP_INTERVAL_SECS";

/// Environment variable holding the path of the EVM signing key.
///
/// SEC1 (`EC PRIVATE KEY`) and PKCS#8 (`PRIVATE KEY`) PEM are accepted.
/// Without it no `eip155` account is offered.
pub const EVM_KEY_PEM_ENV: &str = "EVM_KEY_PEM";

/// Environment variable mapping EVM chains to JSON-RPC endpoints.
///
/// # Format
/// `eip155:1=https://eth.example,eip155:137=https://polygon.example`
///
/// When set, the EVM key is offered only on the listed chains and can fill
/// and broadcast transactions. When unset it is offered on any EVM chain for
/// message and typed-data signing.
pub const EVM_RPC_URLS_ENV: &str = "EVM_RPC_URLS";

pub const APPROVAL_POLICY_ENV: &str = "APPROVAL_POLICY";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Timing knobs shared by the bridge components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    pub session_ttl: Duration,
    pub request_timeout: Duration,
    pub pairing_timeout: Duration,
    pub retry_backoff: Duration,
    pub sweep_interval: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            session_ttl: DEFAULT_SESSION_TTL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            pairing_timeout: DEFAULT_PAIRING_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl BridgeSettings {
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            request_timeout: self.request_timeout,
            retry_backoff: self.retry_backoff,
        }
    }
}

/// An EVM JSON-RPC endpoint bound to one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmRpc {
    pub chain_id: u64,
    pub url: String,
}

/// Everything the `wc-bridge` binary reads from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub data_dir: PathBuf,
    pub json_logs: bool,
    pub settings: BridgeSettings,
    pub evm_key_pem: Option<PathBuf>,
    pub evm_rpc: Vec<EvmRpc>,
    pub approval: ApprovalPolicy,
}

impl BridgeConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration through `lookup`, which returns the value of a variable if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = BridgeSettings::default();
        let secs = |var: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            parse_or(&lookup, var, default.as_secs()).map(Duration::from_secs)
        };

        let retry_default = u64::try_from(defaults.retry_backoff.as_millis()).unwrap_or(u64::MAX);
        let settings = BridgeSettings {
            session_ttl: secs(SESSION_TTL_ENV, defaults.session_ttl)?,
            request_timeout: secs(REQUEST_TIMEOUT_ENV, defaults.request_timeout)?,
            pairing_timeout: secs(PAIRING_TIMEOUT_ENV, defaults.pairing_timeout)?,
            retry_backoff: Duration::from_millis(parse_or(&lookup, RETRY_BACKOFF_ENV, retry_default)?),
            sweep_interval: secs(SWEEP_INTERVAL_ENV, defaults.sweep_interval)?,
        };
        if settings.session_ttl.is_zero() {
            return Err(ConfigError::invalid(SESSION_TTL_ENV, "0", "must be positive"));
        }
        if settings.sweep_interval.is_zero() {
            return Err(ConfigError::invalid(SWEEP_INTERVAL_ENV, "0", "must be positive"));
        }

        let approval = match lookup(APPROVAL_POLICY_ENV) {
            Some(raw) => raw
                .parse()
                .map_err(|e: String| ConfigError::invalid(APPROVAL_POLICY_ENV, &raw, e))?,
            None => ApprovalPolicy::default(),
        };

        let evm_rpc = match lookup(EVM_RPC_URLS_ENV) {
            Some(raw) => parse_rpc_urls(&raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            data_dir: lookup(DATA_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            json_logs: lookup(LOG_FORMAT_ENV).is_some_and(|f| f.eq_ignore_ascii_case("json")),
            settings,
            evm_key_pem: lookup(EVM_KEY_PEM_ENV)
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            evm_rpc,
            approval,
        })
    }

    pub fn session_db_path(&self) -> PathBuf {
        self.data_dir.join(SESSION_DB_FILE)
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(var, &raw, e.to_string())),
        None => Ok(default),
    }
}

/// Parse `eip155:<id>=<url>` pairs.
fn parse_rpc_urls(raw: &str) -> Result<Vec<EvmRpc>, ConfigError> {
    let mut endpoints = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (chain, url) = entry
            .split_once('=')
            .ok_or_else(|| ConfigError::invalid(EVM_RPC_URLS_ENV, entry, "expected <chain>=<url>"))?;
        let chain: ChainId = chain
            .trim()
            .parse()
            .map_err(|e: crate::models::ModelError| ConfigError::invalid(EVM_RPC_URLS_ENV, entry, e.to_string()))?;
        if chain.namespace() != EIP155 {
            return Err(ConfigError::invalid(EVM_RPC_URLS_ENV, entry, "not an eip155 chain"));
        }
        let chain_id = chain
            .reference()
            .parse()
            .map_err(|_| ConfigError::invalid(EVM_RPC_URLS_ENV, entry, "chain reference is not numeric"))?;
        endpoints.push(EvmRpc {
            chain_id,
            url: url.trim().to_string(),
        });
    }
    Ok(endpoints)
}
