// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational WalletConnect Bridge - Multi-chain dApp Session Bridge
//!
//! Negotiates sessions with dApps over a relay transport, keeps them alive
//! across restarts and routes their signing requests to EVM (`eip155`) and
//! Solana (`solana`) signers.
//!
//! ## Modules
//!
//! - `bridge` - Wiring, startup and teardown ([`bridge::WalletBridge`])
//! - `pairing` - Pairing URIs and the pairing state machine
//! - `session` - Proposal approval and session lifecycle
//! - `negotiation` - Namespace negotiation
//! - `router` - Per-account request queues, idempotency, timeouts
//! - `dispatch` - Per-method validation and signer invocation
//! - `signer` - Chain signers (EVM via alloy)
//! - `relay` - Relay transport trait and the JSON-lines relay
//! - `storage` - Session persistence (redb)
//! - `codec` - JSON-RPC 2.0 envelopes

pub mod approval;
pub mod bridge;
pub mod clock;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod negotiation;
pub mod pairing;
pub mod relay;
pub mod router;
pub mod session;
pub mod signer;
pub mod storage;
