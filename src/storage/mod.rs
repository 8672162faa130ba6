// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Session Storage
//!
//! Durable, topic-indexed table of settled sessions.
//!
//! ## Layers
//!
//! - [`SessionBackend`]: persistence collaborator (load/save/delete by topic)
//! - [`MemoryBackend`]: process-local backend for tests and ephemeral bridges
//! - [`SessionDatabase`]: embedded redb backend, one ACID commit per operation
//! - [`SessionStore`]: write-through table with expiry semantics on top
//! - [`SessionSweeper`]: background task removing expired sessions
//!
//! ## Record Format
//!
//! Sessions are stored as JSON: `{ topic, namespaces, peerMetadata, expiry }`.

pub mod backend;
pub mod session_db;
pub mod session_store;
pub mod sweeper;

pub use backend::{MemoryBackend, SessionBackend};
pub use session_db::SessionDatabase;
pub use session_store::SessionStore;
pub use sweeper::SessionSweeper;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("topic {0} is held by an active session")]
    TopicInUse(String),

    #[error("invalid session record: {0}")]
    InvalidSession(String),

    #[error("session table lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;
