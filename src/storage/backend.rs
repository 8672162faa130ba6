// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Persistence collaborator for session records.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::Session;

use super::{StoreError, StoreResult};

/// Durable key-value persistence of serialized sessions, keyed by topic.
///
/// Each call must be atomic for its topic: a reader never observes a
/// partially written record.
pub trait SessionBackend: Send + Sync {
    /// Load every persisted session.
    fn load_all(&self) -> StoreResult<Vec<Session>>;

    /// Insert or overwrite the record for `session.topic`.
    fn save(&self, session: &Session) -> StoreResult<()>;

    /// Remove the record for `topic`. Removing an absent topic is not an error.
    fn delete(&self, topic: &str) -> StoreResult<()>;
}

/// In-process backend holding the JSON form of each session.
#[derive(Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted records.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionBackend for MemoryBackend {
    fn load_all(&self) -> StoreResult<Vec<Session>> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        records
            .values()
            .map(|bytes| serde_json::from_slice(bytes).map_err(StoreError::from))
            .collect()
    }

    fn save(&self, session: &Session) -> StoreResult<()> {
        let json = serde_json::to_vec(session)?;
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        records.insert(session.topic.clone(), json);
        Ok(())
    }

    fn delete(&self, topic: &str) -> StoreResult<()> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        records.remove(topic);
        Ok(())
    }
}
