// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Topic-indexed session table with expiry semantics.
//!
//! All mutations go through the write lock and are written through to the
//! backend before the in-memory table changes, so readers never see a record
//! the backend does not hold.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::clock::Clock;
use crate::models::Session;

use super::{SessionBackend, StoreError, StoreResult};

pub struct SessionStore {
    sessions: RwLock<BTreeMap<String, Session>>,
    backend: Arc<dyn SessionBackend>,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    /// Open the store, loading every persisted session from `backend`.
    pub fn open(backend: Arc<dyn SessionBackend>, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        let sessions: BTreeMap<String, Session> = backend
            .load_all()?
            .into_iter()
            .map(|s| (s.topic.clone(), s))
            .collect();

        tracing::info!(sessions = sessions.len(), "Session store loaded");

        Ok(Self {
            sessions: RwLock::new(sessions),
            backend,
            clock,
        })
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, BTreeMap<String, Session>>> {
        self.sessions.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, BTreeMap<String, Session>>> {
        self.sessions.write().map_err(|_| StoreError::Poisoned)
    }

    /// Insert a session. Overwriting a topic is only allowed when the session
    /// currently holding it has expired.
    pub fn put(&self, session: Session) -> StoreResult<()> {
        session
            .validate()
            .map_err(|e| StoreError::InvalidSession(e.to_string()))?;

        let now = self.clock.now();
        let mut sessions = self.write()?;
        if let Some(existing) = sessions.get(&session.topic) {
            if existing.is_active(now) {
                return Err(StoreError::TopicInUse(session.topic));
            }
        }

        self.backend.save(&session)?;
        sessions.insert(session.topic.clone(), session);
        Ok(())
    }

    /// Overwrite a session unconditionally (re-pairing, expiry extension).
    pub fn replace(&self, session: Session) -> StoreResult<()> {
        session
            .validate()
            .map_err(|e| StoreError::InvalidSession(e.to_string()))?;

        let mut sessions = self.write()?;
        self.backend.save(&session)?;
        sessions.insert(session.topic.clone(), session);
        Ok(())
    }

    /// Fetch a session regardless of expiry.
    pub fn get(&self, topic: &str) -> StoreResult<Session> {
        self.read()?
            .get(topic)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(topic.to_string()))
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.read().map(|s| s.contains_key(topic)).unwrap_or(false)
    }

    /// Delete a session. Returns whether it existed.
    pub fn delete(&self, topic: &str) -> StoreResult<bool> {
        let mut sessions = self.write()?;
        if !sessions.contains_key(topic) {
            return Ok(false);
        }
        self.backend.delete(topic)?;
        sessions.remove(topic);
        Ok(true)
    }

    /// Sessions with `expiry > now`, ordered by topic.
    pub fn list_active(&self, now: i64) -> StoreResult<Vec<Session>> {
        Ok(self
            .read()?
            .values()
            .filter(|s| s.is_active(now))
            .cloned()
            .collect())
    }

    /// Delete every session with `expiry <= now`. Returns the removed topics.
    pub fn sweep_expired(&self, now: i64) -> StoreResult<Vec<String>> {
        let mut sessions = self.write()?;
        let expired: Vec<String> = sessions
            .values()
            .filter(|s| !s.is_active(now))
            .map(|s| s.topic.clone())
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for topic in expired {
            match self.backend.delete(&topic) {
                Ok(()) => {
                    sessions.remove(&topic);
                    removed.push(topic);
                }
                Err(e) => {
                    tracing::warn!(topic = %topic, error = %e, "Failed to delete expired session");
                }
            }
        }

        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "Swept expired sessions");
        }
        Ok(removed)
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }
}
