// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded session database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `sessions`: topic → serialized Session (JSON bytes)

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::models::Session;

use super::{SessionBackend, StoreResult};

/// Primary table: topic → serialized Session (JSON bytes).
const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Durable session backend.
pub struct SessionDatabase {
    db: Database,
}

impl SessionDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create the table so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SESSIONS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }
}

impl SessionBackend for SessionDatabase {
    fn load_all(&self) -> StoreResult<Vec<Session>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSIONS)?;

        let mut sessions = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            match serde_json::from_slice::<Session>(value.value()) {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    tracing::warn!(
                        topic = %key.value(),
                        error = %e,
                        "Skipping malformed session record"
                    );
                }
            }
        }
        Ok(sessions)
    }

    fn save(&self, session: &Session) -> StoreResult<()> {
        let json = serde_json::to_vec(session)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSIONS)?;
            table.insert(session.topic.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn delete(&self, topic: &str) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSIONS)?;
            table.remove(topic)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
