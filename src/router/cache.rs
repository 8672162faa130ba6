// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Resolved requests, kept per session topic.
//!
//! Keyed by `(topic, id)`. Each entry keeps the payload fingerprint next to the
//! response so a redelivery can be told apart from a reused id. Entries are
//! never evicted while their session lives: a topic's records are dropped only
//! when its cancellation token fires (disconnect, peer delete, expiry sweep or
//! bridge teardown).

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codec::JsonRpcResponse;
use crate::models::SessionRequest;

pub type RequestKey = (String, u64);

/// SHA-256 over the routed fields of a request.
pub type Fingerprint = [u8; 32];

pub fn fingerprint(request: &SessionRequest) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(request.chain_id.as_bytes());
    hasher.update([0]);
    hasher.update(request.method.as_bytes());
    hasher.update([0]);
    hasher.update(canonical(&request.params).as_bytes());
    hasher.finalize().into()
}

// serde_json maps are sorted, so `to_string` is stable for equal values.
fn canonical(params: &Value) -> String {
    params.to_string()
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub fingerprint: Fingerprint,
    pub response: JsonRpcResponse,
}

#[derive(Debug, Default)]
pub struct ResolvedLog {
    topics: Mutex<HashMap<String, HashMap<u64, Resolved>>>,
}

impl ResolvedLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HashMap<u64, Resolved>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &RequestKey) -> Option<Resolved> {
        self.lock().get(&key.0).and_then(|entries| entries.get(&key.1)).cloned()
    }

    /// Record a resolution for as long as `session` stays uncancelled.
    ///
    /// The first response recorded for a key wins. Nothing is recorded once
    /// `session` is cancelled; returns whether the entry is held.
    ///
    /// The first record for a topic spawns a task that purges the topic when
    /// `session` fires, so this must be called from within a tokio runtime.
    pub fn record(self: &Arc<Self>, key: RequestKey, resolved: Resolved, session: &CancellationToken) -> bool {
        let mut topics = self.lock();
        if session.is_cancelled() {
            return false;
        }
        let (topic, id) = key;
        let entries = match topics.entry(topic) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                self.purge_when_closed(entry.key().clone(), session.clone());
                entry.insert(HashMap::new())
            }
        };
        entries.entry(id).or_insert(resolved);
        true
    }

    fn purge_when_closed(self: &Arc<Self>, topic: String, session: CancellationToken) {
        let log = Arc::downgrade(self);
        tokio::spawn(async move {
            session.cancelled().await;
            if let Some(log) = log.upgrade() {
                let purged = log.purge_topic(&topic);
                debug!(topic = %topic, purged, "Session closed, resolved requests dropped");
            }
        });
    }

    /// Drop every entry for `topic`. Returns how many were removed.
    pub fn purge_topic(&self, topic: &str) -> usize {
        self.lock().remove(topic).map_or(0, |entries| entries.len())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().values().map(HashMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::codec;
    use serde_json::json;

    fn request(params: Value) -> SessionRequest {
        SessionRequest {
            topic: "t".into(),
            id: 1,
            chain_id: "eip155:1".into(),
            method: "personal_sign".into(),
            params,
        }
    }

    fn resolved(result: &str) -> Resolved {
        Resolved {
            fingerprint: fingerprint(&request(json!([]))),
            response: codec::ok(1, json!(result)),
        }
    }

    #[test]
    fn fingerprint_tracks_payload() {
        let a = fingerprint(&request(json!(["0x00", "0xA"])));
        let b = fingerprint(&request(json!(["0x00", "0xA"])));
        let c = fingerprint(&request(json!(["0x01", "0xA"])));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn first_resolution_wins() {
        let log = Arc::new(ResolvedLog::new());
        let session = CancellationToken::new();
        let key = ("t".to_string(), 1);
        assert!(log.record(key.clone(), resolved("first"), &session));
        assert!(log.record(key.clone(), resolved("second"), &session));
        assert_eq!(log.get(&key).unwrap().response.result(), Some(&json!("first")));
    }

    #[tokio::test]
    async fn many_requests_never_push_out_older_ones() {
        let log = Arc::new(ResolvedLog::new());
        let session = CancellationToken::new();
        for id in 0..10_000 {
            log.record(("t".into(), id), resolved("x"), &session);
        }
        assert_eq!(log.len(), 10_000);
        assert!(log.get(&("t".into(), 0)).is_some());
    }

    #[tokio::test]
    async fn purge_topic_only_touches_that_topic() {
        let log = Arc::new(ResolvedLog::new());
        let session = CancellationToken::new();
        log.record(("a".into(), 1), resolved("x"), &session);
        log.record(("a".into(), 2), resolved("x"), &session);
        log.record(("b".into(), 1), resolved("x"), &session);

        assert_eq!(log.purge_topic("a"), 2);
        assert_eq!(log.len(), 1);
        assert!(log.get(&("b".into(), 1)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn closing_a_session_drops_its_records() {
        let log = Arc::new(ResolvedLog::new());
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        log.record(("a".into(), 1), resolved("x"), &a);
        log.record(("b".into(), 1), resolved("x"), &b);

        a.cancel();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(log.get(&("a".into(), 1)).is_none());
        assert!(log.get(&("b".into(), 1)).is_some());

        // A late answer on a closed session is not kept.
        assert!(!log.record(("a".into(), 2), resolved("late"), &a));
        assert_eq!(log.len(), 1);
    }
}
