// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-topic cancellation tokens.
//!
//! Every session topic owns a child token of the bridge's root token. Queued
//! and in-flight requests watch their topic's token; disconnect, expiry and
//! bridge teardown cancel it.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct TopicTokens {
    root: CancellationToken,
    topics: Mutex<HashMap<String, CancellationToken>>,
}

impl TopicTokens {
    pub fn new(root: CancellationToken) -> Self {
        Self {
            root,
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Token for `topic`, created on first use.
    pub fn token(&self, topic: &str) -> CancellationToken {
        match self.topics.lock() {
            Ok(mut topics) => topics
                .entry(topic.to_string())
                .or_insert_with(|| self.root.child_token())
                .clone(),
            // A poisoned map still yields a token tied to teardown.
            Err(_) => self.root.child_token(),
        }
    }

    /// Cancel everything waiting on `topic`. Returns whether a token existed.
    pub fn cancel(&self, topic: &str) -> bool {
        let token = self.topics.lock().ok().and_then(|mut t| t.remove(topic));
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every topic and the root.
    pub fn cancel_all(&self) {
        if let Ok(mut topics) = self.topics.lock() {
            topics.clear();
        }
        self.root.cancel();
    }

    pub fn root(&self) -> &CancellationToken {
        &self.root
    }
}
