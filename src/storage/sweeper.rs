// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Session Expiry Sweeper
//!
//! Background task that periodically deletes expired sessions from the
//! [`SessionStore`] and cancels any requests still queued on their topics.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown; the
//! bridge cancels it on teardown.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::lifecycle::TopicTokens;

use super::SessionStore;

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct SessionSweeper {
    store: Arc<SessionStore>,
    tokens: Arc<TopicTokens>,
    interval: Duration,
}

impl SessionSweeper {
    pub fn new(store: Arc<SessionStore>, tokens: Arc<TopicTokens>) -> Self {
        Self {
            store,
            tokens,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the sweep loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(sweeper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Session sweeper starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Session sweeper shutting down");
                return;
            }

            self.sweep_once();

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Session sweeper shutting down");
                    return;
                }
            }
        }
    }

    /// Execute one sweep. Returns the topics that were removed.
    pub fn sweep_once(&self) -> Vec<String> {
        let now = self.store.now();
        match self.store.sweep_expired(now) {
            Ok(removed) => {
                for topic in &removed {
                    self.tokens.cancel(topic);
                }
                removed
            }
            Err(e) => {
                warn!(error = %e, "Session sweep failed");
                Vec::new()
            }
        }
    }
}
