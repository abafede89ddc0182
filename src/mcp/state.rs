// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-server connection lifecycle.
//!
//! ```text
//!                 connect()
//!  Disconnected ────────────► Connecting ──ok──► Connected
//!       ▲                        │  ▲                │
//!       │ stop                   │  │ delay          │ channel death
//!       │                  fail  ▼  │                ▼
//!       └──────────────────── Reconnecting ◄── (retries left?)
//!                                  │                 │ no
//!                                  └──── no ───────► Failed
//! ```
//!
//! `Failed` is terminal until a manual restart.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle status of one remote server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionStatus {
    /// Whether moving to `next` is a legal edge.
    pub fn can_transition_to(self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        match (self, next) {
            // Manual stop is always allowed.
            (_, Disconnected) => true,
            (Disconnected, Connecting) => true,
            // Refused by the security policy before any attempt.
            (Disconnected, Failed) => true,
            (Connecting, Connected | Reconnecting | Failed) => true,
            (Connected, Reconnecting | Failed) => true,
            (Reconnecting, Connecting | Failed) => true,
            // Manual restart.
            (Failed, Connecting) => true,
            _ => false,
        }
    }

    /// Whether requests may be routed to the server.
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Mutable connection record owned by one client.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub last_connected_at: Option<DateTime<Utc>>,
}

impl ConnectionState {
    /// Move to `next`, logging illegal edges. Returns whether the move happened.
    pub fn transition(&mut self, server: &str, next: ConnectionStatus) -> bool {
        if self.status == next {
            return true;
        }
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                server = %server,
                from = %self.status,
                to = %next,
                "Ignoring illegal connection state transition"
            );
            return false;
        }
        tracing::debug!(server = %server, from = %self.status, to = %next, "Connection state");
        self.status = next;
        true
    }

    /// Record a successful handshake. The retry count survives until the
    /// connection proves stable, so a server that dies right after each
    /// handshake still exhausts its budget.
    pub fn mark_connected(&mut self, server: &str) {
        if self.transition(server, ConnectionStatus::Connected) {
            self.last_error = None;
            self.last_connected_at = Some(Utc::now());
        }
    }

    /// Record a failed attempt or a channel death.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(error.into());
    }

    /// The connection stayed up long enough; restore the full retry budget.
    pub fn mark_stable(&mut self) {
        self.retry_count = 0;
    }

    /// Clear the retry budget ahead of a manual restart.
    pub fn reset(&mut self) {
        self.retry_count = 0;
        self.last_error = None;
    }
}
