// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Request/response correlation.
//!
//! Each client owns one correlator for its whole lifetime, so IDs stay
//! strictly increasing across reconnects and are never reused. Responses are
//! matched by ID only; arrival order and delivery path are irrelevant.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;

use super::error::{McpError, McpResult};
use super::message::{JsonRpcError, Message, RequestId};
use super::transport::Transport;
use crate::telemetry::{self, ConnectionEvent};

type Outcome = McpResult<Value>;

struct PendingRequest {
    method: String,
    sent_at: Instant,
    tx: oneshot::Sender<Outcome>,
}

/// Pending-request table for one client.
pub struct Correlator {
    server: String,
    next_id: AtomicI64,
    pending: Mutex<HashMap<i64, PendingRequest>>,
}

/// Removes the entry however the request future ends, including when the
/// caller drops it.
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    id: i64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.table().remove(&self.id);
    }
}

impl Correlator {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            next_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<i64, PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Next correlation ID.
    pub fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.table().len()
    }

    /// Send a request through `transport` and wait for its response.
    ///
    /// `timeout` covers the send as well as the wait, so a slow POST cannot
    /// outlive its deadline.
    pub async fn request(
        &self,
        transport: &dyn Transport,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> McpResult<Value> {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.table().insert(
            id,
            PendingRequest {
                method: method.to_string(),
                sent_at: Instant::now(),
                tx,
            },
        );
        let _guard = PendingGuard {
            correlator: self,
            id,
        };

        let message = Message::request(id, method, params);
        tracing::trace!(server = %self.server, id, method, "Sending request");

        let exchange = async {
            transport.send(&message).await?;
            rx.await.unwrap_or_else(|_| {
                Err(McpError::channel_closed(
                    &self.server,
                    None,
                    "request abandoned",
                ))
            })
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => {
                telemetry::count(ConnectionEvent::RequestTimeout);
                tracing::warn!(
                    server = %self.server,
                    id,
                    method,
                    timeout_ms = timeout.as_millis() as u64,
                    "Request timed out"
                );
                Err(McpError::Timeout {
                    server: self.server.clone(),
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Settle the request matching `id`. Returns false for unknown IDs,
    /// which are late or duplicate deliveries and are dropped.
    pub fn resolve(&self, id: &RequestId, outcome: Result<Value, JsonRpcError>) -> bool {
        let key = match id {
            RequestId::Number(n) => Some(*n),
            RequestId::String(s) => s.parse::<i64>().ok(),
        };
        let Some(entry) = key.and_then(|k| self.table().remove(&k)) else {
            tracing::debug!(server = %self.server, %id, "Discarding response with no pending request");
            return false;
        };

        tracing::trace!(
            server = %self.server,
            %id,
            method = %entry.method,
            elapsed_ms = entry.sent_at.elapsed().as_millis() as u64,
            "Response received"
        );
        let outcome = outcome.map_err(|e| McpError::remote(&self.server, e.code, e.message, e.data));
        // The caller may have just timed out; that is fine.
        let _ = entry.tx.send(outcome);
        true
    }

    /// Reject every outstanding request because the channel died.
    pub fn fail_all(&self, code: Option<i32>, reason: &str) -> usize {
        let drained: Vec<PendingRequest> = self.table().drain().map(|(_, p)| p).collect();
        let count = drained.len();
        for entry in drained {
            let _ = entry.tx.send(Err(McpError::channel_closed(&self.server, code, reason)));
        }
        if count > 0 {
            tracing::debug!(server = %self.server, count, ?code, reason, "Rejected pending requests");
        }
        count
    }
}
