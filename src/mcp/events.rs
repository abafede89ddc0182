// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Lifecycle events published by the manager.
//!
//! Subscribers get a `broadcast::Receiver`; slow subscribers lag and drop
//! old events rather than stalling connection supervision.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Aggregate lifecycle event for one remote server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Handshake and discovery completed.
    #[serde(rename = "serverConnected")]
    Connected { name: String, tools: usize },
    /// The channel died or was closed.
    #[serde(rename = "serverDisconnected")]
    Disconnected { name: String, exit_code: Option<i32> },
    /// A connect attempt or an established channel failed.
    #[serde(rename = "serverError")]
    Error { name: String, error: String },
    /// A reconnect is scheduled after `delay`.
    #[serde(rename = "serverReconnecting")]
    Reconnecting {
        name: String,
        attempt: u32,
        #[serde(rename = "delayMs", serialize_with = "as_millis")]
        delay: Duration,
    },
    /// Retry budget exhausted; terminal until restarted.
    #[serde(rename = "serverFailed")]
    Failed { name: String },
    /// The server re-published its tool list.
    #[serde(rename = "toolsChanged")]
    ToolsChanged { name: String, tools: usize },
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl ServerEvent {
    /// Name of the server the event concerns.
    pub fn server(&self) -> &str {
        match self {
            Self::Connected { name, .. }
            | Self::Disconnected { name, .. }
            | Self::Error { name, .. }
            | Self::Reconnecting { name, .. }
            | Self::Failed { name }
            | Self::ToolsChanged { name, .. } => name,
        }
    }
}

/// Publish side of the lifecycle bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ServerEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// New receiver seeing events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    /// Publish; having no subscribers is not an error.
    pub fn publish(&self, event: ServerEvent) {
        tracing::trace!(?event, "Server event");
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(ServerEvent::Connected {
            name: "fs".to_string(),
            tools: 3,
        });
        bus.publish(ServerEvent::Disconnected {
            name: "fs".to_string(),
            exit_code: Some(1),
        });

        assert!(matches!(rx.recv().await.unwrap(), ServerEvent::Connected { tools: 3, .. }));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.server(), "fs");
        assert!(matches!(second, ServerEvent::Disconnected { exit_code: Some(1), .. }));
    }

    #[test]
    fn test_publish_without_subscribers() {
        EventBus::new().publish(ServerEvent::Failed {
            name: "x".to_string(),
        });
    }

    #[test]
    fn test_event_json_shape() {
        let event = ServerEvent::Reconnecting {
            name: "fs".to_string(),
            attempt: 2,
            delay: Duration::from_millis(1500),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "serverReconnecting");
        assert_eq!(json["delayMs"], 1500);
        assert_eq!(json["attempt"], 2);
    }
}
