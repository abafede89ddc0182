// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Channel drivers for remote MCP servers.
//!
//! A transport only moves validated [`Message`]s. Everything it receives,
//! whether read from a pipe, a POST response body or a persistent event
//! stream, is pushed into one inbound queue; the client correlates purely by
//! ID and never cares which I/O path delivered the bytes.
//!
//! A transport instance is single-use: each connection attempt gets a fresh
//! one from a [`TransportFactory`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::config::{RemoteServerConfig, TransportKind};
use super::error::McpResult;
use super::message::Message;

pub mod http;
pub mod process;
pub mod sse;
pub mod sse_decoder;

pub use http::HttpTransport;
pub use process::ProcessTransport;
pub use sse::SseTransport;
pub use sse_decoder::{SseDecoder, SseEvent};

/// What a transport hands to its client.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A validated inbound message.
    Message(Message),
    /// The channel died. Emitted at most once, after every message read
    /// before the death.
    Closed { code: Option<i32>, reason: String },
}

/// Queue a transport pushes inbound traffic into.
pub type InboundSender = mpsc::UnboundedSender<TransportEvent>;

/// One channel to one remote server.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Establish the channel; inbound traffic goes to `inbound`.
    async fn connect(&self, inbound: InboundSender) -> McpResult<()>;

    /// Write one message. Order of sends is preserved on the wire.
    async fn send(&self, message: &Message) -> McpResult<()>;

    /// Release every resource; idempotent. Never emits `Closed`.
    async fn close(&self);
}

/// Builds a fresh transport for each connection attempt.
pub trait TransportFactory: Send + Sync {
    fn create(&self, config: &RemoteServerConfig) -> McpResult<Arc<dyn Transport>>;
}

/// Maps each [`TransportKind`] to its built-in driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, config: &RemoteServerConfig) -> McpResult<Arc<dyn Transport>> {
        config.validate()?;
        let transport: Arc<dyn Transport> = match config.transport {
            TransportKind::Uvx | TransportKind::Npx | TransportKind::Docker | TransportKind::Stdio => {
                Arc::new(ProcessTransport::new(config.clone()))
            }
            TransportKind::Http | TransportKind::Https => Arc::new(HttpTransport::new(config.clone())?),
            TransportKind::Sse => Arc::new(SseTransport::new(config.clone())?),
        };
        Ok(transport)
    }
}

/// Dispatch a decoded JSON payload; invalid envelopes are logged and dropped.
pub(crate) fn forward_json(server: &str, text: &str, inbound: &InboundSender) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    // A body may carry a JSON-RPC batch.
    if text.starts_with('[') {
        match serde_json::from_str::<Vec<serde_json::Value>>(text) {
            Ok(items) => {
                for item in items {
                    match Message::from_value(item) {
                        Ok(message) => {
                            let _ = inbound.send(TransportEvent::Message(message));
                        }
                        Err(e) => tracing::warn!(server = %server, error = %e, "Dropping invalid message"),
                    }
                }
            }
            Err(e) => tracing::warn!(server = %server, error = %e, "Dropping unparseable batch"),
        }
        return;
    }
    match Message::parse(text) {
        Ok(message) => {
            let _ = inbound.send(TransportEvent::Message(message));
        }
        Err(e) => tracing::warn!(server = %server, error = %e, "Dropping invalid message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_json_handles_batches_and_garbage() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        forward_json("s", r#"{"jsonrpc":"2.0","id":1,"result":{}}"#, &tx);
        forward_json(
            "s",
            r#"[{"jsonrpc":"2.0","id":2,"result":1},{"bogus":true},{"jsonrpc":"2.0","method":"n"}]"#,
            &tx,
        );
        forward_json("s", "not json", &tx);
        forward_json("s", "   ", &tx);

        let mut ids = Vec::new();
        while let Ok(TransportEvent::Message(m)) = rx.try_recv() {
            ids.push(m.id().map(|i| i.to_string()).unwrap_or_else(|| "-".to_string()));
        }
        assert_eq!(ids, vec!["1", "2", "-"]);
    }

    #[test]
    fn test_factory_rejects_invalid_config() {
        let mut config = RemoteServerConfig::npx("bad", "pkg");
        config.command = None;
        assert!(DefaultTransportFactory.create(&config).is_err());
    }
}
