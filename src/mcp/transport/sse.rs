// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! SSE transport: one persistent event stream plus a POST per message.
//!
//! The first request sent (the `initialize` handshake) is POSTed with
//! `Accept: text/event-stream` and its response *is* the persistent stream.
//! Later POSTs may be answered on that shared stream, in their own body, or
//! on a short-lived stream of their own; every path feeds the same inbound
//! queue, so correlation never depends on which call delivered the bytes.
//!
//! The persistent stream ending, cleanly or not, is channel death.

use std::sync::{Mutex as StdMutex, PoisonError, RwLock as StdRwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, Url};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::http::{is_event_stream, HttpChannel};
use super::sse_decoder::SseDecoder;
use super::{forward_json, InboundSender, Transport, TransportEvent};
use crate::mcp::config::{RemoteServerConfig, TransportKind};
use crate::mcp::error::{McpError, McpResult};
use crate::mcp::message::Message;

const EVENT_STREAM: &str = "text/event-stream";

/// Read an event stream to its end, forwarding every message record.
/// `endpoint` is called for legacy `endpoint` announcements.
pub(crate) async fn pump_events(
    server: &str,
    response: Response,
    inbound: &InboundSender,
    mut endpoint: impl FnMut(&str),
) -> Result<(), reqwest::Error> {
    let mut decoder = SseDecoder::new();
    let mut body = response.bytes_stream();

    let mut dispatch = |event: super::SseEvent| {
        if event.is_message() {
            forward_json(server, &event.data, inbound);
        } else if event.event.as_deref() == Some("endpoint") {
            endpoint(event.data.trim());
        } else {
            tracing::trace!(server = %server, event = ?event.event, "Ignoring SSE event");
        }
    };

    while let Some(chunk) = body.next().await {
        for event in decoder.push(&chunk?) {
            dispatch(event);
        }
    }
    if let Some(event) = decoder.finish() {
        dispatch(event);
    }
    Ok(())
}

/// Resolve an `endpoint` announcement against the stream URL. Falls back
/// to `base` when either side does not parse.
pub fn resolve_endpoint(base: &str, endpoint: &str) -> String {
    match Url::parse(base).and_then(|base| base.join(endpoint)) {
        Ok(url) => url.to_string(),
        Err(e) => {
            tracing::warn!(base, endpoint, error = %e, "Ignoring unresolvable endpoint");
            base.to_string()
        }
    }
}

/// Transport for `sse` servers.
pub struct SseTransport {
    url: String,
    /// Where POSTs go; moves if the server announces an `endpoint`.
    post_url: std::sync::Arc<StdRwLock<String>>,
    /// Bounds notification POSTs, which no correlator deadline covers.
    notify_timeout: Duration,
    channel: HttpChannel,
    inbound: StdMutex<Option<InboundSender>>,
    /// The persistent stream reader; `Some` once the stream is open.
    stream: Mutex<Option<JoinHandle<()>>>,
    /// Readers for POST responses that arrived as their own short stream.
    side_streams: StdMutex<Vec<JoinHandle<()>>>,
}

impl SseTransport {
    pub fn new(config: RemoteServerConfig) -> McpResult<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| McpError::connect(&config.name, "missing url"))?;
        // No overall timeout: it would cut the persistent stream.
        let client = Client::builder()
            .connect_timeout(config.timeout())
            .build()
            .map_err(|e| McpError::connect(&config.name, format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            post_url: std::sync::Arc::new(StdRwLock::new(url.clone())),
            url,
            notify_timeout: config.timeout(),
            channel: HttpChannel::new(&config, client),
            inbound: StdMutex::new(None),
            stream: Mutex::new(None),
            side_streams: StdMutex::new(Vec::new()),
        })
    }

    fn inbound(&self) -> McpResult<InboundSender> {
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| McpError::NotConnected(self.channel.server.clone()))
    }

    fn post_url(&self) -> String {
        self.post_url
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// POST `body` and adopt the response as the persistent stream.
    async fn open_stream(&self, body: String, inbound: InboundSender) -> McpResult<JoinHandle<()>> {
        let server = self.channel.server.clone();
        let response = self
            .channel
            .post(&self.url, body, EVENT_STREAM)
            .send()
            .await
            .map_err(|e| McpError::connect(&server, format!("POST {} failed: {e}", self.url)))?;
        self.channel.capture_session(&response);

        let status = response.status();
        if !status.is_success() {
            return Err(McpError::connect(&server, format!("handshake returned HTTP {status}")));
        }
        if !is_event_stream(&response) {
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("none")
                .to_string();
            return Err(McpError::connect(
                &server,
                format!("expected {EVENT_STREAM} response, got '{content_type}'"),
            ));
        }
        tracing::info!(server = %server, url = %self.url, "SSE stream open");

        let base = self.url.clone();
        let post_url = self.post_url.clone();
        Ok(tokio::spawn(async move {
            let on_endpoint = |endpoint: &str| {
                let resolved = resolve_endpoint(&base, endpoint);
                tracing::debug!(server = %server, endpoint = %resolved, "Server announced POST endpoint");
                *post_url.write().unwrap_or_else(PoisonError::into_inner) = resolved;
            };
            let reason = match pump_events(&server, response, &inbound, on_endpoint).await {
                Ok(()) => "event stream ended".to_string(),
                Err(e) => format!("event stream failed: {e}"),
            };
            tracing::warn!(server = %server, %reason, "SSE stream closed");
            let _ = inbound.send(TransportEvent::Closed { code: None, reason });
        }))
    }

    fn track_side_stream(&self, handle: JoinHandle<()>) {
        let mut side = self.side_streams.lock().unwrap_or_else(PoisonError::into_inner);
        side.retain(|h| !h.is_finished());
        side.push(handle);
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn connect(&self, inbound: InboundSender) -> McpResult<()> {
        *self.inbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(inbound);
        Ok(())
    }

    async fn send(&self, message: &Message) -> McpResult<()> {
        let inbound = self.inbound()?;
        let body = message.to_line()?;

        {
            let mut stream = self.stream.lock().await;
            if stream.is_none() {
                if !matches!(message, Message::Request(_)) {
                    return Err(McpError::NotConnected(self.channel.server.clone()));
                }
                *stream = Some(self.open_stream(body, inbound).await?);
                return Ok(());
            }
        }

        let server = &self.channel.server;
        let url = self.post_url();
        let mut request = self.channel.post(&url, body, "application/json, text/event-stream");
        if !matches!(message, Message::Request(_)) {
            request = request.timeout(self.notify_timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|e| McpError::transport(server, format!("POST {url} failed: {e}")))?;
        self.channel.capture_session(&response);
        let response = self.channel.check_status(response).await?;

        if is_event_stream(&response) {
            // Its end is not channel death; only the persistent stream's is.
            let server = server.clone();
            self.track_side_stream(tokio::spawn(async move {
                if let Err(e) = pump_events(&server, response, &inbound, |_| {}).await {
                    tracing::debug!(server = %server, error = %e, "Response stream failed");
                }
            }));
        } else if matches!(message, Message::Request(_)) {
            let body = response
                .text()
                .await
                .map_err(|e| McpError::transport(server, format!("failed to read body: {e}")))?;
            // Usually empty (202): the answer comes over the persistent stream.
            forward_json(server, &body, &inbound);
        }
        Ok(())
    }

    async fn close(&self) {
        if let Some(stream) = self.stream.lock().await.take() {
            stream.abort();
        }
        for handle in self
            .side_streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            handle.abort();
        }
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        tracing::debug!(server = %self.channel.server, "SSE transport closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_endpoint() {
        let base = "http://localhost:3000/mcp/sse";
        assert_eq!(
            resolve_endpoint(base, "/messages?sessionId=1"),
            "http://localhost:3000/messages?sessionId=1"
        );
        assert_eq!(
            resolve_endpoint(base, "messages"),
            "http://localhost:3000/mcp/messages"
        );
        assert_eq!(
            resolve_endpoint(base, "https://other.example.com/post"),
            "https://other.example.com/post"
        );
        assert_eq!(
            resolve_endpoint("http://localhost:3000", "messages"),
            "http://localhost:3000/messages"
        );
    }

    #[test]
    fn test_resolve_endpoint_query_dots_and_garbage() {
        let base = "http://localhost:3000/mcp/sse?token=abc#frag";
        assert_eq!(
            resolve_endpoint(base, "messages?sessionId=7"),
            "http://localhost:3000/mcp/messages?sessionId=7"
        );
        assert_eq!(
            resolve_endpoint(base, "../messages"),
            "http://localhost:3000/messages"
        );
        assert_eq!(resolve_endpoint(base, "?sessionId=9"), "http://localhost:3000/mcp/sse?sessionId=9");
        assert_eq!(resolve_endpoint("not a url", "/messages"), "not a url");
    }

    #[tokio::test]
    async fn test_notification_before_stream_is_rejected() {
        let transport = SseTransport::new(RemoteServerConfig::sse("s", "http://127.0.0.1:9/sse")).unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        transport.connect(tx).await.unwrap();
        let err = transport
            .send(&Message::notification("notifications/initialized", None))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::NotConnected(_)));
    }
}
