// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Unary HTTP transport: one POST per message.
//!
//! There is no persistent channel, so this transport never reports
//! `Closed`; a failed POST only fails the request that made it. Response
//! bodies may be plain JSON or a short `text/event-stream`.

use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};

use super::sse::pump_events;
use super::{forward_json, InboundSender, Transport};
use crate::mcp::config::{AuthConfig, RemoteServerConfig, TransportKind};
use crate::mcp::error::{McpError, McpResult};
use crate::mcp::message::Message;

/// Session header assigned by streamable-HTTP servers.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Request plumbing shared by the HTTP and SSE transports: headers, auth and
/// the server-assigned session ID.
pub(crate) struct HttpChannel {
    pub(crate) server: String,
    client: Client,
    headers: Vec<(String, String)>,
    auth: AuthConfig,
    session_id: StdMutex<Option<String>>,
}

impl HttpChannel {
    pub(crate) fn new(config: &RemoteServerConfig, client: Client) -> Self {
        Self {
            server: config.name.clone(),
            client,
            headers: config.expanded_headers(),
            auth: config.auth.expanded(),
            session_id: StdMutex::new(None),
        }
    }

    /// POST one JSON body to `url`.
    pub(crate) fn post(&self, url: &str, body: String, accept: &str) -> RequestBuilder {
        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, accept)
            .body(body);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request = match &self.auth {
            AuthConfig::None => request,
            AuthConfig::Bearer { token } => request.bearer_auth(token),
            AuthConfig::Basic { username, password } => request.basic_auth(username, Some(password)),
        };
        if let Some(session) = self.session_id() {
            request = request.header(SESSION_HEADER, session);
        }
        request
    }

    /// Remember the session ID the server handed out, if any.
    pub(crate) fn capture_session(&self, response: &Response) {
        let Some(value) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        else {
            return;
        };
        let mut session = self.session_id.lock().unwrap_or_else(PoisonError::into_inner);
        if session.as_deref() != Some(value) {
            tracing::debug!(server = %self.server, session = %value, "MCP session assigned");
            *session = Some(value.to_string());
        }
    }

    pub(crate) fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Turn a non-2xx response into an error carrying a body excerpt.
    pub(crate) async fn check_status(&self, response: Response) -> McpResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let excerpt: String = body.chars().take(200).collect();
        Err(McpError::transport(
            &self.server,
            format!("HTTP {status}: {excerpt}"),
        ))
    }
}

/// Whether the response body is an event stream.
pub(crate) fn is_event_stream(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_start().starts_with("text/event-stream"))
        .unwrap_or(false)
}

/// Transport for `http` and `https` servers.
pub struct HttpTransport {
    kind: TransportKind,
    url: String,
    /// Notifications have no correlator deadline; their POST gets this one.
    notify_timeout: Duration,
    channel: HttpChannel,
    inbound: StdMutex<Option<InboundSender>>,
}

impl HttpTransport {
    pub fn new(config: RemoteServerConfig) -> McpResult<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| McpError::connect(&config.name, "missing url"))?;
        if config.transport == TransportKind::Https && !url.starts_with("https://") {
            return Err(McpError::connect(
                &config.name,
                format!("https transport requires an https:// url, got '{url}'"),
            ));
        }
        // Requests are bounded by the correlator's deadline, which a per-call
        // override may set above `timeoutMs`; only connecting is capped here.
        let client = Client::builder()
            .connect_timeout(config.timeout())
            .build()
            .map_err(|e| McpError::connect(&config.name, format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            kind: config.transport,
            url,
            notify_timeout: config.timeout(),
            channel: HttpChannel::new(&config, client),
            inbound: StdMutex::new(None),
        })
    }

    fn inbound(&self) -> McpResult<InboundSender> {
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| McpError::NotConnected(self.channel.server.clone()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn connect(&self, inbound: InboundSender) -> McpResult<()> {
        *self.inbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(inbound);
        tracing::debug!(server = %self.channel.server, url = %self.url, "HTTP transport ready");
        Ok(())
    }

    async fn send(&self, message: &Message) -> McpResult<()> {
        let inbound = self.inbound()?;
        let server = &self.channel.server;

        let mut request = self
            .channel
            .post(&self.url, message.to_line()?, "application/json, text/event-stream");
        if !matches!(message, Message::Request(_)) {
            request = request.timeout(self.notify_timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|e| McpError::transport(server, format!("POST {} failed: {e}", self.url)))?;
        self.channel.capture_session(&response);
        let response = self.channel.check_status(response).await?;

        // Only requests get an answer in the body.
        if !matches!(message, Message::Request(_)) {
            return Ok(());
        }

        if is_event_stream(&response) {
            pump_events(server, response, &inbound, |_| {})
                .await
                .map_err(|e| McpError::transport(server, format!("event stream failed: {e}")))?;
        } else {
            let body = response
                .text()
                .await
                .map_err(|e| McpError::transport(server, format!("failed to read body: {e}")))?;
            forward_json(server, &body, &inbound);
        }
        Ok(())
    }

    async fn close(&self) {
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_requires_tls_url() {
        let config = RemoteServerConfig::https("api", "http://example.com/mcp");
        assert!(HttpTransport::new(config).is_err());

        let config = RemoteServerConfig::https("api", "https://example.com/mcp");
        let transport = HttpTransport::new(config).unwrap();
        assert_eq!(transport.kind(), TransportKind::Https);
    }

    #[tokio::test]
    async fn test_send_before_connect_is_rejected() {
        let transport = HttpTransport::new(RemoteServerConfig::http("api", "http://127.0.0.1:9/mcp")).unwrap();
        let err = transport
            .send(&Message::request(1i64, "ping", None))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::NotConnected(_)));
    }
}
