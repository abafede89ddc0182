// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! MCP client for a single remote server.
//!
//! A client owns one [`Correlator`] for its whole life and a fresh transport
//! per connection attempt. `connect()` runs the MCP handshake
//! (`initialize`, then `notifications/initialized`) and tool discovery, and
//! hands back a receiver of [`ClientEvent`]s so the owner learns about
//! re-published tool lists and channel death without polling.
//!
//! Inbound traffic is handled by one dispatch task per connection:
//! - responses settle pending requests by ID
//! - `ping` requests are answered, other server requests get `-32601`
//! - `notifications/tools/list_changed` re-runs discovery
//! - `notifications/message` is forwarded to `tracing`

use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock as StdRwLock};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::config::RemoteServerConfig;
use super::correlator::Correlator;
use super::error::{error_codes, McpError, McpResult};
use super::message::{JsonRpcError, Message, Notification, Request};
use super::state::{ConnectionState, ConnectionStatus};
use super::transport::{DefaultTransportFactory, Transport, TransportEvent, TransportFactory};
use super::types::{McpToolResult, ServerInfo, ToolDescriptor};
use crate::telemetry::{self, ConnectionEvent};

/// MCP protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Name this client reports in `clientInfo`.
pub const CLIENT_NAME: &str = "tether";

/// Guard against servers that hand out cursors forever.
const MAX_TOOL_PAGES: usize = 100;

/// Something the owner of a connected client must react to.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The server re-published its tools.
    ToolsChanged(Vec<ToolDescriptor>),
    /// The channel died; pending requests have already been rejected.
    Closed { code: Option<i32>, reason: String },
}

/// The latest re-discovery task of a connection, if one is running.
type DiscoverySlot = Arc<StdMutex<Option<JoinHandle<()>>>>;

struct Session {
    transport: Arc<dyn Transport>,
    dispatch: JoinHandle<()>,
    discovery: DiscoverySlot,
}

/// Client for one remote MCP server.
pub struct McpClient {
    config: RemoteServerConfig,
    factory: Arc<dyn TransportFactory>,
    correlator: Arc<Correlator>,
    state: StdRwLock<ConnectionState>,
    session: Mutex<Option<Session>>,
    tools: Arc<StdRwLock<Vec<ToolDescriptor>>>,
    server_info: StdRwLock<Option<ServerInfo>>,
}

impl McpClient {
    /// Create a client using the built-in transports.
    pub fn new(config: RemoteServerConfig) -> Self {
        Self::with_factory(config, Arc::new(DefaultTransportFactory))
    }

    /// Create a client whose transports come from `factory`.
    pub fn with_factory(config: RemoteServerConfig, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            correlator: Arc::new(Correlator::new(config.name.clone())),
            config,
            factory,
            state: StdRwLock::new(ConnectionState::default()),
            session: Mutex::new(None),
            tools: Arc::new(StdRwLock::new(Vec::new())),
            server_info: StdRwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &RemoteServerConfig {
        &self.config
    }

    /// Snapshot of the connection record.
    pub fn state(&self) -> ConnectionState {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.read().unwrap_or_else(PoisonError::into_inner).status
    }

    /// Mutate the connection record.
    pub(crate) fn update_state<R>(&self, f: impl FnOnce(&mut ConnectionState) -> R) -> R {
        f(&mut self.state.write().unwrap_or_else(PoisonError::into_inner))
    }

    /// Server identity from the last successful handshake.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Tools discovered on the current connection (remote names).
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Open a fresh channel, run the handshake and discover tools.
    ///
    /// Any previous channel is torn down first. On failure the attempt is
    /// recorded in the connection state and the status is left for the
    /// caller to move on from.
    pub async fn connect(&self) -> McpResult<mpsc::UnboundedReceiver<ClientEvent>> {
        let server = self.config.name.clone();
        self.close_session("reconnecting").await;
        if self.status().is_connected() {
            self.update_state(|s| s.transition(&server, ConnectionStatus::Disconnected));
        }
        self.update_state(|s| s.transition(&server, ConnectionStatus::Connecting));

        let timer = crate::timed!("mcp.connect");
        let outcome = self.establish().await;
        timer.finish();

        match outcome {
            Ok(events) => {
                let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner).len();
                self.update_state(|s| s.mark_connected(&server));
                telemetry::count(ConnectionEvent::Connected);
                tracing::info!(server = %server, tools, "MCP server connected");
                Ok(events)
            }
            Err(e) => {
                self.close_session("connect failed").await;
                self.update_state(|s| s.record_failure(e.to_string()));
                telemetry::count(ConnectionEvent::ConnectFailed);
                tracing::warn!(server = %server, error = %e, "MCP connect attempt failed");
                Err(e)
            }
        }
    }

    async fn establish(&self) -> McpResult<mpsc::UnboundedReceiver<ClientEvent>> {
        let server = &self.config.name;
        let transport = self.factory.create(&self.config).map_err(|e| as_connect(server, "transport", e))?;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        transport
            .connect(inbound_tx)
            .await
            .map_err(|e| as_connect(server, "transport", e))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let discovery = DiscoverySlot::default();
        let dispatcher = Dispatcher {
            config: self.config.clone(),
            correlator: self.correlator.clone(),
            transport: transport.clone(),
            tools: self.tools.clone(),
            events: events_tx,
            discovery: discovery.clone(),
        };
        let dispatch = tokio::spawn(dispatcher.run(inbound_rx));
        *self.session.lock().await = Some(Session {
            transport: transport.clone(),
            dispatch,
            discovery,
        });

        let info = self
            .handshake(transport.as_ref())
            .await
            .map_err(|e| as_connect(server, "initialize", e))?;
        tracing::debug!(
            server = %server,
            remote = %info.name,
            version = %info.version,
            protocol = ?info.protocol_version,
            "Handshake complete"
        );

        let tools = discover_tools(&self.correlator, transport.as_ref(), &self.config)
            .await
            .map_err(|e| as_connect(server, "tools/list", e))?;

        *self.server_info.write().unwrap_or_else(PoisonError::into_inner) = Some(info);
        *self.tools.write().unwrap_or_else(PoisonError::into_inner) = tools;
        Ok(events_rx)
    }

    async fn handshake(&self, transport: &dyn Transport) -> McpResult<ServerInfo> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": crate::VERSION
            }
        });
        let result = self
            .correlator
            .request(transport, "initialize", Some(params), self.config.timeout())
            .await?;

        // Best effort: the handshake already succeeded.
        if let Err(e) = transport
            .send(&Message::notification("notifications/initialized", None))
            .await
        {
            tracing::debug!(server = %self.config.name, error = %e, "Failed to send initialized notification");
        }
        Ok(ServerInfo::from_initialize(&result))
    }

    /// Send a request on the open channel.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> McpResult<Value> {
        let transport = self.transport().await?;
        let timeout = timeout.unwrap_or_else(|| self.config.timeout());
        let _timer = crate::timed!("mcp.request");
        self.correlator
            .request(transport.as_ref(), method, params, timeout)
            .await
    }

    /// Call a tool by the name the server knows it by.
    pub async fn call_tool(
        &self,
        remote_name: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> McpResult<McpToolResult> {
        let params = json!({ "name": remote_name, "arguments": arguments });
        let result = self.request("tools/call", Some(params), timeout).await?;
        Ok(McpToolResult::from_value(&result))
    }

    /// Close the channel and settle in `disconnected`.
    pub async fn disconnect(&self) {
        self.close_session("client disconnected").await;
        self.update_state(|s| s.transition(&self.config.name, ConnectionStatus::Disconnected));
    }

    /// Release the transport and dispatch task, rejecting pending requests.
    pub(crate) async fn close_session(&self, reason: &str) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            session.dispatch.abort();
            // A listing from this connection must not land after the next one.
            if let Some(discovery) = session
                .discovery
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
            {
                discovery.abort();
            }
            session.transport.close().await;
            tracing::debug!(server = %self.config.name, reason, "Session closed");
        }
        self.correlator.fail_all(None, reason);
        self.tools.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    async fn transport(&self) -> McpResult<Arc<dyn Transport>> {
        if !self.status().is_connected() {
            return Err(McpError::NotConnected(self.config.name.clone()));
        }
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.transport.clone())
            .ok_or_else(|| McpError::NotConnected(self.config.name.clone()))
    }
}

fn as_connect(server: &str, stage: &str, error: McpError) -> McpError {
    match error {
        McpError::Connect { .. } => error,
        other => McpError::connect(server, format!("{stage}: {other}")),
    }
}

/// Run `tools/list` to exhaustion, applying the server's tool filters.
async fn discover_tools(
    correlator: &Correlator,
    transport: &dyn Transport,
    config: &RemoteServerConfig,
) -> McpResult<Vec<ToolDescriptor>> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_TOOL_PAGES {
        let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
        let result = match correlator
            .request(transport, "tools/list", params, config.timeout())
            .await
        {
            Ok(result) => result,
            // A server without tools is still a usable server.
            Err(McpError::Remote { code, .. }) if code == error_codes::METHOD_NOT_FOUND => break,
            Err(e) => return Err(e),
        };

        if let Some(items) = result.get("tools").and_then(Value::as_array) {
            tools.extend(
                items
                    .iter()
                    .filter_map(|t| ToolDescriptor::from_listing(&config.name, t))
                    .filter(|t| config.is_tool_enabled(&t.remote_name)),
            );
        }

        cursor = result
            .get("nextCursor")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        if cursor.is_none() {
            break;
        }
    }

    tracing::debug!(server = %config.name, count = tools.len(), "Discovered tools");
    Ok(tools)
}

/// Inbound side of one connection.
struct Dispatcher {
    config: RemoteServerConfig,
    correlator: Arc<Correlator>,
    transport: Arc<dyn Transport>,
    tools: Arc<StdRwLock<Vec<ToolDescriptor>>>,
    events: mpsc::UnboundedSender<ClientEvent>,
    discovery: DiscoverySlot,
}

impl Dispatcher {
    async fn run(self, mut inbound: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = inbound.recv().await {
            match event {
                TransportEvent::Message(Message::Response(response)) => {
                    self.correlator.resolve(&response.id, response.outcome);
                }
                TransportEvent::Message(Message::Request(request)) => self.answer(request),
                TransportEvent::Message(Message::Notification(notification)) => {
                    self.on_notification(notification)
                }
                TransportEvent::Closed { code, reason } => {
                    let server = &self.config.name;
                    tracing::warn!(server = %server, ?code, %reason, "Channel to MCP server closed");
                    telemetry::count(ConnectionEvent::Disconnected);
                    self.correlator.fail_all(code, &reason);
                    self.tools.write().unwrap_or_else(PoisonError::into_inner).clear();
                    let _ = self.events.send(ClientEvent::Closed { code, reason });
                    return;
                }
            }
        }
    }

    fn answer(&self, request: Request) {
        let reply = if request.method == "ping" {
            Message::result(request.id, json!({}))
        } else {
            tracing::debug!(server = %self.config.name, method = %request.method, "Rejecting server request");
            Message::error(
                request.id,
                JsonRpcError::new(
                    error_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {}", request.method),
                ),
            )
        };
        // Sending may wait on I/O; the read loop must not.
        let transport = self.transport.clone();
        let server = self.config.name.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.send(&reply).await {
                tracing::debug!(server = %server, error = %e, "Failed to answer server request");
            }
        });
    }

    fn on_notification(&self, notification: Notification) {
        let server = &self.config.name;
        match notification.method.as_str() {
            "notifications/tools/list_changed" => self.rediscover(),
            "notifications/message" => log_remote_message(server, notification.params.as_ref()),
            other => tracing::trace!(server = %server, method = other, "Ignoring notification"),
        }
    }

    fn rediscover(&self) {
        let correlator = self.correlator.clone();
        let transport = self.transport.clone();
        let config = self.config.clone();
        let tools = self.tools.clone();
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            match discover_tools(&correlator, transport.as_ref(), &config).await {
                Ok(discovered) => {
                    tracing::info!(server = %config.name, count = discovered.len(), "Tool list changed");
                    *tools.write().unwrap_or_else(PoisonError::into_inner) = discovered.clone();
                    let _ = events.send(ClientEvent::ToolsChanged(discovered));
                }
                Err(e) => {
                    tracing::warn!(server = %config.name, error = %e, "Tool re-discovery failed");
                }
            }
        });
        // A newer listing supersedes one still in flight.
        if let Some(previous) = self
            .discovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle)
        {
            previous.abort();
        }
    }
}

/// Forward a server `notifications/message` to tracing at its level.
fn log_remote_message(server: &str, params: Option<&Value>) {
    let Some(params) = params else {
        return;
    };
    let level = params.get("level").and_then(Value::as_str).unwrap_or("info");
    let logger = params.get("logger").and_then(Value::as_str).unwrap_or("-");
    let data = match params.get("data") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    match level {
        "debug" => tracing::debug!(server = %server, logger, "{data}"),
        "info" | "notice" => tracing::info!(server = %server, logger, "{data}"),
        "warning" => tracing::warn!(server = %server, logger, "{data}"),
        "error" | "critical" | "alert" | "emergency" => {
            tracing::error!(server = %server, logger, "{data}")
        }
        _ => tracing::trace!(server = %server, logger, level, "{data}"),
    }
}
