// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Remote server manager.
//!
//! Owns one [`McpClient`] per configured server and one supervisor task per
//! started server. A supervisor runs the connect / watch / reconnect loop
//! for its server only, so a slow scan, a hung handshake or a crash loop on
//! one server never delays another.
//!
//! The aggregated [`ToolRegistry`] is the only state shared between
//! supervisors; it sits behind a lock that is never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock as StdRwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::client::{ClientEvent, McpClient};
use super::config::{ManagerConfig, RemoteServerConfig, TransportKind};
use super::error::{McpError, McpResult};
use super::events::{EventBus, ServerEvent};
use super::registry::{ToolCollision, ToolRegistry};
use super::security::{PatternScanner, RiskLevel, SecurityGate, SecurityPolicy, SecurityVerdict};
use super::state::ConnectionStatus;
use super::transport::{DefaultTransportFactory, TransportFactory};
use super::types::{McpToolResult, ToolDescriptor};
use crate::telemetry::{self, ConnectionEvent, ToolCallSpan};

/// Health snapshot of one server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub name: String,
    pub transport: TransportKind,
    pub status: ConnectionStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub tool_count: usize,
}

/// Security verdict for one server's package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub server: String,
    pub package: String,
    pub transport: TransportKind,
    pub verdict: SecurityVerdict,
    /// Whether the policy would refuse to start this server.
    pub blocked: bool,
}

/// Builder for [`RemoteServerManager`].
pub struct ManagerBuilder {
    config: ManagerConfig,
    gate: Arc<dyn SecurityGate>,
    factory: Arc<dyn TransportFactory>,
}

impl ManagerBuilder {
    /// Replace the default [`PatternScanner`].
    pub fn security_gate(mut self, gate: Arc<dyn SecurityGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Replace the built-in transports.
    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Validate the configuration and construct one client per enabled server.
    pub fn build(self) -> McpResult<RemoteServerManager> {
        self.config.validate()?;
        let servers = self
            .config
            .enabled_servers()
            .map(|server| {
                Arc::new(ServerEntry {
                    client: Arc::new(McpClient::with_factory(server.clone(), self.factory.clone())),
                    supervisor: StdMutex::new(None),
                })
            })
            .collect();

        Ok(RemoteServerManager {
            inner: Arc::new(Inner {
                policy: SecurityPolicy::new(self.config.security.clone()),
                registry: StdRwLock::new(ToolRegistry::new(self.config.namespace.clone())),
                config: self.config,
                gate: self.gate,
                servers,
                verdicts: StdMutex::new(HashMap::new()),
                events: EventBus::new(),
            }),
        })
    }
}

struct ServerEntry {
    client: Arc<McpClient>,
    supervisor: StdMutex<Option<JoinHandle<()>>>,
}

impl ServerEntry {
    fn name(&self) -> &str {
        self.client.name()
    }

    fn abort_supervisor(&self) {
        if let Some(handle) = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    fn is_supervised(&self) -> bool {
        self.supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

/// Outcome of a supervisor's first connection attempt.
type FirstAttempt = oneshot::Receiver<Result<(), String>>;

struct Inner {
    config: ManagerConfig,
    policy: SecurityPolicy,
    gate: Arc<dyn SecurityGate>,
    servers: Vec<Arc<ServerEntry>>,
    registry: StdRwLock<ToolRegistry>,
    /// One verdict per package for the life of the manager.
    verdicts: StdMutex<HashMap<String, SecurityVerdict>>,
    events: EventBus,
}

/// Owns and supervises every configured remote server.
pub struct RemoteServerManager {
    inner: Arc<Inner>,
}

impl RemoteServerManager {
    /// Manager with the default scanner and transports.
    pub fn new(config: ManagerConfig) -> McpResult<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: ManagerConfig) -> ManagerBuilder {
        ManagerBuilder {
            config,
            gate: Arc::new(PatternScanner::new()),
            factory: Arc::new(DefaultTransportFactory),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Receive lifecycle events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.events.subscribe()
    }

    /// Scan, then start every auto-start server.
    ///
    /// Waits for the first connection attempt of each server (concurrently)
    /// and succeeds even if some of them failed; reconnects carry on in the
    /// background. Fails only when `blockOnHighRisk` is set and a package is
    /// RED after overrides and trust adjustments, in which case no transport
    /// is started at all.
    pub async fn initialize(&self) -> McpResult<()> {
        let security = self.inner.policy.config();
        if security.enable_startup_scan && security.block_on_high_risk {
            for report in self.scan_all().await {
                if report.blocked {
                    tracing::error!(
                        server = %report.server,
                        package = %report.package,
                        flags = ?report.verdict.flags(),
                        "High-risk package blocked; aborting startup"
                    );
                    return Err(McpError::SecurityBlocked {
                        server: report.server,
                        package: report.package,
                        flags: report.verdict.flags(),
                    });
                }
            }
        }

        let first_attempts: Vec<FirstAttempt> = self
            .inner
            .servers
            .iter()
            .filter(|entry| entry.client.config().auto_start && !entry.is_supervised())
            .map(|entry| Inner::start(&self.inner, entry.clone()))
            .collect();

        let started = first_attempts.len();
        let connected = join_all(first_attempts)
            .await
            .into_iter()
            .filter(|outcome| matches!(outcome, Ok(Ok(()))))
            .count();
        tracing::info!(started, connected, tools = self.list_tools().len(), "Remote MCP servers initialized");
        Ok(())
    }

    /// Scan every process-transport package concurrently.
    pub async fn scan_all(&self) -> Vec<ScanReport> {
        let scans = self
            .inner
            .servers
            .iter()
            .map(|entry| self.inner.assess(entry.client.config()));
        join_all(scans).await.into_iter().flatten().collect()
    }

    /// Every visible tool across connected servers, sorted by name.
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.inner.registry().list()
    }

    /// Name collisions in the current tool map.
    pub fn collisions(&self) -> Vec<ToolCollision> {
        self.inner.registry().collisions().to_vec()
    }

    /// Route a tool call to its owning server.
    ///
    /// Uses the manager's default timeout unless `timeout` overrides it.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> McpResult<McpToolResult> {
        let tool = self
            .inner
            .registry()
            .resolve(name)
            .cloned()
            .ok_or_else(|| McpError::tool_not_found(name, "unknown tool"))?;
        let owner = &tool.owner_server_name;
        let entry = self
            .inner
            .entry(owner)
            .ok_or_else(|| McpError::tool_not_found(name, format!("owner '{owner}' is not configured")))?;
        if !entry.client.status().is_connected() {
            return Err(McpError::tool_not_found(
                name,
                format!("owner '{owner}' is not connected"),
            ));
        }

        let timeout = timeout.unwrap_or_else(|| self.inner.config.default_timeout());
        let span = ToolCallSpan::start(owner, &tool.remote_name);
        let result = entry
            .client
            .call_tool(&tool.remote_name, arguments, Some(timeout))
            .instrument(span.span().clone())
            .await;
        span.finish_with_result(&result);
        result
    }

    /// Health of every configured server, in configuration order.
    pub fn list_connected_servers(&self) -> Vec<ServerStatus> {
        self.inner.servers.iter().map(|e| self.inner.status_of(e)).collect()
    }

    pub fn server_status(&self, name: &str) -> McpResult<ServerStatus> {
        let entry = self.inner.entry(name).ok_or_else(|| McpError::ServerNotFound(name.to_string()))?;
        Ok(self.inner.status_of(entry))
    }

    /// Stop a server and start it again with a fresh retry budget.
    ///
    /// This is the only way out of `failed`; it also starts servers that
    /// are not auto-started. Returns the outcome of the first attempt.
    pub async fn restart_server(&self, name: &str) -> McpResult<()> {
        let entry = self
            .inner
            .entry(name)
            .cloned()
            .ok_or_else(|| McpError::ServerNotFound(name.to_string()))?;

        self.inner.stop(&entry).await;
        entry.client.update_state(|s| s.reset());

        if let Some(report) = self.inner.assess(entry.client.config()).await {
            if report.blocked {
                return Err(McpError::SecurityBlocked {
                    server: report.server,
                    package: report.package,
                    flags: report.verdict.flags(),
                });
            }
        }

        tracing::info!(server = %name, "Restarting MCP server");
        match Inner::start(&self.inner, entry).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(McpError::connect(name, reason)),
            Err(_) => Err(McpError::connect(name, "supervisor stopped")),
        }
    }

    /// Stop a server; it stays `disconnected` until restarted.
    pub async fn stop_server(&self, name: &str) -> McpResult<()> {
        let entry = self
            .inner
            .entry(name)
            .cloned()
            .ok_or_else(|| McpError::ServerNotFound(name.to_string()))?;
        self.inner.stop(&entry).await;
        Ok(())
    }

    /// Disconnect every server, cancel pending reconnects and reject
    /// outstanding requests.
    pub async fn shutdown(&self) {
        join_all(self.inner.servers.iter().map(|entry| self.inner.stop(entry))).await;
        tracing::info!("Remote MCP servers shut down");
    }
}

impl Drop for RemoteServerManager {
    fn drop(&mut self) {
        // Supervisors hold the inner state alive; process children are
        // killed when their transports drop.
        for entry in &self.inner.servers {
            entry.abort_supervisor();
        }
    }
}

impl Inner {
    fn registry(&self) -> std::sync::RwLockReadGuard<'_, ToolRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_registry(&self, f: impl FnOnce(&mut ToolRegistry)) {
        f(&mut self.registry.write().unwrap_or_else(PoisonError::into_inner));
    }

    fn entry(&self, name: &str) -> Option<&Arc<ServerEntry>> {
        self.servers.iter().find(|e| e.name() == name)
    }

    fn status_of(&self, entry: &ServerEntry) -> ServerStatus {
        let state = entry.client.state();
        let config = entry.client.config();
        ServerStatus {
            name: config.name.clone(),
            transport: config.transport,
            status: state.status,
            retry_count: state.retry_count,
            last_error: state.last_error,
            last_connected_at: state.last_connected_at,
            tool_count: self.registry().tools_for(&config.name).len(),
        }
    }

    /// Scan (once per package) and apply the operator policy.
    async fn assess(&self, config: &RemoteServerConfig) -> Option<ScanReport> {
        if !config.transport.is_process() || !self.policy.config().enable_startup_scan {
            return None;
        }
        let package = config.package()?.to_string();

        let cached = self
            .verdicts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&package)
            .cloned();
        let verdict = match cached {
            Some(verdict) => verdict,
            None => {
                let scanned = match self.gate.scan(&package, config.transport).await {
                    Ok(verdict) => verdict,
                    Err(e) => {
                        tracing::warn!(server = %config.name, package = %package, error = %e, "Security scan failed");
                        SecurityVerdict::scan_failed(e)
                    }
                };
                let verdict = self.policy.apply(&package, scanned);
                log_verdict(&config.name, &package, &verdict);
                self.verdicts
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(package.clone(), verdict.clone());
                verdict
            }
        };

        Some(ScanReport {
            server: config.name.clone(),
            blocked: self.policy.blocks(&verdict),
            package,
            transport: config.transport,
            verdict,
        })
    }

    /// Spawn the supervisor for `entry`, replacing any previous one.
    fn start(inner: &Arc<Inner>, entry: Arc<ServerEntry>) -> FirstAttempt {
        let (tx, rx) = oneshot::channel();
        entry.abort_supervisor();
        let handle = tokio::spawn(supervise(inner.clone(), entry.clone(), tx));
        *entry.supervisor.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        rx
    }

    async fn stop(&self, entry: &ServerEntry) {
        let was_live = entry.client.status() != ConnectionStatus::Disconnected;
        entry.abort_supervisor();
        entry.client.disconnect().await;
        self.update_registry(|r| {
            r.unregister(entry.name());
        });
        if was_live {
            self.events.publish(ServerEvent::Disconnected {
                name: entry.name().to_string(),
                exit_code: None,
            });
        }
    }
}

fn log_verdict(server: &str, package: &str, verdict: &SecurityVerdict) {
    let flags = verdict.flags();
    let adjustment = verdict.adjustment.as_deref().unwrap_or("-");
    match verdict.level {
        RiskLevel::Red => tracing::warn!(server, package, ?flags, adjustment, "Package is high risk"),
        RiskLevel::Yellow => tracing::info!(server, package, ?flags, adjustment, "Package has warnings"),
        RiskLevel::Green => tracing::debug!(server, package, adjustment, "Package passed security scan"),
    }
}

/// Connect / watch / reconnect loop for one server.
async fn supervise(inner: Arc<Inner>, entry: Arc<ServerEntry>, first: oneshot::Sender<Result<(), String>>) {
    let client = &entry.client;
    let name = client.name().to_string();
    let policy = inner.config.reconnect;
    let budget = policy.budget_for(client.config());
    let mut first = Some(first);

    if let Some(report) = inner.assess(client.config()).await {
        if report.blocked {
            let error = McpError::SecurityBlocked {
                server: report.server,
                package: report.package,
                flags: report.verdict.flags(),
            }
            .to_string();
            client.update_state(|s| {
                s.last_error = Some(error.clone());
                s.transition(&name, ConnectionStatus::Failed)
            });
            inner.events.publish(ServerEvent::Error { name: name.clone(), error: error.clone() });
            inner.events.publish(ServerEvent::Failed { name });
            if let Some(tx) = first.take() {
                let _ = tx.send(Err(error));
            }
            return;
        }
    }

    loop {
        match client.connect().await {
            Ok(mut events) => {
                let tools = client.tools();
                let count = tools.len();
                inner.update_registry(|r| r.register(&name, tools));
                inner.events.publish(ServerEvent::Connected { name: name.clone(), tools: count });
                if let Some(tx) = first.take() {
                    let _ = tx.send(Ok(()));
                }

                let stable = tokio::time::sleep(policy.stable_after());
                tokio::pin!(stable);
                let mut settled = false;

                let death = loop {
                    let event = tokio::select! {
                        () = &mut stable, if !settled => None,
                        event = events.recv() => Some(event),
                    };
                    let Some(event) = event else {
                        settled = true;
                        client.update_state(|s| s.mark_stable());
                        tracing::debug!(server = %name, "Connection stable; retry budget restored");
                        continue;
                    };
                    match event {
                        Some(ClientEvent::ToolsChanged(tools)) => {
                            let count = tools.len();
                            inner.update_registry(|r| r.register(&name, tools));
                            inner.events.publish(ServerEvent::ToolsChanged { name: name.clone(), tools: count });
                        }
                        Some(ClientEvent::Closed { code, reason }) => break (code, reason),
                        None if client.status() == ConnectionStatus::Disconnected => return,
                        None => break (None, "dispatch ended".to_string()),
                    }
                };

                let (code, reason) = death;
                inner.update_registry(|r| {
                    r.unregister(&name);
                });
                client.close_session(&reason).await;
                client.update_state(|s| s.record_failure(reason.clone()));
                inner.events.publish(ServerEvent::Disconnected { name: name.clone(), exit_code: code });
            }
            Err(e) => {
                inner.events.publish(ServerEvent::Error { name: name.clone(), error: e.to_string() });
                if let Some(tx) = first.take() {
                    let _ = tx.send(Err(e.to_string()));
                }
            }
        }

        // Every failure, whether a refused attempt or a dropped channel,
        // spends one retry; `budget` of them are followed by a reconnect.
        let retries = client.state().retry_count;
        if !policy.auto_reconnect || retries > budget {
            client.update_state(|s| s.transition(&name, ConnectionStatus::Failed));
            tracing::error!(server = %name, retries, budget, "MCP server failed; restart required");
            inner.events.publish(ServerEvent::Failed { name });
            return;
        }

        let attempt = retries;
        let delay = policy.delay_for(attempt);
        client.update_state(|s| s.transition(&name, ConnectionStatus::Reconnecting));
        telemetry::count(ConnectionEvent::ReconnectAttempt);
        tracing::info!(server = %name, attempt, budget, delay_ms = delay.as_millis() as u64, "Reconnecting");
        inner.events.publish(ServerEvent::Reconnecting { name: name.clone(), attempt, delay });
        tokio::time::sleep(delay).await;
    }
}
