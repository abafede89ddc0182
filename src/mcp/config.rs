// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Remote server configuration.
//!
//! Descriptors are loaded once at startup and never mutated afterwards; the
//! manager and its clients only ever hold shared references to them.
//!
//! # Example Configuration
//!
//! ```json
//! {
//!   "servers": [
//!     {
//!       "name": "filesystem",
//!       "transport": "npx",
//!       "command": "@modelcontextprotocol/server-filesystem",
//!       "args": ["/tmp"]
//!     },
//!     {
//!       "name": "github",
//!       "transport": "https",
//!       "url": "https://mcp.example.com/v1",
//!       "auth": { "type": "bearer", "token": "${GITHUB_TOKEN}" },
//!       "enabledTools": ["get_issue", "create_pr"]
//!     }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use super::error::McpError;
use super::security::RiskLevel;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default separator between server name and tool name.
pub const DEFAULT_NAMESPACE_SEPARATOR: &str = "__";

/// How a remote server is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Python package run through `uvx`.
    #[serde(alias = "process-uvx")]
    Uvx,
    /// Node package run through `npx -y`.
    #[serde(alias = "process-npx")]
    Npx,
    /// Container run through `docker run -i --rm`.
    #[serde(alias = "process-docker")]
    Docker,
    /// Arbitrary command speaking line-delimited JSON-RPC.
    Stdio,
    /// One POST per message.
    Http,
    /// One POST per message, TLS required.
    Https,
    /// Persistent event stream plus POSTs.
    Sse,
}

impl TransportKind {
    /// Whether this kind spawns a local subprocess.
    pub fn is_process(self) -> bool {
        matches!(self, Self::Uvx | Self::Npx | Self::Docker | Self::Stdio)
    }

    /// Whether this kind talks to a URL.
    pub fn is_network(self) -> bool {
        !self.is_process()
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uvx => "uvx",
            Self::Npx => "npx",
            Self::Docker => "docker",
            Self::Stdio => "stdio",
            Self::Http => "http",
            Self::Https => "https",
            Self::Sse => "sse",
        };
        f.write_str(s)
    }
}

/// Credentials attached to network transports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
}

impl AuthConfig {
    /// Copy with `${VAR}` references resolved.
    pub fn expanded(&self) -> Self {
        match self {
            Self::None => Self::None,
            Self::Bearer { token } => Self::Bearer {
                token: expand_env_vars(token),
            },
            Self::Basic { username, password } => Self::Basic {
                username: expand_env_vars(username),
                password: expand_env_vars(password),
            },
        }
    }
}

/// Configuration for a single remote MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteServerConfig {
    /// Unique key.
    pub name: String,

    pub transport: TransportKind,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Package for uvx/npx, executable for stdio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Extra environment, merged over the inherited one. Values support `${VAR}`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    /// Override the runner binary (`uvx`, `npx`, `docker`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<String>,

    /// Docker image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Extra `docker run` flags placed before the image.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default = "default_true")]
    pub auto_start: bool,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Reconnect budget; falls back to the manager's `maxReconnectAttempts`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// If non-empty, only these tools are exposed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled_tools: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_tools: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl RemoteServerConfig {
    fn base(name: impl Into<String>, transport: TransportKind) -> Self {
        Self {
            name: name.into(),
            transport,
            enabled: true,
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            runner: None,
            image: None,
            container_args: Vec::new(),
            url: None,
            headers: BTreeMap::new(),
            auth: AuthConfig::None,
            auto_start: true,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: None,
            enabled_tools: Vec::new(),
            disabled_tools: Vec::new(),
        }
    }

    /// Python package launched with `uvx`.
    pub fn uvx(name: impl Into<String>, package: impl Into<String>) -> Self {
        let mut config = Self::base(name, TransportKind::Uvx);
        config.command = Some(package.into());
        config
    }

    /// Node package launched with `npx -y`.
    pub fn npx(name: impl Into<String>, package: impl Into<String>) -> Self {
        let mut config = Self::base(name, TransportKind::Npx);
        config.command = Some(package.into());
        config
    }

    /// Container launched with `docker run -i --rm`.
    pub fn docker(name: impl Into<String>, image: impl Into<String>) -> Self {
        let mut config = Self::base(name, TransportKind::Docker);
        config.image = Some(image.into());
        config
    }

    /// Arbitrary command.
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        let mut config = Self::base(name, TransportKind::Stdio);
        config.command = Some(command.into());
        config
    }

    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        let mut config = Self::base(name, TransportKind::Http);
        config.url = Some(url.into());
        config
    }

    pub fn https(name: impl Into<String>, url: impl Into<String>) -> Self {
        let mut config = Self::base(name, TransportKind::Https);
        config.url = Some(url.into());
        config
    }

    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        let mut config = Self::base(name, TransportKind::Sse);
        config.url = Some(url.into());
        config
    }

    /// Add command arguments.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Set environment variables.
    pub fn with_env(
        mut self,
        env: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.env = env.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_runner(mut self, runner: impl Into<String>) -> Self {
        self.runner = Some(runner.into());
        self
    }

    pub fn with_container_args(
        mut self,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.container_args = args.into_iter().map(|s| s.into()).collect();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set bearer token auth.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.auth = AuthConfig::Bearer {
            token: token.into(),
        };
        self
    }

    /// Set basic auth.
    pub fn with_basic_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.auth = AuthConfig::Basic {
            username: username.into(),
            password: password.into(),
        };
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set enabled tools.
    pub fn with_enabled_tools(mut self, tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.enabled_tools = tools.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Set disabled tools.
    pub fn with_disabled_tools(
        mut self,
        tools: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.disabled_tools = tools.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Check if a tool passes the enabled/disabled filters.
    pub fn is_tool_enabled(&self, tool_name: &str) -> bool {
        if self.disabled_tools.iter().any(|t| t == tool_name) {
            return false;
        }
        self.enabled_tools.is_empty() || self.enabled_tools.iter().any(|t| t == tool_name)
    }

    /// Handshake and request timeout for this server.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Identifier handed to the security gate; `None` for network transports.
    pub fn package(&self) -> Option<&str> {
        match self.transport {
            TransportKind::Uvx | TransportKind::Npx | TransportKind::Stdio => {
                self.command.as_deref()
            }
            TransportKind::Docker => self.image.as_deref(),
            TransportKind::Http | TransportKind::Https | TransportKind::Sse => None,
        }
    }

    /// Environment with `${VAR}` references resolved.
    pub fn expanded_env(&self) -> HashMap<String, String> {
        self.env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_vars(v)))
            .collect()
    }

    /// Headers with `${VAR}` references resolved.
    pub fn expanded_headers(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_vars(v)))
            .collect()
    }

    /// Check required transport fields.
    pub fn validate(&self) -> Result<(), McpError> {
        let invalid = |reason: String| McpError::Config(format!("server '{}': {}", self.name, reason));

        if self.name.trim().is_empty() {
            return Err(McpError::Config("server name must not be empty".to_string()));
        }
        if self.name.chars().any(char::is_whitespace) {
            return Err(invalid("name must not contain whitespace".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(invalid("timeoutMs must be greater than zero".to_string()));
        }

        match self.transport {
            TransportKind::Uvx | TransportKind::Npx | TransportKind::Stdio => {
                if self.command.as_deref().map_or(true, |c| c.trim().is_empty()) {
                    return Err(invalid(format!(
                        "transport '{}' requires 'command'",
                        self.transport
                    )));
                }
            }
            TransportKind::Docker => {
                if self.image.as_deref().map_or(true, |i| i.trim().is_empty()) {
                    return Err(invalid("transport 'docker' requires 'image'".to_string()));
                }
            }
            TransportKind::Http | TransportKind::Https | TransportKind::Sse => {
                let url = self
                    .url
                    .as_deref()
                    .ok_or_else(|| invalid(format!("transport '{}' requires 'url'", self.transport)))?;
                let parsed = reqwest::Url::parse(url)
                    .map_err(|e| invalid(format!("url '{url}' is not valid: {e}")))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(invalid(format!("url '{url}' must start with http:// or https://")));
                }
                if parsed.host_str().map_or(true, str::is_empty) {
                    return Err(invalid(format!("url '{url}' has no host")));
                }
                if self.transport == TransportKind::Https && parsed.scheme() != "https" {
                    return Err(invalid(format!(
                        "transport 'https' requires an https:// url, got '{url}'"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Resolve `${VAR}` references; unknown variables expand to an empty string.
pub fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        result.push_str(&rest[..start]);
        let var_name = &rest[start + 2..start + len];
        result.push_str(&std::env::var(var_name).unwrap_or_default());
        rest = &rest[start + len + 1..];
    }
    result.push_str(rest);
    result
}

/// Delay growth between reconnect attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Fixed,
    #[default]
    Exponential,
}

/// Bounded auto-reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub auto_reconnect: bool,
    pub delay_ms: u64,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub max_delay_ms: u64,
    /// A connection that stays up this long restores the full budget.
    pub stable_after_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            delay_ms: 1_000,
            max_attempts: 3,
            backoff: Backoff::Exponential,
            max_delay_ms: 30_000,
            stable_after_ms: 60_000,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ms = match self.backoff {
            Backoff::Fixed => self.delay_ms,
            Backoff::Exponential => {
                let shift = attempt.saturating_sub(1).min(32);
                self.delay_ms.saturating_mul(1u64 << shift)
            }
        };
        Duration::from_millis(ms.min(self.max_delay_ms.max(self.delay_ms)))
    }

    pub fn stable_after(&self) -> Duration {
        Duration::from_millis(self.stable_after_ms)
    }

    /// Retry budget for one server: failures (failed attempts and channel
    /// deaths) tolerated since the last stable connection.
    pub fn budget_for(&self, server: &RemoteServerConfig) -> u32 {
        server.max_retries.unwrap_or(self.max_attempts)
    }
}

/// How tool names are exposed across servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacePolicy {
    pub enabled: bool,
    pub separator: String,
}

impl Default for NamespacePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            separator: DEFAULT_NAMESPACE_SEPARATOR.to_string(),
        }
    }
}

impl NamespacePolicy {
    /// Flat names; collisions resolve last-registered-wins.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Externally visible name of `tool` owned by `server`.
    pub fn visible_name(&self, server: &str, tool: &str) -> String {
        if self.enabled {
            format!("{server}{}{tool}", self.separator)
        } else {
            tool.to_string()
        }
    }
}

/// Pre-connect security policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityConfig {
    pub enable_startup_scan: bool,
    pub block_on_high_risk: bool,
    pub trust_first_party_servers: bool,
    pub first_party_prefixes: Vec<String>,
    /// Operator overrides keyed by package; final, never downgraded.
    pub overrides: BTreeMap<String, RiskLevel>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_startup_scan: true,
            block_on_high_risk: false,
            trust_first_party_servers: true,
            first_party_prefixes: default_first_party_prefixes(),
            overrides: BTreeMap::new(),
        }
    }
}

/// Package prefixes treated as first-party.
pub fn default_first_party_prefixes() -> Vec<String> {
    vec![
        "@modelcontextprotocol/".to_string(),
        "mcp-server-".to_string(),
    ]
}

/// Everything the manager needs, resolved from all configuration layers.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    pub servers: Vec<RemoteServerConfig>,
    pub reconnect: ReconnectPolicy,
    pub default_timeout_ms: u64,
    pub namespace: NamespacePolicy,
    pub security: SecurityConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            reconnect: ReconnectPolicy::default(),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            namespace: NamespacePolicy::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl ManagerConfig {
    pub fn new(servers: impl IntoIterator<Item = RemoteServerConfig>) -> Self {
        Self {
            servers: servers.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_server(mut self, server: RemoteServerConfig) -> Self {
        self.servers.push(server);
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_namespace(mut self, namespace: NamespacePolicy) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn with_security(mut self, security: SecurityConfig) -> Self {
        self.security = security;
        self
    }

    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    /// Default timeout for tool calls without a per-call override.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Enabled servers, in configuration order.
    pub fn enabled_servers(&self) -> impl Iterator<Item = &RemoteServerConfig> {
        self.servers.iter().filter(|s| s.enabled)
    }

    /// Validate every server and name uniqueness.
    pub fn validate(&self) -> Result<(), McpError> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            server.validate()?;
            if !seen.insert(server.name.as_str()) {
                return Err(McpError::Config(format!(
                    "duplicate server name '{}'",
                    server.name
                )));
            }
        }
        if self.namespace.enabled && self.namespace.separator.is_empty() {
            return Err(McpError::Config(
                "namespaceSeparator must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
