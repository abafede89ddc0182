// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! [`WorkspaceConfig`] is one file's worth of settings, every field
//! optional so layers can be merged. [`ResolvedConfig`] is the merged result
//! with defaults filled in.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::mcp::config::{
    default_first_party_prefixes, Backoff, ManagerConfig, NamespacePolicy, ReconnectPolicy,
    RemoteServerConfig, SecurityConfig, DEFAULT_TIMEOUT_MS,
};
use crate::mcp::security::RiskLevel;

/// One configuration file.
///
/// Can be defined in `tether.json`, `.tether.json`, `.tether/config.json`
/// or `tether.yaml` in the workspace root, in `~/.tether/config.json`, or in
/// `.tether.local.json` for personal overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    /// Remote servers; merged with other layers by name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub servers: Option<Vec<RemoteServerConfig>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_reconnect: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_delay_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_reconnect_attempts: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_backoff: Option<Backoff>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_reconnect_delay_ms: Option<u64>,

    /// Uptime after which a connection's retry budget is restored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_stable_ms: Option<u64>,

    /// Tool call timeout when the caller gives none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_timeout_ms: Option<u64>,

    /// Prefix tool names with their server name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_tools: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_separator: Option<String>,

    /// Log filter directive (e.g. `debug`, `tether=trace`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityConfigPartial>,
}

/// Security settings as written in a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityConfigPartial {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_startup_scan: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_on_high_risk: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_first_party_servers: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_party_prefixes: Option<Vec<String>>,

    /// Fixed risk level per package
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overrides: Option<BTreeMap<String, RiskLevel>>,
}

/// Fully resolved configuration with all defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub servers: Vec<RemoteServerConfig>,
    pub reconnect: ReconnectPolicy,
    pub default_timeout_ms: u64,
    pub namespace: NamespacePolicy,
    pub security: SecurityConfig,
    pub log_level: Option<String>,
    /// Files that contributed, lowest precedence first.
    pub sources: Vec<PathBuf>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            reconnect: ReconnectPolicy::default(),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            namespace: NamespacePolicy::default(),
            security: SecurityConfig::default(),
            log_level: None,
            sources: Vec::new(),
        }
    }
}

impl ResolvedConfig {
    /// Settings handed to the remote server manager.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            servers: self.servers.clone(),
            reconnect: self.reconnect,
            default_timeout_ms: self.default_timeout_ms,
            namespace: self.namespace.clone(),
            security: self.security.clone(),
        }
    }

    /// The resolved values written back out as a fully populated file.
    pub fn to_workspace_config(&self) -> WorkspaceConfig {
        WorkspaceConfig {
            servers: Some(self.servers.clone()),
            auto_reconnect: Some(self.reconnect.auto_reconnect),
            reconnect_delay_ms: Some(self.reconnect.delay_ms),
            max_reconnect_attempts: Some(self.reconnect.max_attempts),
            reconnect_backoff: Some(self.reconnect.backoff),
            max_reconnect_delay_ms: Some(self.reconnect.max_delay_ms),
            reconnect_stable_ms: Some(self.reconnect.stable_after_ms),
            default_timeout_ms: Some(self.default_timeout_ms),
            namespace_tools: Some(self.namespace.enabled),
            namespace_separator: Some(self.namespace.separator.clone()),
            log_level: self.log_level.clone(),
            security: Some(SecurityConfigPartial {
                enable_startup_scan: Some(self.security.enable_startup_scan),
                block_on_high_risk: Some(self.security.block_on_high_risk),
                trust_first_party_servers: Some(self.security.trust_first_party_servers),
                first_party_prefixes: Some(self.security.first_party_prefixes.clone()),
                overrides: Some(self.security.overrides.clone()),
            }),
        }
    }
}

impl SecurityConfigPartial {
    /// Defaults written by `tether init`.
    pub fn defaults() -> Self {
        Self {
            enable_startup_scan: Some(true),
            block_on_high_risk: Some(false),
            trust_first_party_servers: Some(true),
            first_party_prefixes: Some(default_first_party_prefixes()),
            overrides: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::config::TransportKind;

    #[test]
    fn test_parse_full_file() {
        let json = r#"{
            "servers": [
                {"name": "fs", "transport": "process-npx", "command": "@modelcontextprotocol/server-filesystem"},
                {"name": "remote", "transport": "sse", "url": "https://mcp.example.com/sse"}
            ],
            "autoReconnect": false,
            "reconnectDelayMs": 250,
            "reconnectBackoff": "fixed",
            "namespaceTools": false,
            "security": {
                "blockOnHighRisk": true,
                "overrides": {"sketchy-pkg": "RED", "vetted-pkg": "green"}
            }
        }"#;

        let config: WorkspaceConfig = serde_json::from_str(json).unwrap();
        let servers = config.servers.unwrap();
        assert_eq!(servers[0].transport, TransportKind::Npx);
        assert_eq!(servers[1].transport, TransportKind::Sse);
        assert_eq!(config.auto_reconnect, Some(false));
        assert_eq!(config.reconnect_backoff, Some(Backoff::Fixed));
        assert_eq!(config.namespace_tools, Some(false));

        let security = config.security.unwrap();
        assert_eq!(security.block_on_high_risk, Some(true));
        let overrides = security.overrides.unwrap();
        assert_eq!(overrides["sketchy-pkg"], RiskLevel::Red);
        assert_eq!(overrides["vetted-pkg"], RiskLevel::Green);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = "
servers:
  - name: fetch
    transport: uvx
    command: mcp-server-fetch==0.6.2
    maxRetries: 5
defaultTimeoutMs: 10000
";
        let config: WorkspaceConfig = serde_yaml::from_str(yaml).unwrap();
        let servers = config.servers.unwrap();
        assert_eq!(servers[0].max_retries, Some(5));
        assert_eq!(config.default_timeout_ms, Some(10_000));
    }

    #[test]
    fn test_resolved_defaults() {
        let config = ResolvedConfig::default();
        assert!(config.reconnect.auto_reconnect);
        assert_eq!(config.reconnect.delay_ms, 1_000);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.default_timeout_ms, DEFAULT_TIMEOUT_MS);
        assert!(config.namespace.enabled);
        assert!(config.security.enable_startup_scan);
        assert!(!config.security.block_on_high_risk);
    }

    #[test]
    fn test_round_trip_through_workspace_form() {
        let mut resolved = ResolvedConfig::default();
        resolved.servers.push(RemoteServerConfig::http("api", "http://localhost:8080/mcp"));
        let written = serde_json::to_string(&resolved.to_workspace_config()).unwrap();
        let parsed: WorkspaceConfig = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed.servers.unwrap()[0].name, "api");
        assert_eq!(parsed.namespace_separator.as_deref(), Some("__"));
    }
}
