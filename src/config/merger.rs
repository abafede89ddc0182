// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use super::types::{ResolvedConfig, SecurityConfigPartial, WorkspaceConfig};
use crate::mcp::config::RemoteServerConfig;

/// CLI options that can override configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub auto_reconnect: Option<bool>,
    pub block_on_high_risk: Option<bool>,
    pub namespace_tools: Option<bool>,
    pub default_timeout_ms: Option<u64>,
    pub log_level: Option<String>,
}

/// Default configuration values.
pub fn default_config() -> ResolvedConfig {
    ResolvedConfig::default()
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options
/// 2. Local config (.tether.local.json)
/// 3. Workspace config (tether.json and friends)
/// 4. Global config (~/.tether/config.json)
/// 5. Default values
pub fn merge_config(
    global: Option<WorkspaceConfig>,
    workspace: Option<WorkspaceConfig>,
    local: Option<WorkspaceConfig>,
    cli: CliOptions,
) -> ResolvedConfig {
    let mut result = default_config();

    for config in [global, workspace, local].into_iter().flatten() {
        apply_workspace_config(&mut result, config);
    }

    // Apply CLI options (highest precedence)
    apply_cli_options(&mut result, &cli);

    result
}

fn apply_workspace_config(result: &mut ResolvedConfig, config: WorkspaceConfig) {
    if let Some(servers) = config.servers {
        merge_servers(&mut result.servers, servers);
    }

    let reconnect = &mut result.reconnect;
    if let Some(auto) = config.auto_reconnect {
        reconnect.auto_reconnect = auto;
    }
    if let Some(delay) = config.reconnect_delay_ms {
        reconnect.delay_ms = delay;
    }
    if let Some(max) = config.max_reconnect_attempts {
        reconnect.max_attempts = max;
    }
    if let Some(backoff) = config.reconnect_backoff {
        reconnect.backoff = backoff;
    }
    if let Some(max_delay) = config.max_reconnect_delay_ms {
        reconnect.max_delay_ms = max_delay;
    }
    if let Some(stable) = config.reconnect_stable_ms {
        reconnect.stable_after_ms = stable;
    }

    if let Some(timeout) = config.default_timeout_ms {
        result.default_timeout_ms = timeout;
    }
    if let Some(enabled) = config.namespace_tools {
        result.namespace.enabled = enabled;
    }
    if let Some(separator) = config.namespace_separator {
        result.namespace.separator = separator;
    }
    if config.log_level.is_some() {
        result.log_level = config.log_level;
    }

    if let Some(security) = config.security {
        apply_security(result, security);
    }
}

/// A later server with the same name replaces the earlier one in place;
/// new names are appended in order.
fn merge_servers(existing: &mut Vec<RemoteServerConfig>, incoming: Vec<RemoteServerConfig>) {
    for server in incoming {
        match existing.iter_mut().find(|s| s.name == server.name) {
            Some(slot) => *slot = server,
            None => existing.push(server),
        }
    }
}

fn apply_security(result: &mut ResolvedConfig, security: SecurityConfigPartial) {
    let target = &mut result.security;
    if let Some(scan) = security.enable_startup_scan {
        target.enable_startup_scan = scan;
    }
    if let Some(block) = security.block_on_high_risk {
        target.block_on_high_risk = block;
    }
    if let Some(trust) = security.trust_first_party_servers {
        target.trust_first_party_servers = trust;
    }
    if let Some(prefixes) = security.first_party_prefixes {
        target.first_party_prefixes = prefixes;
    }
    if let Some(overrides) = security.overrides {
        // Per package, so layers can add to each other.
        target.overrides.extend(overrides);
    }
}

fn apply_cli_options(result: &mut ResolvedConfig, cli: &CliOptions) {
    if let Some(auto) = cli.auto_reconnect {
        result.reconnect.auto_reconnect = auto;
    }
    if let Some(block) = cli.block_on_high_risk {
        result.security.block_on_high_risk = block;
    }
    if let Some(enabled) = cli.namespace_tools {
        result.namespace.enabled = enabled;
    }
    if let Some(timeout) = cli.default_timeout_ms {
        result.default_timeout_ms = timeout;
    }
    if cli.log_level.is_some() {
        result.log_level = cli.log_level.clone();
    }
}
