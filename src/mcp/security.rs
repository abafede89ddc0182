// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Pre-connect security gate for process transports.
//!
//! The manager asks a [`SecurityGate`] for a verdict on every package it is
//! about to execute, then runs the verdict through the operator's
//! [`SecurityPolicy`]:
//!
//! 1. an explicit per-package override replaces the level outright
//! 2. otherwise first-party packages are downgraded one level
//!
//! Only a RED verdict under `blockOnHighRisk` stops startup.

use std::fmt;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::config::{SecurityConfig, TransportKind};
use super::error::McpResult;

/// Risk classification of a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[serde(alias = "GREEN")]
    Green,
    #[serde(alias = "YELLOW")]
    Yellow,
    #[serde(alias = "RED")]
    Red,
}

impl RiskLevel {
    /// One level less severe; GREEN stays GREEN.
    pub fn downgrade(self) -> Self {
        match self {
            Self::Red => Self::Yellow,
            Self::Yellow | Self::Green => Self::Green,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Green => "GREEN",
            Self::Yellow => "YELLOW",
            Self::Red => "RED",
        })
    }
}

/// Outcome of scanning one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityVerdict {
    pub level: RiskLevel,
    pub red_flags: Vec<String>,
    pub yellow_flags: Vec<String>,
    pub scanned_files: usize,
    /// How the policy changed the scanned level, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjustment: Option<String>,
}

impl SecurityVerdict {
    /// A clean verdict.
    pub fn green() -> Self {
        Self::from_flags(Vec::new(), Vec::new(), 0)
    }

    /// Level derived from the most severe flag present.
    pub fn from_flags(red_flags: Vec<String>, yellow_flags: Vec<String>, scanned_files: usize) -> Self {
        let level = if !red_flags.is_empty() {
            RiskLevel::Red
        } else if !yellow_flags.is_empty() {
            RiskLevel::Yellow
        } else {
            RiskLevel::Green
        };
        Self {
            level,
            red_flags,
            yellow_flags,
            scanned_files,
            adjustment: None,
        }
    }

    /// Verdict used when the scanner itself failed.
    pub fn scan_failed(reason: impl fmt::Display) -> Self {
        Self::from_flags(Vec::new(), vec![format!("scan failed: {reason}")], 0)
    }

    /// Red flags first, then yellow.
    pub fn flags(&self) -> Vec<String> {
        self.red_flags
            .iter()
            .chain(self.yellow_flags.iter())
            .cloned()
            .collect()
    }
}

/// Produces a risk verdict for a package before it is executed.
///
/// May be slow (network or filesystem work); the manager never lets one
/// server's scan hold up another server's startup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecurityGate: Send + Sync {
    async fn scan(&self, package: &str, transport: TransportKind) -> McpResult<SecurityVerdict>;
}

/// Operator policy layered over raw verdicts.
#[derive(Debug, Clone, Default)]
pub struct SecurityPolicy {
    config: SecurityConfig,
}

impl SecurityPolicy {
    pub fn new(config: SecurityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Whether `package` matches a first-party prefix.
    pub fn is_first_party(&self, package: &str) -> bool {
        self.config
            .first_party_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && package.starts_with(prefix.as_str()))
    }

    /// Apply overrides and the trust list to a scanned verdict.
    pub fn apply(&self, package: &str, mut verdict: SecurityVerdict) -> SecurityVerdict {
        if let Some(&level) = self.config.overrides.get(package) {
            if level != verdict.level {
                verdict.adjustment = Some(format!("overridden from {} by operator", verdict.level));
            }
            verdict.level = level;
            return verdict;
        }

        if self.config.trust_first_party_servers
            && verdict.level != RiskLevel::Green
            && self.is_first_party(package)
        {
            let original = verdict.level;
            verdict.level = original.downgrade();
            verdict.adjustment = Some(format!("downgraded from {original} (first-party)"));
        }
        verdict
    }

    /// Whether this (already adjusted) verdict must stop startup.
    pub fn blocks(&self, verdict: &SecurityVerdict) -> bool {
        self.config.block_on_high_risk && verdict.level == RiskLevel::Red
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// uvx and npx package identifiers.
    Packages,
    Npm,
    Python,
    Docker,
    /// Every process transport, raw commands included.
    Any,
}

impl Scope {
    fn covers(self, transport: TransportKind) -> bool {
        match self {
            Self::Packages => matches!(transport, TransportKind::Uvx | TransportKind::Npx),
            Self::Npm => transport == TransportKind::Npx,
            Self::Python => transport == TransportKind::Uvx,
            Self::Docker => transport == TransportKind::Docker,
            Self::Any => transport.is_process(),
        }
    }
}

struct RuleSpec {
    level: RiskLevel,
    scope: Scope,
    pattern: &'static str,
    /// Flag when the pattern matches (`true`) or when it does not (`false`).
    flag_on_match: bool,
    flag: &'static str,
}

const RULE_SPECS: &[RuleSpec] = &[
    RuleSpec {
        level: RiskLevel::Red,
        scope: Scope::Packages,
        pattern: r"^(git\+|git://|ssh://|https?://|github:|gitlab:|bitbucket:)",
        flag_on_match: true,
        flag: "installs from a remote source instead of a registry",
    },
    RuleSpec {
        level: RiskLevel::Red,
        scope: Scope::Packages,
        pattern: r"^(file:|\.{1,2}/|/|~)",
        flag_on_match: true,
        flag: "installs from a local path",
    },
    RuleSpec {
        level: RiskLevel::Red,
        scope: Scope::Any,
        pattern: r"[;&|`<>]|\$\(",
        flag_on_match: true,
        flag: "contains shell metacharacters",
    },
    RuleSpec {
        level: RiskLevel::Red,
        scope: Scope::Any,
        pattern: r"(^|/)\.\.(/|$)",
        flag_on_match: true,
        flag: "contains path traversal",
    },
    RuleSpec {
        level: RiskLevel::Yellow,
        scope: Scope::Npm,
        pattern: r"^(@[A-Za-z0-9._-]+/)?[A-Za-z0-9._-]+@\d",
        flag_on_match: false,
        flag: "npm package version is not pinned",
    },
    RuleSpec {
        level: RiskLevel::Yellow,
        scope: Scope::Python,
        pattern: r"^[A-Za-z0-9._-]+(\[[A-Za-z0-9,._-]+\])?(==|@)\d",
        flag_on_match: false,
        flag: "python package version is not pinned",
    },
    RuleSpec {
        level: RiskLevel::Yellow,
        scope: Scope::Docker,
        pattern: r"(@sha256:[0-9a-f]{64}|:[A-Za-z0-9._-]+)$",
        flag_on_match: false,
        flag: "image tag is not pinned",
    },
    RuleSpec {
        level: RiskLevel::Yellow,
        scope: Scope::Packages,
        pattern: r"@latest$",
        flag_on_match: true,
        flag: "uses the 'latest' tag",
    },
    RuleSpec {
        level: RiskLevel::Yellow,
        scope: Scope::Docker,
        pattern: r":latest$",
        flag_on_match: true,
        flag: "uses the 'latest' tag",
    },
];

struct Rule {
    spec: &'static RuleSpec,
    regex: Regex,
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    RULE_SPECS
        .iter()
        .filter_map(|spec| Regex::new(spec.pattern).ok().map(|regex| Rule { spec, regex }))
        .collect()
});

/// Heuristic scanner over the package identifier itself.
///
/// Flags remote or local sources, shell metacharacters and path traversal
/// as RED; unpinned versions and `latest` tags as YELLOW.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternScanner;

impl PatternScanner {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous scan used by the async gate.
    pub fn classify(&self, package: &str, transport: TransportKind) -> SecurityVerdict {
        let package = package.trim();
        let mut red = Vec::new();
        let mut yellow = Vec::new();

        for rule in RULES.iter().filter(|r| r.spec.scope.covers(transport)) {
            if rule.regex.is_match(package) != rule.spec.flag_on_match {
                continue;
            }
            let flags = match rule.spec.level {
                RiskLevel::Red => &mut red,
                _ => &mut yellow,
            };
            flags.push(rule.spec.flag.to_string());
        }

        SecurityVerdict::from_flags(red, yellow, 0)
    }
}

#[async_trait]
impl SecurityGate for PatternScanner {
    async fn scan(&self, package: &str, transport: TransportKind) -> McpResult<SecurityVerdict> {
        Ok(self.classify(package, transport))
    }
}
