// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tether - remote MCP connectivity.
//!
//! Connects to external Model Context Protocol tool servers, whether spawned
//! locally through `uvx`, `npx` or `docker` or reached over HTTP and SSE,
//! and presents their tools as one namespaced catalog.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`mcp`] - Transports, client sessions, the server manager and the security gate
//! - [`config`] - Configuration loading and merging
//! - [`error`] - Error types and result aliases
//! - [`telemetry`] - Tracing, metrics, and observability infrastructure
//!
//! # Example
//!
//! ```rust,ignore
//! use tether::config::{load_config, CliOptions};
//! use tether::mcp::RemoteServerManager;
//!
//! let config = load_config(Path::new("."), CliOptions::default())?;
//! let manager = RemoteServerManager::new(config.manager_config())?;
//! manager.initialize().await?;
//! ```

pub mod config;
pub mod error;
pub mod mcp;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use error::{ConfigError, McpError, Result};
pub use mcp::{
    ManagerConfig, McpToolResult, RemoteServerConfig, RemoteServerManager, ServerEvent,
    ServerStatus, ToolDescriptor, TransportKind,
};

/// Tether version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
