// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Remote MCP connectivity.
//!
//! Connects a hosting server to remote Model Context Protocol servers,
//! aggregates their tools and routes tool calls back to their owners.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     RemoteServerManager                      │
//! │   SecurityGate ─► policy     ToolRegistry     EventBus       │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐           │
//! │  │ McpClient   │  │ McpClient   │  │ McpClient   │  ...      │
//! │  │ + Correlator│  │ + Correlator│  │ + Correlator│           │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘           │
//! └─────────┼────────────────┼────────────────┼──────────────────┘
//!           │                │                │
//!     ┌─────▼─────┐    ┌─────▼─────┐    ┌─────▼─────┐
//!     │  Process  │    │   HTTP    │    │    SSE    │
//!     │ uvx / npx │    │  (unary)  │    │ (stream)  │
//!     │  docker   │    │           │    │           │
//!     └───────────┘    └───────────┘    └───────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use tether::mcp::{ManagerConfig, RemoteServerConfig, RemoteServerManager};
//!
//! let config = ManagerConfig::new([
//!     RemoteServerConfig::npx("fs", "@modelcontextprotocol/server-filesystem@2025.1.14")
//!         .with_args(["/tmp"]),
//!     RemoteServerConfig::sse("search", "https://search.example.com/mcp"),
//! ]);
//!
//! let manager = RemoteServerManager::new(config)?;
//! manager.initialize().await?;
//!
//! for tool in manager.list_tools() {
//!     println!("{} ({})", tool.name, tool.owner_server_name);
//! }
//! let result = manager.call_tool("fs__read_file", json!({"path": "/tmp/a"}), None).await?;
//! manager.shutdown().await;
//! ```

pub mod client;
pub mod config;
pub mod correlator;
pub mod error;
pub mod events;
pub mod manager;
pub mod message;
pub mod registry;
pub mod security;
pub mod state;
pub mod transport;
pub mod types;

pub use client::{ClientEvent, McpClient};
pub use config::{
    AuthConfig, Backoff, ManagerConfig, NamespacePolicy, ReconnectPolicy, RemoteServerConfig,
    SecurityConfig, TransportKind,
};
pub use correlator::Correlator;
pub use error::{McpError, McpResult};
pub use events::{EventBus, ServerEvent};
pub use manager::{ManagerBuilder, RemoteServerManager, ScanReport, ServerStatus};
pub use message::{JsonRpcError, Message, RequestId};
pub use registry::{ToolCollision, ToolRegistry};
pub use security::{PatternScanner, RiskLevel, SecurityGate, SecurityPolicy, SecurityVerdict};
pub use state::{ConnectionState, ConnectionStatus};
pub use transport::{Transport, TransportEvent, TransportFactory};
pub use types::{McpContent, McpToolResult, ServerCapabilities, ServerInfo, ToolDescriptor};
