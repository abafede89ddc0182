// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! MCP error types.
//!
//! Per-request failures (`Timeout`, `Remote`) only ever reach the caller of
//! that request. Per-channel failures (`ChannelClosed`) are fanned out to every
//! request pending on the dead channel. `Connect` feeds the reconnect state
//! machine and `SecurityBlocked` is only fatal under `blockOnHighRisk`.

use thiserror::Error;

/// Errors that can occur during remote MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Handshake, spawn, or configuration failure while establishing a channel.
    #[error("Failed to connect to MCP server '{server}': {reason}")]
    Connect { server: String, reason: String },

    /// A single request exceeded its deadline.
    #[error("Request '{method}' to MCP server '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    /// The underlying channel died while the request was outstanding.
    #[error("Channel to MCP server '{server}' closed{}: {reason}", exit_suffix(.code))]
    ChannelClosed {
        server: String,
        code: Option<i32>,
        reason: String,
    },

    /// The tool name does not resolve to a connected owner.
    #[error("Tool not found: {tool} ({reason})")]
    ToolNotFound { tool: String, reason: String },

    /// The pre-connect security gate refused a package.
    #[error("MCP server '{server}' blocked by security policy: package '{package}' is high risk ({})", .flags.join("; "))]
    SecurityBlocked {
        server: String,
        package: String,
        flags: Vec<String>,
    },

    /// The remote server answered with a JSON-RPC error object.
    #[error("Remote error from '{server}': code={code}, message={message}")]
    Remote {
        server: String,
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Server not registered with the manager.
    #[error("MCP server not found: {0}")]
    ServerNotFound(String),

    /// Server has no open channel.
    #[error("MCP server '{0}' is not connected")]
    NotConnected(String),

    /// A wire message failed validation.
    #[error("Invalid JSON-RPC message: {0}")]
    InvalidMessage(String),

    /// Transport-level failure on a single exchange.
    #[error("Transport error on '{server}': {reason}")]
    Transport { server: String, reason: String },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A server with this name is already registered.
    #[error("MCP server '{0}' is already registered")]
    AlreadyRegistered(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" (exit code {code})"),
        None => String::new(),
    }
}

impl McpError {
    /// Create a connect error.
    pub fn connect(server: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connect {
            server: server.into(),
            reason: reason.into(),
        }
    }

    /// Create a channel-closed error.
    pub fn channel_closed(
        server: impl Into<String>,
        code: Option<i32>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ChannelClosed {
            server: server.into(),
            code,
            reason: reason.into(),
        }
    }

    /// Create a tool-not-found error.
    pub fn tool_not_found(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ToolNotFound {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(server: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            server: server.into(),
            reason: reason.into(),
        }
    }

    /// Create a remote JSON-RPC error.
    pub fn remote(
        server: impl Into<String>,
        code: i64,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self::Remote {
            server: server.into(),
            code,
            message: message.into(),
            data,
        }
    }

    /// Check if retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::ChannelClosed { .. }
                | Self::NotConnected(_)
                | Self::Transport { .. }
        )
    }

    /// Check if the error means the channel itself is gone.
    pub fn is_channel_failure(&self) -> bool {
        matches!(self, Self::ChannelClosed { .. } | Self::Connect { .. })
    }

    /// JSON-RPC error code the hosting server can surface to its own clients.
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            Self::Remote { code, .. } => *code,
            Self::ToolNotFound { .. } | Self::ServerNotFound(_) => error_codes::METHOD_NOT_FOUND,
            Self::InvalidMessage(_) | Self::Json(_) => error_codes::PARSE_ERROR,
            Self::Timeout { .. } => error_codes::REQUEST_TIMEOUT,
            Self::Config(_) => error_codes::INVALID_PARAMS,
            _ => error_codes::INTERNAL_ERROR,
        }
    }
}

/// Result type for MCP operations.
pub type McpResult<T> = std::result::Result<T, McpError>;

/// JSON-RPC error codes used on the wire.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist / is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameter(s).
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// MCP request timeout.
    pub const REQUEST_TIMEOUT: i64 = -32001;
}
