// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool, content and server-info types exposed to the hosting server.
//!
//! Remote payloads are parsed leniently: unknown fields are ignored and
//! malformed entries are skipped rather than failing a whole listing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool as exposed to the hosting server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Externally visible name (namespaced when namespacing is on).
    pub name: String,

    pub description: Option<String>,

    /// JSON Schema for tool input.
    pub input_schema: Value,

    /// Server that owns and executes this tool.
    pub owner_server_name: String,

    /// Name the owning server knows the tool by.
    pub remote_name: String,

    /// `readOnlyHint` annotation.
    #[serde(default)]
    pub read_only: bool,

    /// `destructiveHint` annotation.
    #[serde(default)]
    pub destructive: bool,
}

impl ToolDescriptor {
    /// Parse one entry of a `tools/list` result. Visible name starts out
    /// equal to the remote name; the registry applies namespacing.
    pub fn from_listing(server: &str, tool: &Value) -> Option<Self> {
        let name = tool.get("name")?.as_str()?.to_string();
        let annotation = |key: &str| {
            tool.get("annotations")
                .and_then(|a| a.get(key))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        };
        Some(Self {
            name: name.clone(),
            description: tool
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            input_schema: tool
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({ "type": "object" })),
            owner_server_name: server.to_string(),
            remote_name: name,
            read_only: annotation("readOnlyHint"),
            destructive: annotation("destructiveHint"),
        })
    }
}

/// Result of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolResult {
    pub content: Vec<McpContent>,

    /// The tool itself reported failure (distinct from a JSON-RPC error).
    #[serde(default)]
    pub is_error: bool,

    /// `structuredContent`, when the server provides it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl McpToolResult {
    /// Create a text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![McpContent::Text { text: text.into() }],
            is_error: false,
            structured_content: None,
        }
    }

    /// Create a tool-level error result.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::text(message)
        }
    }

    /// Parse a `tools/call` result; unknown content kinds are skipped.
    pub fn from_value(result: &Value) -> Self {
        let content = result
            .get("content")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(McpContent::from_value).collect())
            .unwrap_or_default();

        Self {
            content,
            is_error: result
                .get("isError")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            structured_content: result.get("structuredContent").cloned(),
        }
    }

    /// All text content joined with newlines.
    pub fn as_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                McpContent::Text { text } => Some(text.as_str()),
                McpContent::Resource { text, .. } => text.as_deref(),
                McpContent::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Content returned by a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpContent {
    Text {
        text: String,
    },

    Image {
        /// Base64-encoded image data.
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },

    /// Embedded resource.
    Resource {
        uri: String,
        #[serde(rename = "mimeType")]
        mime_type: Option<String>,
        text: Option<String>,
    },
}

impl McpContent {
    fn from_value(c: &Value) -> Option<Self> {
        match c.get("type")?.as_str()? {
            "text" => Some(Self::Text {
                text: c.get("text")?.as_str()?.to_string(),
            }),
            "image" => Some(Self::Image {
                data: c.get("data")?.as_str()?.to_string(),
                mime_type: c.get("mimeType")?.as_str()?.to_string(),
            }),
            "resource" => {
                let resource = c.get("resource")?;
                Some(Self::Resource {
                    uri: resource.get("uri")?.as_str()?.to_string(),
                    mime_type: resource
                        .get("mimeType")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    text: resource
                        .get("text")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })
            }
            _ => None,
        }
    }
}

/// Capabilities a server advertised in its `initialize` result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub tools: bool,
    /// Whether the server sends `notifications/tools/list_changed`.
    pub tools_list_changed: bool,
    pub resources: bool,
    pub prompts: bool,
    pub logging: bool,
}

impl ServerCapabilities {
    fn from_value(caps: &Value) -> Self {
        let has = |key: &str| caps.get(key).is_some_and(|v| !v.is_null());
        Self {
            tools: has("tools"),
            tools_list_changed: caps
                .get("tools")
                .and_then(|t| t.get("listChanged"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
            resources: has("resources"),
            prompts: has("prompts"),
            logging: has("logging"),
        }
    }
}

/// Server identity from the `initialize` handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub capabilities: ServerCapabilities,
    pub protocol_version: Option<String>,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
            version: "0.0.0".to_string(),
            capabilities: ServerCapabilities::default(),
            protocol_version: None,
        }
    }
}

impl ServerInfo {
    /// Parse an `initialize` result.
    pub fn from_initialize(result: &Value) -> Self {
        let info = result.get("serverInfo");
        let field = |key: &str, default: &str| {
            info.and_then(|i| i.get(key))
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };
        Self {
            name: field("name", "unknown"),
            version: field("version", "0.0.0"),
            capabilities: result
                .get("capabilities")
                .map(ServerCapabilities::from_value)
                .unwrap_or_default(),
            protocol_version: result
                .get("protocolVersion")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}
