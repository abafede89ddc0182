// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! JSON-RPC 2.0 wire messages.
//!
//! Every envelope that crosses a transport boundary is validated into one of
//! three shapes before the rest of the subsystem sees it:
//!
//! | `id` | `method` | shape          |
//! |------|----------|----------------|
//! | yes  | yes      | `Request`      |
//! | no   | yes      | `Notification` |
//! | yes  | no       | `Response`     |
//!
//! A response carries exactly one of `result` / `error`.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::error::McpError;

/// Protocol version tag carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Correlation ID of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        Self::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::String(id.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// Error object of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// A call that expects a response.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

/// A one-way message; never answered, never timed out.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

/// The answer to a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: RequestId,
    pub outcome: Result<Value, JsonRpcError>,
}

/// A validated JSON-RPC envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMessage", into = "RawMessage")]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

impl Message {
    /// Build a request.
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request(Request {
            id: id.into(),
            method: method.into(),
            params,
        })
    }

    /// Build a notification.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification(Notification {
            method: method.into(),
            params,
        })
    }

    /// Build a successful response.
    pub fn result(id: impl Into<RequestId>, result: Value) -> Self {
        Self::Response(Response {
            id: id.into(),
            outcome: Ok(result),
        })
    }

    /// Build an error response.
    pub fn error(id: impl Into<RequestId>, error: JsonRpcError) -> Self {
        Self::Response(Response {
            id: id.into(),
            outcome: Err(error),
        })
    }

    /// Parse and validate one envelope from text.
    pub fn parse(text: &str) -> Result<Self, McpError> {
        serde_json::from_str(text).map_err(|e| McpError::InvalidMessage(e.to_string()))
    }

    /// Validate an already-decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, McpError> {
        serde_json::from_value(value).map_err(|e| McpError::InvalidMessage(e.to_string()))
    }

    /// Serialize to a single line (no embedded newlines).
    pub fn to_line(&self) -> Result<String, McpError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The correlation ID, if this message has one.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(r) => Some(&r.id),
            Self::Response(r) => Some(&r.id),
            Self::Notification(_) => None,
        }
    }

    /// The method name, if this message has one.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) => None,
        }
    }
}

/// Loosely-typed envelope used only at the serde boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawMessage {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    // `null` is a legal result, so absence and null must stay distinguishable.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl TryFrom<RawMessage> for Message {
    type Error = McpError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        match raw.jsonrpc.as_deref() {
            Some(JSONRPC_VERSION) => {}
            Some(other) => {
                return Err(McpError::InvalidMessage(format!(
                    "unsupported jsonrpc version '{other}'"
                )))
            }
            None => return Err(McpError::InvalidMessage("missing jsonrpc version".to_string())),
        }

        match (raw.id, raw.method) {
            (Some(id), Some(method)) => {
                if raw.result.is_some() || raw.error.is_some() {
                    return Err(McpError::InvalidMessage(format!(
                        "request '{method}' carries a result or error"
                    )));
                }
                Ok(Self::Request(Request {
                    id,
                    method,
                    params: raw.params,
                }))
            }
            (None, Some(method)) => Ok(Self::Notification(Notification {
                method,
                params: raw.params,
            })),
            (Some(id), None) => {
                let outcome = match (raw.result, raw.error) {
                    (Some(result), None) => Ok(result),
                    (None, Some(error)) => Err(error),
                    (Some(_), Some(_)) => {
                        return Err(McpError::InvalidMessage(format!(
                            "response {id} carries both result and error"
                        )))
                    }
                    (None, None) => {
                        return Err(McpError::InvalidMessage(format!(
                            "response {id} carries neither result nor error"
                        )))
                    }
                };
                Ok(Self::Response(Response { id, outcome }))
            }
            (None, None) => Err(McpError::InvalidMessage(
                "message has neither id nor method".to_string(),
            )),
        }
    }
}

impl From<Message> for RawMessage {
    fn from(message: Message) -> Self {
        let mut raw = RawMessage {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            ..Default::default()
        };
        match message {
            Message::Request(r) => {
                raw.id = Some(r.id);
                raw.method = Some(r.method);
                raw.params = r.params;
            }
            Message::Notification(n) => {
                raw.method = Some(n.method);
                raw.params = n.params;
            }
            Message::Response(r) => {
                raw.id = Some(r.id);
                match r.outcome {
                    Ok(result) => raw.result = Some(result),
                    Err(error) => raw.error = Some(error),
                }
            }
        }
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classifies_by_id_and_method() {
        let req = Message::parse(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).unwrap();
        assert!(matches!(req, Message::Request(ref r) if r.method == "tools/list"));

        let note = Message::parse(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .unwrap();
        assert!(matches!(note, Message::Notification(_)));
        assert!(note.id().is_none());

        let resp = Message::parse(r#"{"jsonrpc":"2.0","id":"abc","result":{"ok":true}}"#).unwrap();
        match resp {
            Message::Response(r) => {
                assert_eq!(r.id, RequestId::from("abc"));
                assert_eq!(r.outcome.unwrap(), json!({"ok": true}));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_null_result_is_a_result() {
        let msg = Message::parse(r#"{"jsonrpc":"2.0","id":7,"result":null}"#).unwrap();
        match msg {
            Message::Response(r) => assert_eq!(r.outcome, Ok(Value::Null)),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_error_response() {
        let msg = Message::parse(
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"no such method"}}"#,
        )
        .unwrap();
        match msg {
            Message::Response(r) => {
                let err = r.outcome.unwrap_err();
                assert_eq!(err.code, -32601);
                assert_eq!(err.message, "no such method");
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_malformed_envelopes() {
        let cases = [
            r#"{"id":1,"result":{}}"#,
            r#"{"jsonrpc":"1.0","id":1,"result":{}}"#,
            r#"{"jsonrpc":"2.0","id":1,"result":{},"error":{"code":1,"message":"x"}}"#,
            r#"{"jsonrpc":"2.0","id":1}"#,
            r#"{"jsonrpc":"2.0"}"#,
            r#"{"jsonrpc":"2.0","id":1,"method":"x","result":{}}"#,
            "not json",
        ];
        for case in cases {
            let err = Message::parse(case).unwrap_err();
            assert!(matches!(err, McpError::InvalidMessage(_)), "{case}");
        }
    }

    #[test]
    fn test_serializes_only_present_fields() {
        let line = Message::notification("notifications/initialized", None)
            .to_line()
            .unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"})
        );

        let line = Message::result(3i64, Value::Null).to_line().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "id": 3, "result": null}));
    }

    #[test]
    fn test_request_line_has_no_newline() {
        let msg = Message::request(1i64, "tools/call", Some(json!({"text": "a\nb"})));
        let line = msg.to_line().unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(Message::parse(&line).unwrap(), msg);
    }
}
