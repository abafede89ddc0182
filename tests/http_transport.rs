// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Unary HTTP transport against a mock server.

use std::io::Write;
use std::time::Duration;

use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;

use tether::mcp::{ConnectionStatus, McpClient, McpError, RemoteServerConfig};

const JSON: &str = "application/json";

fn initialize_body(id: i64) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {"listChanged": true}},
            "serverInfo": {"name": "mock-http", "version": "1.2.3"}
        }
    })
    .to_string()
}

fn tools_body(id: i64) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {"tools": [
            {"name": "search", "description": "Search docs", "inputSchema": {"type": "object"}},
            {"name": "admin_reset", "inputSchema": {"type": "object"}}
        ]}
    })
    .to_string()
}

fn method(name: &str) -> Matcher {
    Matcher::Regex(format!(r#""method":"{name}""#))
}

/// Mocks for a successful handshake; the server assigns session `sess-1`.
async fn mock_handshake(server: &mut ServerGuard) {
    server
        .mock("POST", "/mcp")
        .match_body(method("initialize"))
        .match_header("authorization", "Bearer secret-token")
        .with_status(200)
        .with_header("content-type", JSON)
        .with_header("mcp-session-id", "sess-1")
        .with_body(initialize_body(1))
        .create_async()
        .await;
    server
        .mock("POST", "/mcp")
        .match_body(method("notifications/initialized"))
        .with_status(202)
        .create_async()
        .await;
    server
        .mock("POST", "/mcp")
        .match_body(method("tools/list"))
        .match_header("mcp-session-id", "sess-1")
        .with_status(200)
        .with_header("content-type", JSON)
        .with_body(tools_body(2))
        .create_async()
        .await;
}

fn config(server: &ServerGuard) -> RemoteServerConfig {
    RemoteServerConfig::http("docs", format!("{}/mcp", server.url()))
        .with_bearer_token("secret-token")
        .with_disabled_tools(["admin_reset"])
        .with_timeout_ms(2_000)
}

#[tokio::test]
async fn test_handshake_discovery_and_json_call() {
    let mut server = Server::new_async().await;
    mock_handshake(&mut server).await;
    let call = server
        .mock("POST", "/mcp")
        .match_body(Matcher::AllOf(vec![
            method("tools/call"),
            Matcher::Regex(r#""name":"search""#.to_string()),
        ]))
        .match_header("mcp-session-id", "sess-1")
        .with_status(200)
        .with_header("content-type", JSON)
        .with_body(
            json!({"jsonrpc": "2.0", "id": 3, "result": {"content": [{"type": "text", "text": "found it"}]}})
                .to_string(),
        )
        .create_async()
        .await;

    let client = McpClient::new(config(&server));
    let _events = client.connect().await.unwrap();
    assert_eq!(client.status(), ConnectionStatus::Connected);

    let info = client.server_info().unwrap();
    assert_eq!(info.name, "mock-http");
    assert_eq!(info.version, "1.2.3");

    // Disabled tools never reach the catalog.
    let names: Vec<String> = client.tools().into_iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["search"]);

    let result = client.call_tool("search", json!({"q": "sse"}), None).await.unwrap();
    assert_eq!(result.as_text(), "found it");
    call.assert_async().await;

    client.disconnect().await;
}

#[tokio::test]
async fn test_event_stream_response_body() {
    let mut server = Server::new_async().await;
    mock_handshake(&mut server).await;
    server
        .mock("POST", "/mcp")
        .match_body(method("tools/call"))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(concat!(
            ": keep-alive\n\n",
            "event: message\n",
            "data: {\"jsonrpc\":\"2.0\",\"id\":3,\"result\":{\"content\":[{\"type\":\"text\",\"text\":\"streamed\"}],\"isError\":true}}\n\n",
        ))
        .create_async()
        .await;

    let client = McpClient::new(config(&server));
    let _events = client.connect().await.unwrap();

    let result = client.call_tool("search", json!({}), None).await.unwrap();
    assert_eq!(result.as_text(), "streamed");
    assert!(result.is_error);

    client.disconnect().await;
}

#[tokio::test]
async fn test_remote_error_and_http_failure_leave_channel_usable() {
    let mut server = Server::new_async().await;
    mock_handshake(&mut server).await;
    server
        .mock("POST", "/mcp")
        .match_body(Matcher::AllOf(vec![method("tools/call"), Matcher::Regex(r#""id":3"#.to_string())]))
        .with_status(200)
        .with_header("content-type", JSON)
        .with_body(
            json!({"jsonrpc": "2.0", "id": 3, "error": {"code": -32602, "message": "bad arguments"}}).to_string(),
        )
        .create_async()
        .await;
    server
        .mock("POST", "/mcp")
        .match_body(Matcher::AllOf(vec![method("tools/call"), Matcher::Regex(r#""id":4"#.to_string())]))
        .with_status(500)
        .with_body("upstream exploded")
        .create_async()
        .await;

    let client = McpClient::new(config(&server));
    let _events = client.connect().await.unwrap();

    match client.call_tool("search", json!({}), None).await {
        Err(McpError::Remote { code, message, .. }) => {
            assert_eq!(code, -32602);
            assert_eq!(message, "bad arguments");
        }
        other => panic!("expected remote error, got {other:?}"),
    }

    match client.call_tool("search", json!({}), None).await {
        Err(McpError::Transport { reason, .. }) => {
            assert!(reason.contains("500"), "reason: {reason}");
            assert!(reason.contains("upstream exploded"), "reason: {reason}");
        }
        other => panic!("expected transport error, got {other:?}"),
    }

    // Unary HTTP has no channel to lose.
    assert_eq!(client.status(), ConnectionStatus::Connected);
    assert_eq!(client.pending_requests(), 0);
    client.disconnect().await;
}

/// Answers `tools/call` with "late" after `delay`.
async fn mock_slow_call(server: &mut ServerGuard, delay: Duration) {
    server
        .mock("POST", "/mcp")
        .match_body(method("tools/call"))
        .with_status(200)
        .with_header("content-type", JSON)
        .with_chunked_body(move |w| {
            std::thread::sleep(delay);
            w.write_all(
                json!({"jsonrpc": "2.0", "id": 3, "result": {"content": [{"type": "text", "text": "late"}]}})
                    .to_string()
                    .as_bytes(),
            )
        })
        .create_async()
        .await;
}

#[tokio::test]
async fn test_call_timeout_can_exceed_server_timeout() {
    let mut server = Server::new_async().await;
    mock_handshake(&mut server).await;
    mock_slow_call(&mut server, Duration::from_millis(700)).await;

    let client = McpClient::new(config(&server).with_timeout_ms(300));
    let _events = client.connect().await.unwrap();

    let result = client
        .call_tool("search", json!({}), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(result.as_text(), "late");
    client.disconnect().await;
}

#[tokio::test]
async fn test_slow_response_is_a_timeout() {
    let mut server = Server::new_async().await;
    mock_handshake(&mut server).await;
    mock_slow_call(&mut server, Duration::from_millis(700)).await;

    let client = McpClient::new(config(&server));
    let _events = client.connect().await.unwrap();

    let err = client
        .call_tool("search", json!({}), Some(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::Timeout { .. }), "{err:?}");
    assert_eq!(client.pending_requests(), 0);
    assert_eq!(client.status(), ConnectionStatus::Connected);
    client.disconnect().await;
}

#[tokio::test]
async fn test_failed_handshake_is_a_connect_error() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/mcp")
        .with_status(401)
        .with_body("unauthorized")
        .create_async()
        .await;

    let client = McpClient::new(config(&server));
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, McpError::Connect { .. }));
    assert!(err.to_string().contains("401"), "error: {err}");

    let state = client.state();
    assert_ne!(state.status, ConnectionStatus::Connected);
    assert_eq!(state.retry_count, 1);
}
