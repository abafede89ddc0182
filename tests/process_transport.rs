// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process transport against real child processes.
//!
//! The servers are small `sh` scripts speaking line-delimited JSON-RPC, so
//! these tests only need a POSIX shell.

#![cfg(unix)]

use std::path::Path;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio::sync::broadcast;

use tether::mcp::{
    Backoff, ConnectionStatus, ManagerConfig, McpClient, McpError, ReconnectPolicy,
    RemoteServerConfig, RemoteServerManager, SecurityConfig, ServerEvent,
};

/// Answers the handshake, lists `echo`, `slow` and `crash`, and appends one
/// line to `$1` every time it starts. `echo` answers, `slow` never does and
/// `crash` makes the process exit with code 3. With a second argument the
/// server refuses to come back: every start after the first exits at once.
const SCRIPT: &str = r#"
echo start >> "$1"
if [ -n "$2" ] && [ $(wc -l < "$1") -gt 1 ]; then
  echo "refusing to restart" >&2
  exit 1
fi
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"sh-server","version":"0.0.1"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","inputSchema":{"type":"object"}},{"name":"slow","inputSchema":{"type":"object"}},{"name":"crash","inputSchema":{"type":"object"}}]}}\n' "$id" ;;
    *'"name":"crash"'*)
      echo "crashing on purpose" >&2
      exit 3 ;;
    *'"name":"slow"'*) ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong"}]}}\n' "$id" ;;
  esac
done
"#;

fn script_server(name: &str, starts: &Path, refuse_restart: bool) -> RemoteServerConfig {
    let mut args = vec![
        "-c".to_string(),
        SCRIPT.to_string(),
        "sh-server".to_string(),
        starts.display().to_string(),
    ];
    if refuse_restart {
        args.push("refuse".to_string());
    }
    RemoteServerConfig::stdio(name, "sh")
        .with_args(args)
        .with_timeout_ms(5_000)
}

fn starts(path: &Path) -> usize {
    std::fs::read_to_string(path)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

fn quiet_security() -> SecurityConfig {
    SecurityConfig {
        enable_startup_scan: false,
        ..SecurityConfig::default()
    }
}

async fn next_event(events: &mut broadcast::Receiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(20), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event bus closed")
}

#[tokio::test]
async fn test_client_handshake_and_call() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("starts");
    let client = McpClient::new(script_server("sh", &marker, false));

    let _events = client.connect().await.unwrap();
    assert_eq!(client.status(), ConnectionStatus::Connected);
    assert_eq!(client.server_info().unwrap().name, "sh-server");

    let names: Vec<String> = client.tools().into_iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["echo", "slow", "crash"]);

    let result = client.call_tool("echo", json!({}), None).await.unwrap();
    assert_eq!(result.as_text(), "pong");
    assert!(!result.is_error);

    client.disconnect().await;
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
    assert_eq!(starts(&marker), 1);
}

#[tokio::test]
async fn test_timeout_only_fails_its_own_request() {
    let temp = TempDir::new().unwrap();
    let client = McpClient::new(script_server("sh", &temp.path().join("starts"), false));
    let _events = client.connect().await.unwrap();

    let (slow, fast) = tokio::join!(
        client.call_tool("slow", json!({}), Some(Duration::from_millis(200))),
        client.call_tool("echo", json!({}), None),
    );

    assert!(matches!(slow, Err(McpError::Timeout { .. })));
    assert_eq!(fast.unwrap().as_text(), "pong");
    // The timed out entry is gone; a late answer would be dropped.
    assert_eq!(client.pending_requests(), 0);
    assert_eq!(client.status(), ConnectionStatus::Connected);

    client.disconnect().await;
}

#[tokio::test]
async fn test_process_exit_rejects_pending_with_exit_code() {
    let temp = TempDir::new().unwrap();
    let client = McpClient::new(script_server("sh", &temp.path().join("starts"), false));
    let _events = client.connect().await.unwrap();

    let slow = client.call_tool("slow", json!({}), Some(Duration::from_secs(10)));
    let crash = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.call_tool("crash", json!({}), Some(Duration::from_secs(10))).await
    };
    let (slow, crash) = tokio::join!(slow, crash);

    for outcome in [slow, crash] {
        match outcome {
            Err(McpError::ChannelClosed { code, .. }) => assert_eq!(code, Some(3)),
            other => panic!("expected ChannelClosed, got {other:?}"),
        }
    }
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_spawn_failure_is_a_connect_error() {
    let client = McpClient::new(RemoteServerConfig::stdio("missing", "/nonexistent/tether-test-binary"));
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, McpError::Connect { .. }));
    let state = client.state();
    assert_eq!(state.retry_count, 1);
    assert!(state.last_error.is_some());
}

#[tokio::test]
async fn test_crash_with_two_retries_ends_failed() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("starts");
    let config = ManagerConfig::new([script_server("flaky", &marker, true).with_max_retries(2)])
        .with_security(quiet_security())
        .with_reconnect(ReconnectPolicy {
            delay_ms: 20,
            backoff: Backoff::Fixed,
            ..ReconnectPolicy::default()
        });

    let manager = RemoteServerManager::new(config).unwrap();
    let mut events = manager.subscribe();
    manager.initialize().await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        ServerEvent::Connected { name: "flaky".to_string(), tools: 3 }
    );

    let err = manager
        .call_tool("flaky__crash", json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::ChannelClosed { code: Some(3), .. }));

    let mut reconnects = Vec::new();
    let mut exit_code = None;
    loop {
        match next_event(&mut events).await {
            ServerEvent::Disconnected { exit_code: code, .. } => exit_code = code,
            ServerEvent::Reconnecting { attempt, .. } => reconnects.push(attempt),
            ServerEvent::Failed { name } => {
                assert_eq!(name, "flaky");
                break;
            }
            _ => {}
        }
    }

    assert_eq!(exit_code, Some(3));
    assert_eq!(reconnects, vec![1, 2]);
    // The original start plus one per reconnect attempt.
    assert_eq!(starts(&marker), 3);

    let status = manager.server_status("flaky").unwrap();
    assert_eq!(status.status, ConnectionStatus::Failed);
    assert_eq!(status.retry_count, 3);
    assert!(matches!(
        manager.call_tool("flaky__echo", json!({}), None).await,
        Err(McpError::ToolNotFound { .. })
    ));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_crash_recovers_when_server_comes_back() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("starts");
    let config = ManagerConfig::new([script_server("steady", &marker, false)])
        .with_security(quiet_security())
        .with_reconnect(ReconnectPolicy {
            delay_ms: 20,
            backoff: Backoff::Fixed,
            ..ReconnectPolicy::default()
        });

    let manager = RemoteServerManager::new(config).unwrap();
    let mut events = manager.subscribe();
    manager.initialize().await.unwrap();

    let _ = manager.call_tool("steady__crash", json!({}), None).await;
    let mut connects = 0;
    while connects < 2 {
        if let ServerEvent::Connected { .. } = next_event(&mut events).await {
            connects += 1;
        }
    }
    assert_eq!(starts(&marker), 2);

    let status = manager.server_status("steady").unwrap();
    assert_eq!(status.status, ConnectionStatus::Connected);
    // The crash stays on the books until the connection has been up a while.
    assert_eq!(status.retry_count, 1);
    let result = manager.call_tool("steady__echo", json!({}), None).await.unwrap();
    assert_eq!(result.as_text(), "pong");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_killed_three_times_ends_failed() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("starts");
    let config = ManagerConfig::new([script_server("crashy", &marker, false).with_max_retries(2)])
        .with_security(quiet_security())
        .with_reconnect(ReconnectPolicy {
            delay_ms: 20,
            backoff: Backoff::Fixed,
            ..ReconnectPolicy::default()
        });

    let manager = RemoteServerManager::new(config).unwrap();
    let mut events = manager.subscribe();
    manager.initialize().await.unwrap();

    let mut reconnects = Vec::new();
    for kill in 1..=3 {
        let _ = manager.call_tool("crashy__crash", json!({}), None).await;
        loop {
            match next_event(&mut events).await {
                ServerEvent::Reconnecting { attempt, .. } => reconnects.push(attempt),
                ServerEvent::Connected { .. } if kill < 3 && reconnects.len() == kill => break,
                ServerEvent::Failed { .. } => break,
                _ => {}
            }
        }
    }

    // Every restart came up fine, yet the third death exhausts two retries.
    assert_eq!(reconnects, vec![1, 2]);
    assert_eq!(starts(&marker), 3);
    let status = manager.server_status("crashy").unwrap();
    assert_eq!(status.status, ConnectionStatus::Failed);
    assert_eq!(status.retry_count, 3);
    assert!(matches!(
        manager.call_tool("crashy__echo", json!({}), None).await,
        Err(McpError::ToolNotFound { .. })
    ));

    manager.shutdown().await;
}
