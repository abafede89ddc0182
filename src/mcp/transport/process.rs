// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Subprocess transport: line-delimited JSON-RPC over stdio.
//!
//! Covers `uvx`, `npx`, `docker run -i --rm` and raw `stdio` commands. Each
//! running process has four tasks:
//!
//! - **writer**: drains an mpsc queue into stdin, so sends keep their order
//! - **reader**: splits stdout on newlines and forwards each message
//! - **stderr**: logs each line and keeps a short tail for error reports
//! - **supervisor**: waits for exit (or a kill request), lets the reader
//!   drain, then reports `Closed` with the exit code

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use super::{forward_json, InboundSender, Transport, TransportEvent};
use crate::mcp::config::{RemoteServerConfig, TransportKind};
use crate::mcp::error::{McpError, McpResult};
use crate::mcp::message::Message;

/// Stderr lines kept for error context.
const STDERR_TAIL_LINES: usize = 20;

/// How long the reader may keep draining stdout after the process exits.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// How long `close` waits for the process to die after a kill.
const KILL_GRACE: Duration = Duration::from_secs(5);

const WRITE_QUEUE: usize = 64;

/// Program and argv for a process transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Build the runner invocation for `config`.
///
/// Docker receives environment variable *names* only (`-e KEY`); the values
/// are set on the docker CLI process so secrets never appear in argv.
pub fn build_command(config: &RemoteServerConfig) -> McpResult<CommandLine> {
    let missing = |field: &str| {
        McpError::connect(
            &config.name,
            format!("transport '{}' requires '{field}'", config.transport),
        )
    };
    let runner = |default: &str| config.runner.clone().unwrap_or_else(|| default.to_string());

    let command_line = match config.transport {
        TransportKind::Uvx => {
            let package = config.command.clone().ok_or_else(|| missing("command"))?;
            let mut args = vec![package];
            args.extend(config.args.iter().cloned());
            CommandLine {
                program: runner("uvx"),
                args,
            }
        }
        TransportKind::Npx => {
            let package = config.command.clone().ok_or_else(|| missing("command"))?;
            let mut args = vec!["-y".to_string(), package];
            args.extend(config.args.iter().cloned());
            CommandLine {
                program: runner("npx"),
                args,
            }
        }
        TransportKind::Docker => {
            let image = config.image.clone().ok_or_else(|| missing("image"))?;
            let mut args: Vec<String> = ["run", "-i", "--rm"].iter().map(|s| s.to_string()).collect();
            for key in config.env.keys() {
                args.push("-e".to_string());
                args.push(key.clone());
            }
            args.extend(config.container_args.iter().cloned());
            args.push(image);
            args.extend(config.args.iter().cloned());
            CommandLine {
                program: runner("docker"),
                args,
            }
        }
        TransportKind::Stdio => CommandLine {
            program: config.command.clone().ok_or_else(|| missing("command"))?,
            args: config.args.clone(),
        },
        TransportKind::Http | TransportKind::Https | TransportKind::Sse => {
            return Err(McpError::connect(
                &config.name,
                format!("transport '{}' is not a process transport", config.transport),
            ))
        }
    };
    Ok(command_line)
}

/// Bounded ring of recent stderr lines.
#[derive(Debug, Clone, Default)]
pub struct StderrTail {
    lines: Arc<StdMutex<VecDeque<String>>>,
}

impl StderrTail {
    fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == STDERR_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Recent lines joined with ` | `, or `None` if the process was quiet.
    pub fn summary(&self) -> Option<String> {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.is_empty() {
            None
        } else {
            Some(lines.iter().cloned().collect::<Vec<_>>().join(" | "))
        }
    }
}

struct Running {
    writer: mpsc::Sender<String>,
    kill: oneshot::Sender<()>,
    supervisor: JoinHandle<()>,
}

/// Transport for `uvx`, `npx`, `docker` and `stdio` servers.
pub struct ProcessTransport {
    config: RemoteServerConfig,
    running: Mutex<Option<Running>>,
    stderr: StderrTail,
}

impl ProcessTransport {
    pub fn new(config: RemoteServerConfig) -> Self {
        Self {
            config,
            running: Mutex::new(None),
            stderr: StderrTail::default(),
        }
    }

    /// Recent stderr output of the process.
    pub fn stderr_tail(&self) -> Option<String> {
        self.stderr.summary()
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    fn kind(&self) -> TransportKind {
        self.config.transport
    }

    async fn connect(&self, inbound: InboundSender) -> McpResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(McpError::connect(&self.config.name, "process already running"));
        }

        let command_line = build_command(&self.config)?;
        let server = self.config.name.clone();
        tracing::info!(server = %server, command = %command_line, "Spawning MCP server process");

        let mut cmd = Command::new(&command_line.program);
        cmd.args(&command_line.args)
            .envs(self.config.expanded_env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            McpError::connect(&server, format!("failed to spawn `{}`: {e}", command_line.program))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::connect(&server, "failed to open stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::connect(&server, "failed to open stdout"))?;
        let stderr = child.stderr.take();

        let (writer_tx, writer_rx) = mpsc::channel::<String>(WRITE_QUEUE);
        tokio::spawn(write_lines(server.clone(), stdin, writer_rx));

        let mut reader = tokio::spawn(read_lines(server.clone(), stdout, inbound.clone()));

        if let Some(stderr) = stderr {
            let tail = self.stderr.clone();
            let server = server.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, "stderr: {}", line);
                    tail.push(line);
                }
            });
        }

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let tail = self.stderr.clone();
        let supervisor = tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_rx => {
                    if let Err(e) = child.kill().await {
                        tracing::debug!(server = %server, error = %e, "Kill failed");
                    }
                    None
                }
            };

            // Let the reader forward whatever the process wrote before it died.
            if tokio::time::timeout(DRAIN_GRACE, &mut reader).await.is_err() {
                reader.abort();
            }

            let Some(status) = status else {
                return;
            };
            let code = status.as_ref().ok().and_then(|s| s.code());
            let mut reason = match &status {
                Ok(s) => format!("process exited ({s})"),
                Err(e) => format!("failed to wait for process: {e}"),
            };
            if let Some(stderr) = tail.summary() {
                reason.push_str("; stderr: ");
                reason.push_str(&stderr);
            }
            tracing::warn!(server = %server, ?code, "MCP server process exited");
            let _ = inbound.send(TransportEvent::Closed { code, reason });
        });

        *running = Some(Running {
            writer: writer_tx,
            kill: kill_tx,
            supervisor,
        });
        Ok(())
    }

    async fn send(&self, message: &Message) -> McpResult<()> {
        let mut line = message.to_line()?;
        line.push('\n');

        let writer = {
            let running = self.running.lock().await;
            running
                .as_ref()
                .map(|r| r.writer.clone())
                .ok_or_else(|| McpError::NotConnected(self.config.name.clone()))?
        };
        writer
            .send(line)
            .await
            .map_err(|_| McpError::channel_closed(&self.config.name, None, "stdin closed"))
    }

    async fn close(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        let Running {
            writer,
            kill,
            mut supervisor,
        } = running;
        drop(writer);
        let _ = kill.send(());
        if tokio::time::timeout(KILL_GRACE, &mut supervisor).await.is_err() {
            tracing::warn!(server = %self.config.name, "Process did not exit after kill");
            supervisor.abort();
        }
        tracing::debug!(server = %self.config.name, "Process transport closed");
    }
}

async fn write_lines(server: String, mut stdin: ChildStdin, mut rx: mpsc::Receiver<String>) {
    while let Some(line) = rx.recv().await {
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            tracing::debug!(server = %server, error = %e, "stdin write failed");
            break;
        }
        if let Err(e) = stdin.flush().await {
            tracing::debug!(server = %server, error = %e, "stdin flush failed");
            break;
        }
    }
}

/// Forward one message per line until EOF. Partial lines stay buffered
/// until their newline arrives.
pub(crate) async fn read_lines<R>(server: String, reader: R, inbound: InboundSender)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::trace!(server = %server, "<- {}", line);
                forward_json(&server, &line, &inbound);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(server = %server, error = %e, "stdout read failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_uvx_and_npx_commands() {
        let uvx = RemoteServerConfig::uvx("fetch", "mcp-server-fetch").with_args(["--port", "0"]);
        let cmd = build_command(&uvx).unwrap();
        assert_eq!(cmd.program, "uvx");
        assert_eq!(cmd.args, vec!["mcp-server-fetch", "--port", "0"]);

        let npx = RemoteServerConfig::npx("fs", "@modelcontextprotocol/server-filesystem")
            .with_args(["/tmp"]);
        let cmd = build_command(&npx).unwrap();
        assert_eq!(cmd.program, "npx");
        assert_eq!(
            cmd.args,
            vec!["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]
        );
        assert_eq!(
            cmd.to_string(),
            "npx -y @modelcontextprotocol/server-filesystem /tmp"
        );
    }

    #[test]
    fn test_docker_command_keeps_secrets_out_of_argv() {
        let config = RemoteServerConfig::docker("gh", "ghcr.io/acme/gh-mcp:1.0")
            .with_env([("GITHUB_TOKEN", "secret"), ("A_FLAG", "1")])
            .with_container_args(["--network", "none"])
            .with_args(["stdio"]);
        let cmd = build_command(&config).unwrap();
        assert_eq!(cmd.program, "docker");
        assert_eq!(
            cmd.args,
            vec![
                "run", "-i", "--rm", "-e", "A_FLAG", "-e", "GITHUB_TOKEN", "--network", "none",
                "ghcr.io/acme/gh-mcp:1.0", "stdio"
            ]
        );
        assert!(!cmd.to_string().contains("secret"));
    }

    #[test]
    fn test_runner_override_and_raw_stdio() {
        let config = RemoteServerConfig::uvx("x", "pkg").with_runner("/opt/bin/uvx");
        assert_eq!(build_command(&config).unwrap().program, "/opt/bin/uvx");

        let config = RemoteServerConfig::stdio("x", "python3").with_args(["server.py"]);
        let cmd = build_command(&config).unwrap();
        assert_eq!(cmd.program, "python3");
        assert_eq!(cmd.args, vec!["server.py"]);

        let http = RemoteServerConfig::http("x", "http://localhost");
        assert!(build_command(&http).is_err());
    }

    #[tokio::test]
    async fn test_reader_buffers_partial_lines() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(read_lines("s".to_string(), reader, tx));

        writer.write_all(br#"{"jsonrpc":"2.0","id":1,"#).await.unwrap();
        writer.write_all(b"\"result\":{}}\n").await.unwrap();
        writer.write_all(b"garbage line\n\n").await.unwrap();
        writer
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\"}\n")
            .await
            .unwrap();
        drop(writer);
        task.await.unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, TransportEvent::Message(Message::Response(_))));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, TransportEvent::Message(Message::Notification(_))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stderr_tail_is_bounded() {
        let tail = StderrTail::default();
        assert!(tail.summary().is_none());
        for i in 0..30 {
            tail.push(format!("line {i}"));
        }
        let summary = tail.summary().unwrap();
        assert!(summary.starts_with("line 10"));
        assert!(summary.ends_with("line 29"));
    }
}
