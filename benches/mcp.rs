// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Benchmarks for the MCP module.
//!
//! These benchmarks measure:
//! - Server list parsing
//! - JSON-RPC framing
//! - SSE decoding
//! - Tool registry rebuilds and lookups
//! - Package scanning

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use serde_json::json;
use tether::mcp::transport::sse_decoder::SseDecoder;
use tether::mcp::{
    Message, NamespacePolicy, PatternScanner, RemoteServerConfig, ToolDescriptor, ToolRegistry,
    TransportKind,
};

/// Benchmark server list parsing.
fn bench_config_parsing(c: &mut Criterion) {
    let json = r#"
    [
        {
            "name": "filesystem",
            "transport": "npx",
            "command": "@modelcontextprotocol/server-filesystem@2025.1.14",
            "args": ["/tmp"],
            "timeoutMs": 30000
        },
        {
            "name": "github",
            "transport": "https",
            "url": "https://mcp.github.com/v1",
            "auth": { "type": "bearer", "token": "${GITHUB_TOKEN}" },
            "enabled": false
        }
    ]
    "#;

    c.bench_function("mcp_server_list_parse", |b| {
        b.iter(|| serde_json::from_str::<Vec<RemoteServerConfig>>(black_box(json)).unwrap());
    });
}

/// Benchmark JSON-RPC line framing.
fn bench_message(c: &mut Criterion) {
    let line = r#"{"jsonrpc":"2.0","id":42,"result":{"content":[{"type":"text","text":"hello"}],"isError":false}}"#;
    c.bench_function("mcp_message_parse", |b| {
        b.iter(|| Message::parse(black_box(line)).unwrap());
    });

    let request = Message::request(7i64, "tools/call", Some(json!({"name": "read_file", "arguments": {"path": "/tmp/a"}})));
    c.bench_function("mcp_message_to_line", |b| {
        b.iter(|| black_box(&request).to_line().unwrap());
    });
}

/// Benchmark SSE decoding of chunked input.
fn bench_sse_decode(c: &mut Criterion) {
    let mut stream = String::new();
    for i in 0..64 {
        stream.push_str(&format!(
            "event: message\ndata: {{\"jsonrpc\":\"2.0\",\"id\":{i},\"result\":{{}}}}\n\n"
        ));
    }
    let bytes = stream.into_bytes();

    c.bench_function("mcp_sse_decode_64_events", |b| {
        b.iter(|| {
            let mut decoder = SseDecoder::new();
            let mut count = 0;
            for chunk in bytes.chunks(97) {
                count += decoder.push(black_box(chunk)).len();
            }
            count
        });
    });
}

fn tools(server: &str, count: usize) -> Vec<ToolDescriptor> {
    (0..count)
        .filter_map(|i| {
            ToolDescriptor::from_listing(
                server,
                &json!({"name": format!("tool_{i}"), "inputSchema": {"type": "object"}}),
            )
        })
        .collect()
}

/// Benchmark registry updates and routing lookups.
fn bench_registry(c: &mut Criterion) {
    c.bench_function("mcp_registry_register_8x32", |b| {
        b.iter(|| {
            let mut registry = ToolRegistry::new(NamespacePolicy::default());
            for s in 0..8 {
                let server = format!("server{s}");
                registry.register(&server, tools(&server, 32));
            }
            registry.len()
        });
    });

    let mut registry = ToolRegistry::new(NamespacePolicy::default());
    for s in 0..8 {
        let server = format!("server{s}");
        registry.register(&server, tools(&server, 32));
    }
    c.bench_function("mcp_registry_resolve", |b| {
        b.iter(|| registry.resolve(black_box("server5__tool_17")).is_some());
    });
}

/// Benchmark package classification.
fn bench_scanner(c: &mut Criterion) {
    let scanner = PatternScanner::new();
    c.bench_function("mcp_scan_pinned_npm", |b| {
        b.iter(|| {
            scanner.classify(
                black_box("@modelcontextprotocol/server-filesystem@2025.1.14"),
                TransportKind::Npx,
            )
        });
    });
    c.bench_function("mcp_scan_remote_source", |b| {
        b.iter(|| scanner.classify(black_box("git+https://evil.example.com/x.git"), TransportKind::Npx));
    });
}

criterion_group!(
    benches,
    bench_config_parsing,
    bench_message,
    bench_sse_decode,
    bench_registry,
    bench_scanner,
);

criterion_main!(benches);
