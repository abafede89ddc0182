// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process metrics for remote tool traffic.
//!
//! Lightweight counters and latency histograms, no exporter. The hosting
//! server can pull a [`MetricsSnapshot`] and ship it wherever it likes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

/// Global metrics instance.
pub static GLOBAL_METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// Central metrics collection.
#[derive(Debug)]
pub struct Metrics {
    /// Tool call metrics by visible tool name.
    tools: RwLock<BTreeMap<String, ToolMetrics>>,

    /// Timed operations (`mcp.connect`, `mcp.request`, ...).
    operations: RwLock<BTreeMap<String, OperationMetrics>>,

    connections: ConnectionCounters,

    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(BTreeMap::new()),
            operations: RwLock::new(BTreeMap::new()),
            connections: ConnectionCounters::default(),
            start_time: Instant::now(),
        }
    }

    /// Record a tool call.
    pub fn record_tool(&self, name: &str, duration: Duration, success: bool) {
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        tools
            .entry(name.to_string())
            .or_insert_with(ToolMetrics::new)
            .record(duration, success);
    }

    /// Record a generic operation.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        let mut ops = self.operations.write().unwrap_or_else(PoisonError::into_inner);
        ops.entry(name.to_string())
            .or_insert_with(OperationMetrics::new)
            .record(duration);
    }

    /// Count a connection lifecycle event.
    pub fn record_connection(&self, event: ConnectionEvent) {
        self.connections.counter(event).fetch_add(1, Ordering::Relaxed);
    }

    pub fn tool_metrics(&self, name: &str) -> Option<ToolMetrics> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn connection_counts(&self) -> ConnectionCounts {
        self.connections.load()
    }

    /// Time since metrics were initialized.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tools: self
                .tools
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            operations: self
                .operations
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            connections: self.connection_counts(),
            uptime: self.uptime(),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.operations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.connections.reset();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-tool call statistics.
#[derive(Debug, Clone)]
pub struct ToolMetrics {
    pub invocations: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_duration: Duration,
    pub min_duration: Duration,
    pub max_duration: Duration,
}

impl ToolMetrics {
    pub fn new() -> Self {
        Self {
            invocations: 0,
            successes: 0,
            failures: 0,
            total_duration: Duration::ZERO,
            min_duration: Duration::MAX,
            max_duration: Duration::ZERO,
        }
    }

    pub fn record(&mut self, duration: Duration, success: bool) {
        self.invocations += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_duration += duration;
        self.min_duration = self.min_duration.min(duration);
        self.max_duration = self.max_duration.max(duration);
    }

    pub fn avg_duration(&self) -> Duration {
        if self.invocations == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.invocations as u32
        }
    }

    /// Success rate in `0.0..=1.0`.
    pub fn success_rate(&self) -> f64 {
        if self.invocations == 0 {
            1.0
        } else {
            self.successes as f64 / self.invocations as f64
        }
    }
}

impl Default for ToolMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Operation latency with a histogram.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    pub count: u64,
    pub total_duration: Duration,
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub histogram: Histogram,
}

impl OperationMetrics {
    pub fn new() -> Self {
        Self {
            count: 0,
            total_duration: Duration::ZERO,
            min_duration: Duration::MAX,
            max_duration: Duration::ZERO,
            histogram: Histogram::default(),
        }
    }

    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
        self.min_duration = self.min_duration.min(duration);
        self.max_duration = self.max_duration.max(duration);
        self.histogram.record(duration);
    }

    pub fn avg_duration(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.count as u32
        }
    }
}

impl Default for OperationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-bucket latency histogram.
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Upper bucket bounds in microseconds; one overflow bucket follows.
    buckets: Vec<u64>,
    counts: Vec<u64>,
}

impl Histogram {
    /// Histogram with custom bucket bounds (microseconds).
    pub fn with_buckets(buckets: Vec<u64>) -> Self {
        let counts = vec![0; buckets.len() + 1];
        Self { buckets, counts }
    }

    pub fn record(&mut self, duration: Duration) {
        let micros = duration.as_micros() as u64;
        let idx = self
            .buckets
            .iter()
            .position(|&b| micros <= b)
            .unwrap_or(self.buckets.len());
        self.counts[idx] += 1;
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }

    /// Approximate percentile, reported as the bucket's upper bound.
    pub fn percentile(&self, p: f64) -> Duration {
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }

        let target = (total as f64 * p / 100.0).ceil() as u64;
        let mut cumulative = 0u64;
        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                let micros = match self.buckets.get(i) {
                    Some(&bound) => bound,
                    None => self.buckets.last().copied().unwrap_or(0) * 10,
                };
                return Duration::from_micros(micros);
            }
        }
        Duration::ZERO
    }

    pub fn p50(&self) -> Duration {
        self.percentile(50.0)
    }

    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // 1ms, 10ms, 100ms, 1s, 10s, 60s: remote calls are never sub-millisecond
        Self::with_buckets(vec![1_000, 10_000, 100_000, 1_000_000, 10_000_000, 60_000_000])
    }
}

/// Connection lifecycle events that are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    ConnectFailed,
    Disconnected,
    ReconnectAttempt,
    RequestTimeout,
}

#[derive(Debug, Default)]
struct ConnectionCounters {
    connected: AtomicU64,
    connect_failed: AtomicU64,
    disconnected: AtomicU64,
    reconnect_attempts: AtomicU64,
    request_timeouts: AtomicU64,
}

impl ConnectionCounters {
    fn counter(&self, event: ConnectionEvent) -> &AtomicU64 {
        match event {
            ConnectionEvent::Connected => &self.connected,
            ConnectionEvent::ConnectFailed => &self.connect_failed,
            ConnectionEvent::Disconnected => &self.disconnected,
            ConnectionEvent::ReconnectAttempt => &self.reconnect_attempts,
            ConnectionEvent::RequestTimeout => &self.request_timeouts,
        }
    }

    fn load(&self) -> ConnectionCounts {
        ConnectionCounts {
            connected: self.connected.load(Ordering::Relaxed),
            connect_failed: self.connect_failed.load(Ordering::Relaxed),
            disconnected: self.disconnected.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            request_timeouts: self.request_timeouts.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.connected,
            &self.connect_failed,
            &self.disconnected,
            &self.reconnect_attempts,
            &self.request_timeouts,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time connection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionCounts {
    pub connected: u64,
    pub connect_failed: u64,
    pub disconnected: u64,
    pub reconnect_attempts: u64,
    pub request_timeouts: u64,
}

/// A snapshot of all metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub tools: BTreeMap<String, ToolMetrics>,
    pub operations: BTreeMap<String, OperationMetrics>,
    pub connections: ConnectionCounts,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Format as a human-readable report.
    pub fn format_report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Metrics Report ===\n\n");
        report.push_str(&format!("Uptime: {:.2?}\n", self.uptime));
        let c = &self.connections;
        report.push_str(&format!(
            "Connections: {} established, {} failed, {} dropped, {} reconnects, {} request timeouts\n\n",
            c.connected, c.connect_failed, c.disconnected, c.reconnect_attempts, c.request_timeouts
        ));

        if !self.tools.is_empty() {
            report.push_str("Tool Calls:\n");
            for (name, metrics) in &self.tools {
                report.push_str(&format!(
                    "  {}: {} calls, {:.1}% success, avg {:.2?}\n",
                    name,
                    metrics.invocations,
                    metrics.success_rate() * 100.0,
                    metrics.avg_duration()
                ));
            }
            report.push('\n');
        }

        if !self.operations.is_empty() {
            report.push_str("Operations:\n");
            for (name, metrics) in &self.operations {
                report.push_str(&format!(
                    "  {}: {} ops, avg {:.2?}, p99 {:.2?}\n",
                    name,
                    metrics.count,
                    metrics.avg_duration(),
                    metrics.histogram.p99()
                ));
            }
        }

        report
    }
}

/// Record a tool call to global metrics.
pub fn record_tool(name: &str, duration: Duration, success: bool) {
    GLOBAL_METRICS.record_tool(name, duration, success);
}

/// Record an operation to global metrics.
pub fn record_operation(name: &str, duration: Duration) {
    GLOBAL_METRICS.record_operation(name, duration);
}

/// Count a connection event in global metrics.
pub fn record_connection(event: ConnectionEvent) {
    GLOBAL_METRICS.record_connection(event);
}
