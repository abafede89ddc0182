// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tracing and metrics infrastructure.
//!
//! - **Tracing**: structured logs with spans around connects and tool calls
//! - **Metrics**: tool call latency, operation histograms, connection counters
//!
//! # Usage
//!
//! ```rust,ignore
//! use tether::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::json())?;
//! ```
//!
//! Metrics recording is compiled out without the `telemetry` feature; the
//! span types still exist so call sites need no feature gates.

mod init;
pub mod metrics;
mod spans;

pub use init::{init_telemetry, LogFormat, TelemetryConfig, TelemetryGuard};
pub use metrics::{
    ConnectionCounts, ConnectionEvent, Histogram, Metrics, MetricsSnapshot, OperationMetrics,
    ToolMetrics, GLOBAL_METRICS,
};
pub use spans::{TimedOperation, ToolCallSpan};

/// Count a connection event when metrics are compiled in.
#[inline]
pub fn count(event: ConnectionEvent) {
    #[cfg(feature = "telemetry")]
    metrics::record_connection(event);
    #[cfg(not(feature = "telemetry"))]
    let _ = event;
}
