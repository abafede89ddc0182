// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Span helpers for consistent instrumentation.

use std::time::{Duration, Instant};

use tracing::{info_span, Span};
use uuid::Uuid;

/// RAII guard for one routed tool call.
///
/// Records server, tool, a per-call ID and the outcome, and feeds the
/// global tool metrics when finished.
pub struct ToolCallSpan {
    tool_name: String,
    call_id: Uuid,
    start: Instant,
    span: Span,
}

impl ToolCallSpan {
    /// Start a span for `tool` routed to `server`.
    pub fn start(server: &str, tool: &str) -> Self {
        let call_id = Uuid::new_v4();
        let span = info_span!(
            "tool_call",
            server = %server,
            tool = %tool,
            call_id = %call_id,
            duration_ms = tracing::field::Empty,
            success = tracing::field::Empty,
        );

        Self {
            tool_name: tool.to_string(),
            call_id,
            start: Instant::now(),
            span,
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn call_id(&self) -> Uuid {
        self.call_id
    }

    /// Finish the span, recording duration and success.
    pub fn finish(self, success: bool) {
        let duration = self.start.elapsed();
        self.span.record("duration_ms", duration.as_secs_f64() * 1000.0);
        self.span.record("success", success);

        #[cfg(feature = "telemetry")]
        super::metrics::GLOBAL_METRICS.record_tool(&self.tool_name, duration, success);

        tracing::debug!(parent: &self.span, "Tool call complete");
    }

    /// Finish with a result, deriving success from it.
    pub fn finish_with_result<T, E>(self, result: &Result<T, E>) {
        self.finish(result.is_ok());
    }
}

/// RAII guard for timing an operation.
///
/// Records to the operation metrics on `finish`, or on drop if the
/// operation was abandoned early (e.g. by `?`).
pub struct TimedOperation {
    name: String,
    start: Instant,
    span: Span,
    recorded: bool,
}

impl TimedOperation {
    pub fn start(name: &str) -> Self {
        let span = info_span!("operation", op = %name, duration_ms = tracing::field::Empty);
        Self {
            name: name.to_string(),
            start: Instant::now(),
            span,
            recorded: false,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Finish and record the operation.
    pub fn finish(mut self) -> Duration {
        self.record()
    }

    fn record(&mut self) -> Duration {
        let duration = self.start.elapsed();
        if !self.recorded {
            self.recorded = true;
            self.span.record("duration_ms", duration.as_secs_f64() * 1000.0);
            #[cfg(feature = "telemetry")]
            super::metrics::GLOBAL_METRICS.record_operation(&self.name, duration);
        }
        duration
    }
}

impl Drop for TimedOperation {
    fn drop(&mut self) {
        self.record();
    }
}

/// Time the enclosing scope as a named operation.
///
/// ```rust,ignore
/// let _timer = tether::timed!("mcp.connect");
/// ```
#[macro_export]
macro_rules! timed {
    ($name:expr) => {
        $crate::telemetry::TimedOperation::start($name)
    };
}
