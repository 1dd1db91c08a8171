//! Operator-facing log callback.
//!
//! The engine reports every surfaced provider event, every observed status
//! transition and every terminal outcome to a [`LogSink`]. Calls arrive in
//! the order they were emitted.

use serde::{Deserialize, Serialize};

/// Severity of an operator log line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Sink for operator log lines.
pub trait LogSink: Send + Sync {
    fn log(&self, message: &str, level: LogLevel);
}

/// Forwards operator log lines to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, message: &str, level: LogLevel) {
        match level {
            LogLevel::Info => tracing::info!(target: "converge::operator", "{}", message),
            LogLevel::Warn => tracing::warn!(target: "converge::operator", "{}", message),
            LogLevel::Error => tracing::error!(target: "converge::operator", "{}", message),
        }
    }
}
