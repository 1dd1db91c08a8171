//! Structured observability hooks for reconciliation runs.
//!
//! This module provides:
//! - A run-scoped tracing span, attached to the run future with `Instrument`
//! - Emission functions for key lifecycle points: start, verb decision,
//!   status observation, deadline exhaustion, finish
//!
//! Events are emitted at `info!` level. For JSON output, initialise tracing
//! through [`crate::telemetry::init_tracing`] with `json = true`.

use tracing::{info, warn, Span};

use crate::domain::{OutcomeStatus, ReconciliationStatus};

/// Span tagged with the run id, target and provider kind.
///
/// # Example
///
/// ```ignore
/// let span = run_span(&run_id, "network-stack", "stack");
/// engine_run(spec).instrument(span).await
/// ```
pub fn run_span(run_id: &str, target: &str, provider: &str) -> Span {
    tracing::info_span!("converge.run", run_id = %run_id, target = %target, provider = %provider)
}

/// Emit event: run started.
pub fn emit_run_started(target: &str, provider: &str) {
    info!(event = "run.started", target = %target, provider = %provider);
}

/// Emit event: the engine chose how to reconcile (create, update, recreate, delete).
pub fn emit_verb_decided(target: &str, verb: &str, existed: bool) {
    info!(event = "run.verb_decided", target = %target, verb = %verb, existed = existed);
}

/// Emit event: a poll tick observed a new status.
pub fn emit_status_observed(target: &str, status: ReconciliationStatus, status_code: &str) {
    info!(
        event = "run.status_observed",
        target = %target,
        status = %status,
        status_code = %status_code,
    );
}

/// Emit event: an unmapped provider status was seen and treated as in progress.
pub fn emit_unknown_status(target: &str, status_code: &str) {
    warn!(event = "run.unknown_status", target = %target, status_code = %status_code);
}

/// Emit event: the poll deadline passed without a terminal status.
pub fn emit_poll_deadline(target: &str, elapsed_ms: u64) {
    warn!(event = "run.deadline_exceeded", target = %target, elapsed_ms = elapsed_ms);
}

/// Emit event: run finished.
pub fn emit_run_finished(target: &str, status: OutcomeStatus, duration_ms: u64, no_change: bool) {
    info!(
        event = "run.finished",
        target = %target,
        status = ?status,
        duration_ms = duration_ms,
        no_change = no_change,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_span_create() {
        // Without a subscriber the span is disabled but must still be constructible.
        let span = run_span("run-1", "network-stack", "stack");
        let _entered = span.enter();
        emit_run_started("network-stack", "stack");
    }
}
