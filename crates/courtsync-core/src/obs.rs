//! Structured observability hooks for sync run lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via the `RunSpan` guard
//! - Emission functions for run start/finish/abort, per-field case changes,
//!   per-case failures and rejected triggers
//!
//! Events are emitted at `info!` (failures at `warn!`), with an `event` field
//! so they can be filtered in JSON logs.

use tracing::{info, warn, Span};

use crate::domain::FieldChange;

/// Span tagged with a run id. Instrument the run future with [`RunSpan::span`]
/// or enter it synchronously with [`RunSpan::enter`].
///
/// # Example
///
/// ```ignore
/// let span = RunSpan::new(&run_id.to_string(), "manual");
/// run_future.instrument(span.span()).await;
/// ```
pub struct RunSpan {
    span: Span,
}

impl RunSpan {
    pub fn new(run_id: &str, trigger: &str) -> Self {
        Self {
            span: tracing::info_span!("courtsync.run", run_id = %run_id, trigger = %trigger),
        }
    }

    pub fn span(&self) -> Span {
        self.span.clone()
    }

    /// Enter the span for the lifetime of the returned guard.
    pub fn enter(run_id: &str, trigger: &str) -> tracing::span::EnteredSpan {
        Self::new(run_id, trigger).span.entered()
    }
}

/// Emit event: run started.
///
/// ```ignore
/// emit_run_started("6f1c…", "scheduled", 42);
/// // logs: event=run.started run_id=6f1c… trigger=scheduled candidates=42
/// ```
pub fn emit_run_started(run_id: &str, trigger: &str, candidates: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        trigger = %trigger,
        candidates = candidates as u64,
    );
}

/// Emit event: run finished with its tallies.
pub fn emit_run_finished(
    run_id: &str,
    outcome: &str,
    duration_ms: u64,
    updated: usize,
    unchanged: usize,
    failed: usize,
    skipped: usize,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        outcome = %outcome,
        duration_ms = duration_ms,
        updated = updated as u64,
        unchanged = unchanged as u64,
        failed = failed as u64,
        skipped = skipped as u64,
    );
}

pub fn emit_run_aborted(run_id: &str, reason: &str) {
    warn!(event = "run.aborted", run_id = %run_id, reason = %reason);
}

/// Emit event: one tracked field of a case changed.
///
/// ```ignore
/// // logs: event=case.changed case_id=c1 field=next_hearing_date from=2025-02-01 to=2025-03-01
/// ```
pub fn emit_case_changed(case_id: &str, change: &FieldChange) {
    let from = change
        .old
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "none".to_string());
    info!(
        event = "case.changed",
        case_id = %case_id,
        field = %change.field,
        from = %from,
        to = %change.new,
        "case {} {} changed from {} to {}",
        case_id,
        change.field,
        from,
        change.new,
    );
}

pub fn emit_case_failed(case_id: &str, reason: &dyn std::fmt::Display) {
    warn!(event = "case.failed", case_id = %case_id, reason = %reason);
}

/// Emit event: a trigger found a run in progress and was dropped.
pub fn emit_trigger_rejected(trigger: &str) {
    info!(event = "trigger.rejected", trigger = %trigger, "sync run already in progress");
}

/// Emit event: an audit sink failed to record a report (warning level).
pub fn emit_audit_error(run_id: &str, sink: &str, error: &dyn std::fmt::Display) {
    warn!(event = "audit.error", run_id = %run_id, sink = %sink, error = %error);
}
