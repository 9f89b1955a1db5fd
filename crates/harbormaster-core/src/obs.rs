//! Structured observability hooks for the reconcile lifecycle.
//!
//! Emission helpers for the key loop events (cycle start, drift
//! detection, policy decision, sync start/finish) plus a
//! `ReconcileSpan` RAII guard scoping all tracing calls to one
//! Application cycle.

use tracing::info;

use crate::domain::history::SyncOutcome;

/// RAII guard that enters an app-scoped tracing span for the duration
/// of one reconcile cycle.
pub struct ReconcileSpan {
    _span: tracing::span::EnteredSpan,
}

impl ReconcileSpan {
    /// Create and enter a span tagged with the application name.
    pub fn enter(app: &str) -> Self {
        let span = tracing::info_span!("harbormaster.reconcile", app = %app);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: an Observing cycle started.
pub fn emit_cycle_started(app: &str, revision: &str) {
    info!(event = "cycle.started", app = %app, revision = %revision);
}

/// Emit event: drift detected between desired and live state.
pub fn emit_drift_detected(app: &str, drifted: usize, observed: usize) {
    info!(event = "cycle.drift_detected", app = %app, drifted = drifted, observed = observed);
}

/// Emit event: the policy loop's decision for this cycle.
pub fn emit_policy_decision(app: &str, decision: &str) {
    info!(event = "cycle.policy_decision", app = %app, decision = %decision);
}

/// Emit event: a sync run finished.
pub fn emit_sync_finished(app: &str, run_id: &str, outcome: &SyncOutcome, duration_ms: i64) {
    let outcome_label = match outcome {
        SyncOutcome::Succeeded => "succeeded",
        SyncOutcome::Failed { .. } => "failed",
        SyncOutcome::Aborted => "aborted",
        SyncOutcome::OutOfSyncNoAction { .. } => "no_action",
    };
    info!(
        event = "sync.finished",
        app = %app,
        run_id = %run_id,
        outcome = %outcome_label,
        duration_ms = duration_ms,
    );
}

/// Emit event: a cycle failed (warning level; the loop itself survives).
pub fn emit_cycle_error(app: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "cycle.error", app = %app, error = %error);
}
