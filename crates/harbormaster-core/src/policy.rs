//! Policy loop primitives: the per-cycle sync decision and the wake
//! channel.
//!
//! The decision is a pure function of the sync policy, the observed
//! drift, and the revision history, so the loop body stays trivially
//! testable. The wake channel multiplexes the poll timer and the
//! external change notifier into one source; loop logic is agnostic to
//! which fired.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::domain::app::SyncPolicy;

/// What the policy loop decided for one Observing cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyDecision {
    /// Delta set empty; nothing to do.
    NoDrift,
    /// Drift reported but policy declined to act.
    OutOfSyncNoAction { reason: String },
    /// Invoke the sync orchestrator.
    Sync,
}

/// Decide whether drift triggers an automatic sync.
///
/// An already-synced revision is not re-applied merely because live
/// drifted unless `self_heal` is set; a new revision always syncs when
/// automation is on. `attempts_on_revision` counts failed automatic
/// runs of the target revision, bounded by the retry policy.
pub fn evaluate_policy(
    policy: &SyncPolicy,
    suspended: bool,
    drift: bool,
    target_revision: &str,
    last_synced_revision: Option<&str>,
    attempts_on_revision: u32,
) -> PolicyDecision {
    if !drift {
        return PolicyDecision::NoDrift;
    }
    if suspended {
        return PolicyDecision::OutOfSyncNoAction {
            reason: "application is suspended".to_string(),
        };
    }
    if !policy.automated {
        return PolicyDecision::OutOfSyncNoAction {
            reason: "automated sync disabled; manual trigger required".to_string(),
        };
    }
    if last_synced_revision == Some(target_revision) && !policy.self_heal {
        return PolicyDecision::OutOfSyncNoAction {
            reason: format!(
                "revision {} already synced and self-heal disabled",
                target_revision
            ),
        };
    }
    if attempts_on_revision >= policy.retry.max_attempts {
        return PolicyDecision::OutOfSyncNoAction {
            reason: format!(
                "revision {} failed {} times; manual intervention required",
                target_revision, attempts_on_revision
            ),
        };
    }
    PolicyDecision::Sync
}

/// Which trigger woke the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Timer,
    External,
}

/// Abstract wake channel fed by both a timer and an external notifier.
pub struct WakeSource {
    notify: Arc<Notify>,
}

impl WakeSource {
    pub fn new(notify: Arc<Notify>) -> Self {
        Self { notify }
    }

    /// Wait for either `delay` to elapse or an external notification,
    /// whichever fires first. Cooperative; never a busy loop.
    pub async fn next(&self, delay: Duration) -> Wake {
        tokio::select! {
            _ = tokio::time::sleep(delay) => Wake::Timer,
            _ = self.notify.notified() => Wake::External,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::app::RetryPolicy;

    fn policy(automated: bool, self_heal: bool) -> SyncPolicy {
        SyncPolicy {
            automated,
            prune: false,
            self_heal,
            retry: RetryPolicy::default(),
        }
    }

    #[test]
    fn test_no_drift_wins_over_everything() {
        let decision = evaluate_policy(&policy(true, true), false, false, "r2", Some("r1"), 0);
        assert_eq!(decision, PolicyDecision::NoDrift);
    }

    #[test]
    fn test_manual_mode_reports_without_acting() {
        let decision = evaluate_policy(&policy(false, false), false, true, "r2", Some("r1"), 0);
        assert!(matches!(decision, PolicyDecision::OutOfSyncNoAction { .. }));
    }

    #[test]
    fn test_synced_revision_without_self_heal_is_not_reapplied() {
        let decision = evaluate_policy(&policy(true, false), false, true, "abc123", Some("abc123"), 0);
        assert!(matches!(decision, PolicyDecision::OutOfSyncNoAction { .. }));
    }

    #[test]
    fn test_self_heal_reapplies_synced_revision() {
        let decision = evaluate_policy(&policy(true, true), false, true, "abc123", Some("abc123"), 0);
        assert_eq!(decision, PolicyDecision::Sync);
    }

    #[test]
    fn test_new_revision_syncs_without_self_heal() {
        let decision = evaluate_policy(&policy(true, false), false, true, "def456", Some("abc123"), 0);
        assert_eq!(decision, PolicyDecision::Sync);
    }

    #[test]
    fn test_retry_budget_exhaustion_stops_auto_sync() {
        let decision = evaluate_policy(&policy(true, false), false, true, "def456", Some("abc123"), 5);
        assert!(matches!(decision, PolicyDecision::OutOfSyncNoAction { .. }));
    }

    #[test]
    fn test_suspension_blocks_auto_sync() {
        let decision = evaluate_policy(&policy(true, true), true, true, "def456", None, 0);
        assert!(matches!(decision, PolicyDecision::OutOfSyncNoAction { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wake_source_fires_on_timer_and_notify() {
        let notify = Arc::new(Notify::new());
        let source = WakeSource::new(Arc::clone(&notify));

        let wake = source.next(Duration::from_secs(30)).await;
        assert_eq!(wake, Wake::Timer);

        notify.notify_one();
        let wake = source.next(Duration::from_secs(3600)).await;
        assert_eq!(wake, Wake::External);
    }
}
