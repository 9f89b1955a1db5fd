//! Sync plan construction.
//!
//! Converts a delta set into a concrete, ordered application plan:
//! hooks partitioned out by lifecycle phase, the remaining drift
//! grouped into ascending waves, each wave sorted by the fixed
//! kind-priority table then name, and prune candidates ordered
//! reverse-wave so dependencies outlive their dependents. Planning is
//! pure; execution lives in `sync::executor`.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use harbormaster_cluster::{DesiredObject, HookPhase, LiveObject};

use crate::diff::Delta;
use crate::domain::history::ObjectOutcome;

/// Apply order across kinds: environment scaffolding first, then
/// configuration, then workloads, then routing. Unknown kinds sort
/// after the table.
pub const KIND_APPLY_ORDER: &[&str] = &[
    "Namespace",
    "CustomResourceDefinition",
    "ResourceQuota",
    "LimitRange",
    "ServiceAccount",
    "ClusterRole",
    "ClusterRoleBinding",
    "Role",
    "RoleBinding",
    "Secret",
    "ConfigMap",
    "PersistentVolume",
    "PersistentVolumeClaim",
    "DaemonSet",
    "Deployment",
    "StatefulSet",
    "Job",
    "CronJob",
    "Service",
    "Ingress",
];

/// Rank of `kind` in the apply-order table.
pub fn kind_priority(kind: &str) -> usize {
    KIND_APPLY_ORDER
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(KIND_APPLY_ORDER.len())
}

/// A single planned apply with the action the diff implies.
#[derive(Debug, Clone)]
pub struct PlannedApply {
    pub object: DesiredObject,
    /// `Created` for Missing deltas, `Updated` for Modified.
    pub action: ObjectOutcome,
}

/// A barrier-separated batch of applies.
#[derive(Debug, Clone)]
pub struct Wave {
    pub wave: i64,
    pub applies: Vec<PlannedApply>,
}

/// A planned deletion of an Extra object.
#[derive(Debug, Clone)]
pub struct PlannedDelete {
    pub live: LiveObject,
    pub wave: i64,
}

/// The full ordered plan for one orchestration run.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    /// Revision this plan realizes.
    pub revision: String,
    pub pre_sync: Vec<DesiredObject>,
    pub sync_hooks: Vec<DesiredObject>,
    pub post_sync: Vec<DesiredObject>,
    /// Waves in ascending order.
    pub waves: Vec<Wave>,
    /// Deletions in reverse-wave order (highest wave first).
    pub prunes: Vec<PlannedDelete>,
}

impl SyncPlan {
    /// True when executing this plan would issue no calls.
    pub fn is_noop(&self) -> bool {
        self.waves.is_empty()
            && self.prunes.is_empty()
            && self.pre_sync.is_empty()
            && self.sync_hooks.is_empty()
            && self.post_sync.is_empty()
    }

    /// Total number of planned mutations.
    pub fn mutation_count(&self) -> usize {
        self.waves.iter().map(|w| w.applies.len()).sum::<usize>()
            + self.prunes.len()
            + self.pre_sync.len()
            + self.sync_hooks.len()
            + self.post_sync.len()
    }
}

/// Build the ordered plan for `revision` from the rendered desired set
/// and its delta set.
///
/// Hooks come from the desired set (they are excluded from diffing);
/// they run on every sync. Extra deltas become prune entries only when
/// `prune` is set.
pub fn build_plan(
    revision: impl Into<String>,
    desired: &[DesiredObject],
    deltas: &[Delta],
    prune: bool,
) -> SyncPlan {
    let mut pre_sync = Vec::new();
    let mut sync_hooks = Vec::new();
    let mut post_sync = Vec::new();
    for obj in desired {
        match obj.hook {
            Some(HookPhase::PreSync) => pre_sync.push(obj.clone()),
            Some(HookPhase::Sync) => sync_hooks.push(obj.clone()),
            Some(HookPhase::PostSync) => post_sync.push(obj.clone()),
            None => {}
        }
    }
    for hooks in [&mut pre_sync, &mut sync_hooks, &mut post_sync] {
        hooks.sort_by(|a, b| {
            (a.wave, kind_priority(&a.key.kind), &a.key.name).cmp(&(
                b.wave,
                kind_priority(&b.key.kind),
                &b.key.name,
            ))
        });
    }

    let mut by_wave: BTreeMap<i64, Vec<PlannedApply>> = BTreeMap::new();
    let mut prunes = Vec::new();
    for delta in deltas {
        match delta {
            Delta::Missing { desired } => by_wave.entry(desired.wave).or_default().push(
                PlannedApply {
                    object: desired.clone(),
                    action: ObjectOutcome::Created,
                },
            ),
            Delta::Modified { desired, .. } => by_wave.entry(desired.wave).or_default().push(
                PlannedApply {
                    object: desired.clone(),
                    action: ObjectOutcome::Updated,
                },
            ),
            Delta::Extra { live } => {
                if prune {
                    prunes.push(PlannedDelete {
                        wave: live.wave(),
                        live: live.clone(),
                    });
                }
            }
            Delta::Unchanged { .. } => {}
        }
    }

    let waves = by_wave
        .into_iter()
        .map(|(wave, mut applies)| {
            applies.sort_by(|a, b| {
                (kind_priority(&a.object.key.kind), &a.object.key.name).cmp(&(
                    kind_priority(&b.object.key.kind),
                    &b.object.key.name,
                ))
            });
            Wave { wave, applies }
        })
        .collect();

    // Deletions run dependents-first: highest wave, then reverse kind
    // priority, then name.
    prunes.sort_by(|a, b| {
        (
            Reverse(a.wave),
            Reverse(kind_priority(&a.live.key.kind)),
            &a.live.key.name,
        )
            .cmp(&(
                Reverse(b.wave),
                Reverse(kind_priority(&b.live.key.kind)),
                &b.live.key.name,
            ))
    });

    SyncPlan {
        revision: revision.into(),
        pre_sync,
        sync_hooks,
        post_sync,
        waves,
        prunes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbormaster_cluster::{ObjectKey, WAVE_ANNOTATION};
    use serde_json::json;

    fn desired_at_wave(kind: &str, name: &str, wave: i64) -> DesiredObject {
        DesiredObject::from_manifest(
            json!({
                "kind": kind,
                "metadata": {
                    "name": name,
                    "namespace": "ns",
                    "annotations": { WAVE_ANNOTATION: wave.to_string() }
                }
            }),
            "ns",
        )
        .unwrap()
    }

    fn live_at_wave(kind: &str, name: &str, wave: i64) -> LiveObject {
        LiveObject::new(
            ObjectKey::new(kind, "ns", name),
            json!({
                "kind": kind,
                "metadata": {
                    "name": name,
                    "annotations": { WAVE_ANNOTATION: wave.to_string() }
                }
            }),
        )
    }

    #[test]
    fn test_waves_ascend_and_sort_by_kind_priority() {
        let ns = desired_at_wave("Namespace", "shop", -1);
        let deploy = desired_at_wave("Deployment", "api", 0);
        let config = desired_at_wave("ConfigMap", "settings", 0);

        let deltas = vec![
            Delta::Missing { desired: deploy },
            Delta::Missing { desired: ns },
            Delta::Missing { desired: config },
        ];
        let plan = build_plan("r1", &[], &deltas, false);

        assert_eq!(plan.waves.len(), 2);
        assert_eq!(plan.waves[0].wave, -1);
        assert_eq!(plan.waves[0].applies[0].object.key.kind, "Namespace");
        let wave0: Vec<&str> = plan.waves[1]
            .applies
            .iter()
            .map(|a| a.object.key.kind.as_str())
            .collect();
        assert_eq!(wave0, vec!["ConfigMap", "Deployment"]);
    }

    #[test]
    fn test_prune_reverse_wave_order() {
        let deltas = vec![
            Delta::Extra { live: live_at_wave("ConfigMap", "old-cfg", 0) },
            Delta::Extra { live: live_at_wave("Deployment", "old-api", 2) },
            Delta::Extra { live: live_at_wave("Namespace", "old-ns", -1) },
        ];
        let plan = build_plan("r1", &[], &deltas, true);

        let order: Vec<&str> = plan.prunes.iter().map(|p| p.live.key.name.as_str()).collect();
        assert_eq!(order, vec!["old-api", "old-cfg", "old-ns"]);
    }

    #[test]
    fn test_prune_disabled_drops_extras() {
        let deltas = vec![Delta::Extra { live: live_at_wave("ConfigMap", "old", 0) }];
        let plan = build_plan("r1", &[], &deltas, false);
        assert!(plan.prunes.is_empty());
        assert!(plan.is_noop());
    }

    #[test]
    fn test_hooks_partitioned_by_phase() {
        let mk_hook = |name: &str, phase: &str| {
            DesiredObject::from_manifest(
                json!({
                    "kind": "Job",
                    "metadata": {
                        "name": name,
                        "namespace": "ns",
                        "annotations": { harbormaster_cluster::HOOK_ANNOTATION: phase }
                    }
                }),
                "ns",
            )
            .unwrap()
        };
        let desired = vec![
            mk_hook("migrate", "pre_sync"),
            mk_hook("smoke", "post_sync"),
            mk_hook("notify", "sync"),
            desired_at_wave("Deployment", "api", 0),
        ];
        let plan = build_plan("r1", &desired, &[], false);

        assert_eq!(plan.pre_sync.len(), 1);
        assert_eq!(plan.sync_hooks.len(), 1);
        assert_eq!(plan.post_sync.len(), 1);
        // Non-hook objects enter waves only via deltas.
        assert!(plan.waves.is_empty());
    }

    #[test]
    fn test_unknown_kind_sorts_after_table() {
        assert!(kind_priority("CronTab") > kind_priority("Ingress"));
        assert!(kind_priority("Namespace") < kind_priority("Deployment"));
        assert!(kind_priority("Deployment") < kind_priority("Service"));
    }
}
