//! Ordering and gating properties of the sync orchestrator, verified
//! against the recording fake cluster.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use harbormaster_cluster::fakes::{FakeCluster, Op};
use harbormaster_cluster::{
    ApplyOptions, ClusterClient, DesiredObject, LiveObject, ObjectKey, HOOK_ANNOTATION,
    WAVE_ANNOTATION,
};
use harbormaster_core::diff::Delta;
use harbormaster_core::domain::{ObjectOutcome, SyncOutcome};
use harbormaster_core::sync::{build_plan, CancelFlag, SyncOptions, SyncOrchestrator};

fn desired(kind: &str, name: &str, wave: i64) -> DesiredObject {
    DesiredObject::from_manifest(
        json!({
            "kind": kind,
            "metadata": {
                "name": name,
                "namespace": "prod",
                "annotations": { WAVE_ANNOTATION: wave.to_string() }
            }
        }),
        "prod",
    )
    .unwrap()
}

fn hook(kind: &str, name: &str, phase: &str) -> DesiredObject {
    DesiredObject::from_manifest(
        json!({
            "kind": kind,
            "metadata": {
                "name": name,
                "namespace": "prod",
                "annotations": { HOOK_ANNOTATION: phase }
            }
        }),
        "prod",
    )
    .unwrap()
}

fn live(kind: &str, name: &str, wave: i64) -> LiveObject {
    LiveObject::new(
        ObjectKey::new(kind, "prod", name),
        json!({
            "kind": kind,
            "metadata": {
                "name": name,
                "annotations": { WAVE_ANNOTATION: wave.to_string() }
            }
        }),
    )
}

fn missing(objects: &[DesiredObject]) -> Vec<Delta> {
    objects
        .iter()
        .map(|d| Delta::Missing { desired: d.clone() })
        .collect()
}

#[tokio::test]
async fn test_empty_plan_is_noop() {
    let cluster = Arc::new(FakeCluster::new());
    let orchestrator = SyncOrchestrator::new(Arc::clone(&cluster) as Arc<dyn ClusterClient>);

    let plan = build_plan("r1", &[], &[], true);
    assert!(plan.is_noop());

    let result = orchestrator
        .execute("shop", &plan, None, SyncOptions::default(), &CancelFlag::new())
        .await;

    assert_eq!(result.outcome, SyncOutcome::Succeeded);
    assert_eq!(cluster.mutation_count(), 0, "no-op plan must issue no calls");
}

#[tokio::test]
async fn test_namespace_wave_applies_before_deployment() {
    // Spec scenario: Deployment at wave 0, Namespace at wave -1.
    let cluster = Arc::new(FakeCluster::new());
    let orchestrator = SyncOrchestrator::new(Arc::clone(&cluster) as Arc<dyn ClusterClient>);

    let objects = vec![desired("Deployment", "api", 0), desired("Namespace", "shop", -1)];
    let plan = build_plan("r1", &objects, &missing(&objects), false);

    let result = orchestrator
        .execute("shop", &plan, None, SyncOptions::default(), &CancelFlag::new())
        .await;
    assert_eq!(result.outcome, SyncOutcome::Succeeded);

    let kinds: Vec<String> = cluster
        .applied_keys()
        .into_iter()
        .map(|k| k.kind)
        .collect();
    assert_eq!(kinds, vec!["Namespace", "Deployment"]);
}

#[tokio::test]
async fn test_wave_barrier_orders_applies() {
    // With artificial latency, every wave-0 apply must finish before
    // any wave-1 apply starts.
    let cluster = Arc::new(FakeCluster::new());
    cluster.set_latency(Duration::from_millis(25));
    let orchestrator = SyncOrchestrator::new(Arc::clone(&cluster) as Arc<dyn ClusterClient>);

    let objects = vec![
        desired("ConfigMap", "cfg-a", 0),
        desired("ConfigMap", "cfg-b", 0),
        desired("Deployment", "api", 1),
    ];
    let plan = build_plan("r1", &objects, &missing(&objects), false);
    let result = orchestrator
        .execute("shop", &plan, None, SyncOptions::default(), &CancelFlag::new())
        .await;
    assert_eq!(result.outcome, SyncOutcome::Succeeded);

    let ops = cluster.ops();
    let wave0_finish = ops
        .iter()
        .filter(|r| matches!(&r.op, Op::Apply(k) if k.kind == "ConfigMap"))
        .map(|r| r.finished_at)
        .max()
        .unwrap();
    let wave1_start = ops
        .iter()
        .filter(|r| matches!(&r.op, Op::Apply(k) if k.kind == "Deployment"))
        .map(|r| r.started_at)
        .min()
        .unwrap();
    assert!(
        wave0_finish <= wave1_start,
        "wave 1 apply started before wave 0 finished"
    );
}

#[tokio::test]
async fn test_prune_false_never_deletes() {
    let cluster = Arc::new(FakeCluster::new());
    let orchestrator = SyncOrchestrator::new(Arc::clone(&cluster) as Arc<dyn ClusterClient>);

    let extras = vec![
        Delta::Extra { live: live("ConfigMap", "old-a", 0) },
        Delta::Extra { live: live("Deployment", "old-b", 1) },
    ];
    let plan = build_plan("r1", &[], &extras, false);

    let result = orchestrator
        .execute("shop", &plan, None, SyncOptions::default(), &CancelFlag::new())
        .await;
    assert_eq!(result.outcome, SyncOutcome::Succeeded);
    assert!(cluster.deleted_keys().is_empty());
}

#[tokio::test]
async fn test_prune_deletes_in_reverse_wave_order() {
    let cluster = Arc::new(FakeCluster::new());
    let orchestrator = SyncOrchestrator::new(Arc::clone(&cluster) as Arc<dyn ClusterClient>);

    let extras = vec![
        Delta::Extra { live: live("Namespace", "old-ns", -1) },
        Delta::Extra { live: live("Deployment", "old-api", 1) },
        Delta::Extra { live: live("ConfigMap", "old-cfg", 0) },
    ];
    let plan = build_plan("r1", &[], &extras, true);

    let result = orchestrator
        .execute("shop", &plan, None, SyncOptions::default(), &CancelFlag::new())
        .await;
    assert_eq!(result.outcome, SyncOutcome::Succeeded);

    let deleted: Vec<String> = cluster
        .deleted_keys()
        .into_iter()
        .map(|k| k.name)
        .collect();
    assert_eq!(deleted, vec!["old-api", "old-cfg", "old-ns"]);
}

#[tokio::test]
async fn test_pre_sync_failure_gates_main_phase() {
    let cluster = Arc::new(FakeCluster::new());
    let migrate = hook("Job", "migrate", "pre_sync");
    cluster.fail_apply(migrate.key.clone());
    let orchestrator = SyncOrchestrator::new(Arc::clone(&cluster) as Arc<dyn ClusterClient>);

    let deploy = desired("Deployment", "api", 0);
    let objects = vec![migrate, deploy.clone()];
    let plan = build_plan("r1", &objects, &missing(&[deploy]), false);

    let result = orchestrator
        .execute("shop", &plan, None, SyncOptions::default(), &CancelFlag::new())
        .await;

    assert!(matches!(result.outcome, SyncOutcome::Failed { .. }));
    // The hook apply was attempted; zero main-phase applies happened.
    let main_applies: Vec<ObjectKey> = cluster
        .applied_keys()
        .into_iter()
        .filter(|k| k.kind == "Deployment")
        .collect();
    assert!(main_applies.is_empty(), "main phase ran despite hook gate");
}

#[tokio::test]
async fn test_failed_wave_halts_later_waves_but_finishes_current() {
    let cluster = Arc::new(FakeCluster::new());
    cluster.fail_apply(ObjectKey::new("ConfigMap", "prod", "cfg-a"));
    let orchestrator = SyncOrchestrator::new(Arc::clone(&cluster) as Arc<dyn ClusterClient>);

    let objects = vec![
        desired("ConfigMap", "cfg-a", 0),
        desired("ConfigMap", "cfg-b", 0),
        desired("Deployment", "api", 1),
    ];
    let plan = build_plan("r1", &objects, &missing(&objects), false);

    let result = orchestrator
        .execute("shop", &plan, None, SyncOptions::default(), &CancelFlag::new())
        .await;

    assert!(matches!(result.outcome, SyncOutcome::Failed { .. }));
    let applied: Vec<String> = cluster.applied_keys().into_iter().map(|k| k.name).collect();
    // cfg-b (same wave, independent) still attempted; wave 1 never starts.
    assert!(applied.contains(&"cfg-b".to_string()));
    assert!(!applied.contains(&"api".to_string()));

    let failed = result
        .objects
        .iter()
        .find(|o| o.outcome == ObjectOutcome::Failed)
        .expect("failing object recorded");
    assert_eq!(failed.key.name, "cfg-a");
    assert!(failed.message.as_deref().unwrap_or("").contains("injected"));
}

#[tokio::test]
async fn test_post_sync_runs_only_after_all_phases_succeed() {
    let cluster = Arc::new(FakeCluster::new());
    cluster.fail_apply(ObjectKey::new("Deployment", "prod", "api"));
    let orchestrator = SyncOrchestrator::new(Arc::clone(&cluster) as Arc<dyn ClusterClient>);

    let smoke = hook("Job", "smoke", "post_sync");
    let deploy = desired("Deployment", "api", 0);
    let objects = vec![smoke.clone(), deploy.clone()];
    let plan = build_plan("r1", &objects, &missing(&[deploy]), false);

    let result = orchestrator
        .execute("shop", &plan, None, SyncOptions::default(), &CancelFlag::new())
        .await;
    assert!(matches!(result.outcome, SyncOutcome::Failed { .. }));
    assert!(
        !cluster.applied_keys().contains(&smoke.key),
        "post-sync hook ran after a failed wave"
    );
}

#[tokio::test]
async fn test_dry_run_issues_no_calls_but_reports_plan() {
    let cluster = Arc::new(FakeCluster::new());
    let orchestrator = SyncOrchestrator::new(Arc::clone(&cluster) as Arc<dyn ClusterClient>);

    let objects = vec![desired("Deployment", "api", 0)];
    let mut deltas = missing(&objects);
    deltas.push(Delta::Extra { live: live("ConfigMap", "old", 0) });
    let plan = build_plan("r1", &objects, &deltas, true);

    let result = orchestrator
        .execute(
            "shop",
            &plan,
            None,
            SyncOptions { dry_run: true, force: false },
            &CancelFlag::new(),
        )
        .await;

    assert_eq!(result.outcome, SyncOutcome::Succeeded);
    assert!(result.dry_run);
    assert_eq!(cluster.mutation_count(), 0);
    assert_eq!(result.objects.len(), 2);
    assert!(result
        .objects
        .iter()
        .any(|o| o.outcome == ObjectOutcome::Deleted && o.key.name == "old"));
}

#[tokio::test]
async fn test_cancellation_takes_effect_at_wave_boundary() {
    let cluster = Arc::new(FakeCluster::new());
    cluster.set_latency(Duration::from_millis(100));
    let orchestrator = SyncOrchestrator::new(Arc::clone(&cluster) as Arc<dyn ClusterClient>);

    let objects = vec![desired("ConfigMap", "cfg", 0), desired("Deployment", "api", 1)];
    let plan = build_plan("r1", &objects, &missing(&objects), false);

    let cancel = CancelFlag::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        })
    };

    let result = orchestrator
        .execute("shop", &plan, None, SyncOptions::default(), &cancel)
        .await;
    canceller.await.unwrap();

    assert_eq!(result.outcome, SyncOutcome::Aborted);
    let applied: Vec<String> = cluster.applied_keys().into_iter().map(|k| k.name).collect();
    // Wave 0 completed (never rolled back); wave 1 never started.
    assert_eq!(applied, vec!["cfg"]);
}

#[tokio::test]
async fn test_force_resolves_immutable_conflict() {
    let cluster = Arc::new(FakeCluster::new());
    let orchestrator = SyncOrchestrator::new(Arc::clone(&cluster) as Arc<dyn ClusterClient>);

    let svc = desired("Service", "web", 0);
    cluster
        .apply(&svc, ApplyOptions::default())
        .await
        .unwrap();
    cluster.mark_immutable(svc.key.clone());

    let deltas = vec![Delta::Modified { desired: svc.clone(), live: live("Service", "web", 0) }];
    let plan = build_plan("r2", &[svc.clone()], &deltas, false);

    let without_force = orchestrator
        .execute("shop", &plan, None, SyncOptions::default(), &CancelFlag::new())
        .await;
    assert!(matches!(without_force.outcome, SyncOutcome::Failed { .. }));

    let with_force = orchestrator
        .execute(
            "shop",
            &plan,
            None,
            SyncOptions { dry_run: false, force: true },
            &CancelFlag::new(),
        )
        .await;
    assert_eq!(with_force.outcome, SyncOutcome::Succeeded);
}
