//! Sync plan execution.
//!
//! Phase order: `PreSync` hooks → waves (barrier between waves) →
//! `Sync` hooks → prune → `PostSync` hooks. PreSync hooks are a hard
//! gate: any failure aborts the run before a single main-phase object
//! is touched. A failed apply inside a wave still lets the rest of that
//! wave attempt, but no later wave starts. Cancellation is honored at
//! wave boundaries and never rolls back applied objects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use harbormaster_cluster::{
    ApplyOptions, ClusterClient, DesiredObject, HookPhase, ManifestDigest, MANAGED_BY_LABEL,
};

use crate::domain::history::{ObjectOutcome, ObjectResult, SyncOutcome, SyncResult};
use crate::sync::plan::SyncPlan;

/// Run-level flags. Neither changes the ordering algorithm.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Compute the full plan, apply nothing.
    pub dry_run: bool,
    /// Delete-and-recreate on immutable-field conflicts.
    pub force: bool,
}

/// Cooperative cancellation handle for an in-flight run, observed at
/// wave boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Reset before a new run starts.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Executes ordered sync plans against a cluster client.
pub struct SyncOrchestrator {
    client: Arc<dyn ClusterClient>,
}

impl SyncOrchestrator {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    /// Execute `plan` for `app_name`, returning the immutable run
    /// record. Failures are captured in the result, never panicked or
    /// propagated; the caller owns retry policy.
    ///
    /// # TDD: test_wave_barrier_orders_applies, test_pre_sync_failure_gates_main_phase
    pub async fn execute(
        &self,
        app_name: &str,
        plan: &SyncPlan,
        digest: Option<ManifestDigest>,
        options: SyncOptions,
        cancel: &CancelFlag,
    ) -> SyncResult {
        let started_at = Utc::now();
        let id = Uuid::new_v4();
        let mut objects: Vec<ObjectResult> = Vec::new();

        info!(
            app = %app_name,
            revision = %plan.revision,
            mutations = plan.mutation_count(),
            dry_run = options.dry_run,
            "starting sync run"
        );

        if options.dry_run {
            return self.plan_only(id, plan, digest, started_at);
        }

        // PreSync hooks are a hard gate.
        if let Err(reason) =
            self.run_hooks(app_name, HookPhase::PreSync, &plan.pre_sync, options, &mut objects)
                .await
        {
            return finish(id, plan, digest, objects, SyncOutcome::Failed { reason }, started_at);
        }

        // Main waves, barrier-separated.
        for wave in &plan.waves {
            if cancel.is_cancelled() {
                info!(app = %app_name, wave = wave.wave, "sync cancelled at wave boundary");
                return finish(id, plan, digest, objects, SyncOutcome::Aborted, started_at);
            }

            info!(app = %app_name, wave = wave.wave, applies = wave.applies.len(), "applying wave");
            let mut wave_error: Option<String> = None;
            for planned in &wave.applies {
                let stamped = with_tracking_label(&planned.object, app_name);
                match self
                    .client
                    .apply(&stamped, ApplyOptions { force: options.force })
                    .await
                {
                    Ok(_) => objects.push(ObjectResult {
                        key: planned.object.key.clone(),
                        outcome: planned.action,
                        hook: None,
                        message: None,
                    }),
                    Err(e) => {
                        warn!(app = %app_name, key = %planned.object.key, error = %e, "apply failed");
                        // Remaining objects in this wave still get
                        // attempted; later waves never start.
                        wave_error.get_or_insert_with(|| e.to_string());
                        objects.push(ObjectResult {
                            key: planned.object.key.clone(),
                            outcome: ObjectOutcome::Failed,
                            hook: None,
                            message: Some(e.to_string()),
                        });
                    }
                }
            }
            if let Some(reason) = wave_error {
                return finish(id, plan, digest, objects, SyncOutcome::Failed { reason }, started_at);
            }
        }

        if let Err(reason) =
            self.run_hooks(app_name, HookPhase::Sync, &plan.sync_hooks, options, &mut objects)
                .await
        {
            return finish(id, plan, digest, objects, SyncOutcome::Failed { reason }, started_at);
        }

        // Prune deletions, dependents first. A failed delete marks the
        // run but does not stop the remaining deletions.
        let mut prune_error: Option<String> = None;
        for planned in &plan.prunes {
            match self.client.delete(&planned.live.key).await {
                Ok(()) => objects.push(ObjectResult {
                    key: planned.live.key.clone(),
                    outcome: ObjectOutcome::Deleted,
                    hook: None,
                    message: None,
                }),
                Err(e) => {
                    warn!(app = %app_name, key = %planned.live.key, error = %e, "prune failed");
                    prune_error.get_or_insert_with(|| e.to_string());
                    objects.push(ObjectResult {
                        key: planned.live.key.clone(),
                        outcome: ObjectOutcome::Failed,
                        hook: None,
                        message: Some(e.to_string()),
                    });
                }
            }
        }
        if let Some(reason) = prune_error {
            return finish(id, plan, digest, objects, SyncOutcome::Failed { reason }, started_at);
        }

        // PostSync runs only when every prior phase succeeded; its
        // failure is reported but prior applies stand.
        if let Err(reason) =
            self.run_hooks(app_name, HookPhase::PostSync, &plan.post_sync, options, &mut objects)
                .await
        {
            return finish(id, plan, digest, objects, SyncOutcome::Failed { reason }, started_at);
        }

        info!(app = %app_name, revision = %plan.revision, "sync run succeeded");
        finish(id, plan, digest, objects, SyncOutcome::Succeeded, started_at)
    }

    async fn run_hooks(
        &self,
        app_name: &str,
        phase: HookPhase,
        hooks: &[DesiredObject],
        options: SyncOptions,
        objects: &mut Vec<ObjectResult>,
    ) -> Result<(), String> {
        for hook in hooks {
            info!(app = %app_name, phase = %phase, key = %hook.key, "running hook");
            let stamped = with_tracking_label(hook, app_name);
            match self
                .client
                .apply(&stamped, ApplyOptions { force: options.force })
                .await
            {
                Ok(_) => objects.push(ObjectResult {
                    key: hook.key.clone(),
                    outcome: ObjectOutcome::Created,
                    hook: Some(phase),
                    message: None,
                }),
                Err(e) => {
                    warn!(app = %app_name, phase = %phase, key = %hook.key, error = %e, "hook failed");
                    objects.push(ObjectResult {
                        key: hook.key.clone(),
                        outcome: ObjectOutcome::Failed,
                        hook: Some(phase),
                        message: Some(e.to_string()),
                    });
                    return Err(format!("{} hook {} failed: {}", phase, hook.key, e));
                }
            }
        }
        Ok(())
    }

    fn plan_only(
        &self,
        id: Uuid,
        plan: &SyncPlan,
        digest: Option<ManifestDigest>,
        started_at: chrono::DateTime<Utc>,
    ) -> SyncResult {
        let mut objects = Vec::new();
        let dry = |key: &harbormaster_cluster::ObjectKey,
                   outcome: ObjectOutcome,
                   hook: Option<HookPhase>| ObjectResult {
            key: key.clone(),
            outcome,
            hook,
            message: Some("dry-run (not applied)".to_string()),
        };

        for hook in &plan.pre_sync {
            objects.push(dry(&hook.key, ObjectOutcome::Created, Some(HookPhase::PreSync)));
        }
        for wave in &plan.waves {
            for planned in &wave.applies {
                objects.push(dry(&planned.object.key, planned.action, None));
            }
        }
        for hook in &plan.sync_hooks {
            objects.push(dry(&hook.key, ObjectOutcome::Created, Some(HookPhase::Sync)));
        }
        for planned in &plan.prunes {
            objects.push(dry(&planned.live.key, ObjectOutcome::Deleted, None));
        }
        for hook in &plan.post_sync {
            objects.push(dry(&hook.key, ObjectOutcome::Created, Some(HookPhase::PostSync)));
        }

        SyncResult {
            id,
            revision: plan.revision.clone(),
            manifest_digest: digest,
            outcome: SyncOutcome::Succeeded,
            objects,
            dry_run: true,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

fn finish(
    id: Uuid,
    plan: &SyncPlan,
    digest: Option<ManifestDigest>,
    objects: Vec<ObjectResult>,
    outcome: SyncOutcome,
    started_at: chrono::DateTime<Utc>,
) -> SyncResult {
    SyncResult {
        id,
        revision: plan.revision.clone(),
        manifest_digest: digest,
        outcome,
        objects,
        dry_run: false,
        started_at,
        finished_at: Utc::now(),
    }
}

/// Stamp the ownership marker label so the Live State Observer tracks
/// the applied object.
fn with_tracking_label(object: &DesiredObject, app_name: &str) -> DesiredObject {
    let mut stamped = object.clone();
    let labels = stamped
        .body
        .as_object_mut()
        .and_then(|body| {
            let metadata = body
                .entry("metadata")
                .or_insert_with(|| serde_json::json!({}));
            metadata.as_object_mut()
        })
        .map(|metadata| {
            metadata
                .entry("labels")
                .or_insert_with(|| serde_json::json!({}))
        });
    if let Some(serde_json::Value::Object(labels)) = labels {
        labels.insert(
            MANAGED_BY_LABEL.to_string(),
            serde_json::Value::String(app_name.to_string()),
        );
    }
    stamped
}
