//! Multi-Application controller: one strictly-sequential policy loop
//! per Application, a global worker pool bounding concurrent sync runs,
//! and the operator surface (sync, diff, history, rollback, status,
//! suspend, cascade delete).
//!
//! Cycles are isolated: an error in one cycle is recorded and schedules
//! the next cycle via backoff; the loop task never terminates on it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use harbormaster_cluster::{
    ClusterClient, DesiredObject, ManifestDigest, ObjectKey, Renderer,
};

use crate::diff::{diff, Delta, DiffConfig};
use crate::domain::{
    validate_app, AppId, AppStatusView, Application, EngineError, HealthStatus, Project, Result,
    SyncHistory, SyncOutcome, SyncResult, SyncStatus,
};
use crate::health::{evaluate, HealthRegistry};
use crate::observer::{LiveStateObserver, Snapshot};
use crate::obs;
use crate::policy::{evaluate_policy, PolicyDecision, WakeSource};
use crate::sync::{build_plan, CancelFlag, SyncOptions, SyncOrchestrator};

/// Controller tuning knobs.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Poll interval between Observing cycles.
    pub poll_interval: Duration,
    /// Per-kind observation timeout.
    pub kind_timeout: Duration,
    /// Global cap on concurrent sync runs across all Applications.
    pub max_concurrent_syncs: usize,
    /// Sync results retained per Application.
    pub history_retention: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(180),
            kind_timeout: Duration::from_secs(10),
            max_concurrent_syncs: 4,
            history_retention: 32,
        }
    }
}

/// What one reconcile cycle observed and decided.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub app: AppId,
    pub observed: usize,
    pub drifted: usize,
    pub decision: PolicyDecision,
    pub sync_status: SyncStatus,
    pub health: HealthStatus,
    /// Run id when the cycle invoked the orchestrator.
    pub run_id: Option<Uuid>,
}

/// Mutable per-Application state, exclusive during loop transitions.
struct AppState {
    app: Application,
    suspended: bool,
    history: SyncHistory,
    sync_status: Option<SyncStatus>,
    health: HealthStatus,
    warnings: Vec<String>,
    /// Failed automatic attempts on `failed_revision`, for backoff and
    /// the retry budget.
    failed_attempts: u32,
    failed_revision: Option<String>,
    cancel: CancelFlag,
    notify: Arc<Notify>,
}

impl AppState {
    fn new(app: Application, retention: usize) -> Self {
        Self {
            app,
            suspended: false,
            history: SyncHistory::new(retention),
            sync_status: None,
            health: HealthStatus::Unknown,
            warnings: Vec::new(),
            failed_attempts: 0,
            failed_revision: None,
            cancel: CancelFlag::new(),
            notify: Arc::new(Notify::new()),
        }
    }
}

/// The reconciliation controller.
pub struct Controller {
    renderer: Arc<dyn Renderer>,
    orchestrator: SyncOrchestrator,
    observer: LiveStateObserver,
    health: HealthRegistry,
    diff_config: DiffConfig,
    projects: Mutex<BTreeMap<String, Project>>,
    apps: Mutex<BTreeMap<AppId, Arc<Mutex<AppState>>>>,
    sync_permits: Arc<Semaphore>,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        client: Arc<dyn ClusterClient>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            renderer,
            orchestrator: SyncOrchestrator::new(Arc::clone(&client)),
            observer: LiveStateObserver::new(client, config.kind_timeout),
            health: HealthRegistry::with_defaults(),
            diff_config: DiffConfig::default(),
            projects: Mutex::new(BTreeMap::new()),
            apps: Mutex::new(BTreeMap::new()),
            sync_permits: Arc::new(Semaphore::new(config.max_concurrent_syncs.max(1))),
            config,
        }
    }

    /// Replace the health predicate registry.
    pub fn with_health_registry(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    /// Replace the diff configuration.
    pub fn with_diff_config(mut self, diff_config: DiffConfig) -> Self {
        self.diff_config = diff_config;
        self
    }

    // -----------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------

    /// Install or replace a Project scope.
    pub async fn upsert_project(&self, project: Project) {
        self.projects
            .lock()
            .await
            .insert(project.name.clone(), project);
    }

    /// Register an Application for reconciliation.
    pub async fn register_app(&self, app: Application) {
        self.register_app_with_history(app, Vec::new()).await;
    }

    /// Register an Application seeded with previously persisted history
    /// (oldest first).
    pub async fn register_app_with_history(&self, app: Application, entries: Vec<SyncResult>) {
        let id = app.id();
        let mut state = AppState::new(app, self.config.history_retention);
        for entry in entries {
            state.history.append(entry);
        }
        self.apps
            .lock()
            .await
            .insert(id, Arc::new(Mutex::new(state)));
    }

    /// Update an Application's declaration in place, keeping its
    /// history and runtime state.
    pub async fn update_app(&self, app: Application) -> Result<()> {
        let state_arc = self.app_state(&app.id()).await?;
        let mut state = state_arc.lock().await;
        state.app = app;
        Ok(())
    }

    /// Remove an Application from reconciliation. With `cascade`, every
    /// managed live object is deleted first (reverse-wave order).
    pub async fn remove_app(&self, id: &AppId, cascade: bool) -> Result<Option<SyncResult>> {
        let state_arc = self
            .apps
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| EngineError::AppNotFound(id.clone()))?;

        let state = state_arc.lock().await;
        let app = state.app.clone();
        // Wake the loop task so it observes the removal and exits.
        state.notify.notify_one();
        drop(state);

        if !cascade {
            return Ok(None);
        }

        let kinds = self.observer.cached_kinds(id);
        let snapshot = self
            .observer
            .snapshot(id, &app.destination.namespace, &kinds, &BTreeSet::new())
            .await;
        let deltas: Vec<Delta> = snapshot
            .objects
            .into_iter()
            .map(|live| Delta::Extra { live })
            .collect();
        let plan = build_plan(&app.source.revision, &[], &deltas, true);

        let _permit = self.sync_permits.acquire().await.ok();
        let cancel = CancelFlag::new();
        let result = self
            .orchestrator
            .execute(&app.name, &plan, None, SyncOptions::default(), &cancel)
            .await;
        self.observer.invalidate(id);
        Ok(Some(result))
    }

    /// Registered Application ids.
    pub async fn app_ids(&self) -> Vec<AppId> {
        self.apps.lock().await.keys().cloned().collect()
    }

    // -----------------------------------------------------------------
    // Policy loop
    // -----------------------------------------------------------------

    /// Run one Observing cycle for `id`: render, validate, observe,
    /// diff, classify health, evaluate policy, and sync when the policy
    /// allows it.
    pub async fn reconcile_once(&self, id: &AppId) -> Result<CycleOutcome> {
        let state_arc = self.app_state(id).await?;
        let mut state = state_arc.lock().await;
        let app = state.app.clone();
        obs::emit_cycle_started(&app.name, &app.source.revision);

        let project = self.project_snapshot(&app.project).await?;
        let (desired, snapshot, deltas, aggregate) = self.survey(id, &app).await?;

        let verdict = validate_app(&project, &app, &desired);
        if !verdict.passed() {
            return Err(EngineError::Validation(verdict));
        }

        state.warnings = snapshot
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.kind, e.reason))
            .collect();
        state.health = aggregate;

        let drifted = deltas.iter().filter(|d| d.is_drift()).count();
        if drifted > 0 {
            obs::emit_drift_detected(&app.name, drifted, snapshot.objects.len());
        }

        let attempts = if state.failed_revision.as_deref() == Some(app.source.revision.as_str()) {
            state.failed_attempts
        } else {
            0
        };
        let decision = evaluate_policy(
            &app.sync_policy,
            state.suspended,
            drifted > 0,
            &app.source.revision,
            state.history.last_synced_revision(),
            attempts,
        );

        match decision {
            PolicyDecision::NoDrift => {
                state.sync_status = Some(SyncStatus::Synced);
                state.failed_attempts = 0;
                state.failed_revision = None;
                obs::emit_policy_decision(&app.name, "in_sync");
                Ok(CycleOutcome {
                    app: id.clone(),
                    observed: snapshot.objects.len(),
                    drifted,
                    decision,
                    sync_status: SyncStatus::Synced,
                    health: aggregate,
                    run_id: None,
                })
            }
            PolicyDecision::OutOfSyncNoAction { ref reason } => {
                state.sync_status = Some(SyncStatus::OutOfSync);
                obs::emit_policy_decision(&app.name, reason);
                Ok(CycleOutcome {
                    app: id.clone(),
                    observed: snapshot.objects.len(),
                    drifted,
                    decision: decision.clone(),
                    sync_status: SyncStatus::OutOfSync,
                    health: aggregate,
                    run_id: None,
                })
            }
            PolicyDecision::Sync => {
                obs::emit_policy_decision(&app.name, "sync");
                let result = self
                    .run_sync(&mut state, &app, &desired, &deltas, SyncOptions::default())
                    .await;
                let sync_status = state.sync_status.unwrap_or(SyncStatus::OutOfSync);
                Ok(CycleOutcome {
                    app: id.clone(),
                    observed: snapshot.objects.len(),
                    drifted,
                    decision: PolicyDecision::Sync,
                    sync_status,
                    health: aggregate,
                    run_id: Some(result.id),
                })
            }
        }
    }

    /// Spawn the continuous policy loop for `id`. The task exits when
    /// the Application is removed.
    pub fn spawn_loop(self: Arc<Self>, id: AppId) -> JoinHandle<()> {
        let controller = self;
        tokio::spawn(async move {
            loop {
                let Some(state_arc) = controller.try_app_state(&id).await else {
                    break;
                };
                let (notify, delay) = {
                    let state = state_arc.lock().await;
                    let delay = if state.failed_attempts > 0 {
                        state.app.sync_policy.retry.delay_for(state.failed_attempts)
                    } else {
                        controller.config.poll_interval
                    };
                    (Arc::clone(&state.notify), delay)
                };

                WakeSource::new(notify).next(delay).await;
                if controller.try_app_state(&id).await.is_none() {
                    break;
                }

                match controller.reconcile_once(&id).await {
                    Ok(outcome) => {
                        info!(
                            app = %id,
                            observed = outcome.observed,
                            drifted = outcome.drifted,
                            health = %outcome.health,
                            "cycle finished"
                        );
                    }
                    Err(e) => {
                        // Cycle isolation: record and back off, never die.
                        obs::emit_cycle_error(id.as_str(), &e);
                        if let Some(state_arc) = controller.try_app_state(&id).await {
                            let mut state = state_arc.lock().await;
                            state.failed_attempts = state.failed_attempts.saturating_add(1);
                            let revision = state.app.source.revision.clone();
                            state.failed_revision = Some(revision);
                        }
                    }
                }
            }
            info!(app = %id, "policy loop stopped");
        })
    }

    /// External change notification: bypass the poll timer for `id`.
    pub async fn notify(&self, id: &AppId) -> Result<()> {
        let state_arc = self.app_state(id).await?;
        self.observer.invalidate(id);
        let state = state_arc.lock().await;
        state.notify.notify_one();
        Ok(())
    }

    // -----------------------------------------------------------------
    // Operator surface
    // -----------------------------------------------------------------

    /// Manual sync, independent of the automation policy.
    pub async fn sync(&self, id: &AppId, options: SyncOptions) -> Result<SyncResult> {
        let state_arc = self.app_state(id).await?;
        let mut state = state_arc.lock().await;
        let app = state.app.clone();

        let project = self.project_snapshot(&app.project).await?;
        let (desired, _snapshot, deltas, _health) = self.survey(id, &app).await?;
        let verdict = validate_app(&project, &app, &desired);
        if !verdict.passed() {
            return Err(EngineError::Validation(verdict));
        }

        Ok(self
            .run_sync(&mut state, &app, &desired, &deltas, options)
            .await)
    }

    /// Roll back to the revision recorded in history entry `result_id`.
    ///
    /// Forbidden while automated sync is enabled and the app is not
    /// suspended, because the loop would immediately re-drift the target back
    /// to the newest revision.
    pub async fn rollback(&self, id: &AppId, result_id: Uuid) -> Result<SyncResult> {
        let state_arc = self.app_state(id).await?;
        let mut state = state_arc.lock().await;
        let app = state.app.clone();

        if app.sync_policy.automated && !state.suspended {
            return Err(EngineError::RollbackRejected(
                "automated sync is enabled; disable or suspend it first".to_string(),
            ));
        }

        let revision = state
            .history
            .get(result_id)
            .ok_or(EngineError::HistoryNotFound(result_id))?
            .revision
            .clone();

        let mut rolled = app.clone();
        rolled.source.revision = revision;

        let project = self.project_snapshot(&rolled.project).await?;
        let (desired, _snapshot, deltas, _health) = self.survey(id, &rolled).await?;
        let verdict = validate_app(&project, &rolled, &desired);
        if !verdict.passed() {
            return Err(EngineError::Validation(verdict));
        }

        Ok(self
            .run_sync(&mut state, &rolled, &desired, &deltas, SyncOptions::default())
            .await)
    }

    /// Current delta set without acting on it.
    pub async fn diff_app(&self, id: &AppId) -> Result<Vec<Delta>> {
        let state_arc = self.app_state(id).await?;
        let state = state_arc.lock().await;
        let app = state.app.clone();
        drop(state);

        let (_desired, _snapshot, deltas, _health) = self.survey(id, &app).await?;
        Ok(deltas)
    }

    /// Re-observe and re-classify without taking corrective action.
    pub async fn refresh_status(&self, id: &AppId) -> Result<AppStatusView> {
        let state_arc = self.app_state(id).await?;
        let mut state = state_arc.lock().await;
        let app = state.app.clone();

        let (_desired, snapshot, deltas, aggregate) = self.survey(id, &app).await?;
        state.warnings = snapshot
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.kind, e.reason))
            .collect();
        state.health = aggregate;
        let drift = deltas.iter().any(|d| d.is_drift());
        state.sync_status = Some(if drift {
            SyncStatus::OutOfSync
        } else {
            SyncStatus::Synced
        });

        Ok(AppStatusView {
            sync_status: state.sync_status,
            health_status: state.health,
            last_result: state.history.latest().cloned(),
            warnings: state.warnings.clone(),
        })
    }

    /// Cached classifications and last run for display.
    pub async fn status(&self, id: &AppId) -> Result<AppStatusView> {
        let state_arc = self.app_state(id).await?;
        let state = state_arc.lock().await;
        Ok(AppStatusView {
            sync_status: state.sync_status,
            health_status: state.health,
            last_result: state.history.latest().cloned(),
            warnings: state.warnings.clone(),
        })
    }

    /// Run history, newest first.
    pub async fn history(&self, id: &AppId) -> Result<Vec<SyncResult>> {
        let state_arc = self.app_state(id).await?;
        let state = state_arc.lock().await;
        Ok(state.history.newest_first())
    }

    /// Suspend or resume automatic corrective action. A suspended
    /// Application keeps observing and reporting drift.
    pub async fn set_suspended(&self, id: &AppId, suspended: bool) -> Result<()> {
        let state_arc = self.app_state(id).await?;
        let mut state = state_arc.lock().await;
        state.suspended = suspended;
        Ok(())
    }

    /// Request cancellation of the in-flight run; takes effect at the
    /// next wave boundary.
    pub async fn cancel_sync(&self, id: &AppId) -> Result<()> {
        let state_arc = self.app_state(id).await?;
        let state = state_arc.lock().await;
        state.cancel.cancel();
        Ok(())
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    async fn run_sync(
        &self,
        state: &mut AppState,
        app: &Application,
        desired: &[DesiredObject],
        deltas: &[Delta],
        options: SyncOptions,
    ) -> SyncResult {
        let plan = build_plan(&app.source.revision, desired, deltas, app.sync_policy.prune);
        let digest = ManifestDigest::of_manifests(desired);

        // Global worker pool: caps concurrent apply pressure on the
        // target environment.
        let _permit = self.sync_permits.acquire().await.ok();
        state.cancel.reset();
        let result = self
            .orchestrator
            .execute(&app.name, &plan, Some(digest), options, &state.cancel)
            .await;

        obs::emit_sync_finished(
            &app.name,
            &result.id.to_string(),
            &result.outcome,
            result.duration_ms(),
        );

        if !options.dry_run {
            state.history.append(result.clone());
            match &result.outcome {
                SyncOutcome::Succeeded => {
                    state.sync_status = Some(SyncStatus::Synced);
                    state.failed_attempts = 0;
                    state.failed_revision = None;
                }
                SyncOutcome::Failed { .. } => {
                    state.sync_status = Some(SyncStatus::OutOfSync);
                    if state.failed_revision.as_deref() == Some(app.source.revision.as_str()) {
                        state.failed_attempts = state.failed_attempts.saturating_add(1);
                    } else {
                        state.failed_revision = Some(app.source.revision.clone());
                        state.failed_attempts = 1;
                    }
                }
                SyncOutcome::Aborted | SyncOutcome::OutOfSyncNoAction { .. } => {
                    state.sync_status = Some(SyncStatus::OutOfSync);
                }
            }
        }
        result
    }

    /// One shared Observing pass: render, observe, diff, classify.
    async fn survey(
        &self,
        id: &AppId,
        app: &Application,
    ) -> Result<(Vec<DesiredObject>, Snapshot, Vec<Delta>, HealthStatus)> {
        let desired = self.render(app).await?;
        let snapshot = self.observe(id, app, &desired).await?;
        let deltas = diff(
            &desired,
            &snapshot.objects,
            &app.ignore_differences,
            &self.diff_config,
        );
        let tracked: Vec<ObjectKey> = desired
            .iter()
            .filter(|d| !d.is_hook())
            .map(|d| d.key.clone())
            .collect();
        let (_, aggregate) = evaluate(&self.health, &tracked, &snapshot.objects);
        Ok((desired, snapshot, deltas, aggregate))
    }

    async fn render(&self, app: &Application) -> Result<Vec<DesiredObject>> {
        let mut source = app.source.clone();
        source
            .params
            .entry("namespace".to_string())
            .or_insert_with(|| app.destination.namespace.clone());
        Ok(self.renderer.render(&source).await?)
    }

    /// Observe live state; aborts the cycle when a kind required by the
    /// desired set cannot be listed.
    async fn observe(
        &self,
        id: &AppId,
        app: &Application,
        desired: &[DesiredObject],
    ) -> Result<Snapshot> {
        let required: BTreeSet<String> = desired
            .iter()
            .filter(|d| !d.is_hook())
            .map(|d| d.key.kind.clone())
            .collect();
        let mut kinds = required.clone();
        kinds.extend(self.observer.cached_kinds(id));

        let desired_keys: BTreeSet<ObjectKey> =
            desired.iter().map(|d| d.key.clone()).collect();
        let snapshot = self
            .observer
            .snapshot(id, &app.destination.namespace, &kinds, &desired_keys)
            .await;

        if let Some(failed) = snapshot.errors.iter().find(|e| required.contains(&e.kind)) {
            return Err(EngineError::Observation {
                kind: failed.kind.clone(),
                reason: failed.reason.clone(),
            });
        }
        Ok(snapshot)
    }

    async fn project_snapshot(&self, name: &str) -> Result<Project> {
        self.projects
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::ProjectNotFound(name.to_string()))
    }

    async fn app_state(&self, id: &AppId) -> Result<Arc<Mutex<AppState>>> {
        self.try_app_state(id)
            .await
            .ok_or_else(|| EngineError::AppNotFound(id.clone()))
    }

    async fn try_app_state(&self, id: &AppId) -> Option<Arc<Mutex<AppState>>> {
        self.apps.lock().await.get(id).cloned()
    }
}
