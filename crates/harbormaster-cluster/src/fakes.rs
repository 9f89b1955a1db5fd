//! In-memory fakes for the collaborator traits (testing only).
//!
//! `FakeCluster` records every call with start/finish instants and
//! supports injectable apply latency, scripted apply failures, and
//! immutable-field conflicts, so ordering and no-call properties can be
//! asserted against it. `ScriptedRenderer` maps revisions to staged
//! manifest sets.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::{ClusterError, ClusterResult, RenderError};
use crate::object::{DesiredObject, LiveObject, ObjectKey, SourceRef};
use crate::traits::{ApplyOptions, ClusterClient, Renderer};

// ---------------------------------------------------------------------------
// FakeCluster
// ---------------------------------------------------------------------------

/// A single recorded client call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Apply(ObjectKey),
    Delete(ObjectKey),
    List { kind: String, namespace: String },
}

/// A call record with wall-clock bounds for ordering assertions.
#[derive(Debug, Clone)]
pub struct OpRecord {
    pub op: Op,
    pub started_at: Instant,
    pub finished_at: Instant,
}

/// In-memory target environment backed by a `BTreeMap<ObjectKey, body>`.
#[derive(Debug, Default)]
pub struct FakeCluster {
    objects: Mutex<BTreeMap<ObjectKey, serde_json::Value>>,
    ops: Mutex<Vec<OpRecord>>,
    apply_latency: Mutex<Duration>,
    fail_applies: Mutex<BTreeSet<ObjectKey>>,
    fail_lists: Mutex<BTreeSet<String>>,
    immutable: Mutex<BTreeSet<ObjectKey>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a live object directly, bypassing call recording.
    pub fn seed(&self, object: LiveObject) {
        let mut objects = self.objects.lock().unwrap();
        objects.insert(object.key, object.body);
    }

    /// Artificial latency added to every `apply`/`delete`.
    pub fn set_latency(&self, latency: Duration) {
        *self.apply_latency.lock().unwrap() = latency;
    }

    /// Make every `apply` of `key` fail.
    pub fn fail_apply(&self, key: ObjectKey) {
        self.fail_applies.lock().unwrap().insert(key);
    }

    /// Make every `list` of `kind` fail.
    pub fn fail_list(&self, kind: impl Into<String>) {
        self.fail_lists.lock().unwrap().insert(kind.into());
    }

    /// Mark `key` as having an immutable-field conflict: applies over an
    /// existing object fail unless `force` is set.
    pub fn mark_immutable(&self, key: ObjectKey) {
        self.immutable.lock().unwrap().insert(key);
    }

    /// All recorded calls in invocation order.
    pub fn ops(&self) -> Vec<OpRecord> {
        self.ops.lock().unwrap().clone()
    }

    /// Keys applied, in invocation order.
    pub fn applied_keys(&self) -> Vec<ObjectKey> {
        self.ops()
            .into_iter()
            .filter_map(|r| match r.op {
                Op::Apply(key) => Some(key),
                _ => None,
            })
            .collect()
    }

    /// Keys deleted, in invocation order.
    pub fn deleted_keys(&self) -> Vec<ObjectKey> {
        self.ops()
            .into_iter()
            .filter_map(|r| match r.op {
                Op::Delete(key) => Some(key),
                _ => None,
            })
            .collect()
    }

    /// Number of mutating calls (apply + delete) recorded.
    pub fn mutation_count(&self) -> usize {
        self.ops()
            .iter()
            .filter(|r| !matches!(r.op, Op::List { .. }))
            .count()
    }

    /// Current stored body for `key`, if present.
    pub fn body_of(&self, key: &ObjectKey) -> Option<serde_json::Value> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    fn record(&self, op: Op, started_at: Instant) {
        self.ops.lock().unwrap().push(OpRecord {
            op,
            started_at,
            finished_at: Instant::now(),
        });
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list(&self, kind: &str, namespace: &str) -> ClusterResult<Vec<LiveObject>> {
        let started_at = Instant::now();
        if self.fail_lists.lock().unwrap().contains(kind) {
            return Err(ClusterError::List {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                reason: "injected list failure".to_string(),
            });
        }
        let objects = self.objects.lock().unwrap();
        let result = objects
            .iter()
            .filter(|(key, _)| key.kind == kind && key.namespace == namespace)
            .map(|(key, body)| LiveObject::new(key.clone(), body.clone()))
            .collect();
        drop(objects);
        self.record(
            Op::List {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
            },
            started_at,
        );
        Ok(result)
    }

    async fn get(&self, key: &ObjectKey) -> ClusterResult<Option<LiveObject>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .get(key)
            .map(|body| LiveObject::new(key.clone(), body.clone())))
    }

    async fn apply(
        &self,
        desired: &DesiredObject,
        options: ApplyOptions,
    ) -> ClusterResult<LiveObject> {
        let started_at = Instant::now();
        let latency = *self.apply_latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.fail_applies.lock().unwrap().contains(&desired.key) {
            self.record(Op::Apply(desired.key.clone()), started_at);
            return Err(ClusterError::Apply {
                key: desired.key.clone(),
                reason: "injected apply failure".to_string(),
            });
        }

        let mut objects = self.objects.lock().unwrap();
        let exists = objects.contains_key(&desired.key);
        if exists && self.immutable.lock().unwrap().contains(&desired.key) && !options.force {
            drop(objects);
            self.record(Op::Apply(desired.key.clone()), started_at);
            return Err(ClusterError::Immutable {
                key: desired.key.clone(),
                field: "spec.selector".to_string(),
            });
        }

        objects.insert(desired.key.clone(), desired.body.clone());
        drop(objects);
        self.record(Op::Apply(desired.key.clone()), started_at);
        Ok(LiveObject::new(desired.key.clone(), desired.body.clone()))
    }

    async fn delete(&self, key: &ObjectKey) -> ClusterResult<()> {
        let started_at = Instant::now();
        let latency = *self.apply_latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.objects.lock().unwrap().remove(key);
        self.record(Op::Delete(key.clone()), started_at);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedRenderer
// ---------------------------------------------------------------------------

/// Renderer fake mapping revisions to staged manifest sets.
#[derive(Debug, Default)]
pub struct ScriptedRenderer {
    revisions: Mutex<BTreeMap<String, Vec<DesiredObject>>>,
    fail_revisions: Mutex<BTreeSet<String>>,
}

impl ScriptedRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage the manifest set rendered for `revision`.
    pub fn stage(&self, revision: impl Into<String>, objects: Vec<DesiredObject>) {
        self.revisions.lock().unwrap().insert(revision.into(), objects);
    }

    /// Make rendering `revision` fail with a template error.
    pub fn fail_revision(&self, revision: impl Into<String>) {
        self.fail_revisions.lock().unwrap().insert(revision.into());
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn render(&self, source: &SourceRef) -> Result<Vec<DesiredObject>, RenderError> {
        if self.fail_revisions.lock().unwrap().contains(&source.revision) {
            return Err(RenderError::Template {
                path: source.path.clone(),
                reason: "injected template failure".to_string(),
            });
        }
        self.revisions
            .lock()
            .unwrap()
            .get(&source.revision)
            .cloned()
            .ok_or_else(|| RenderError::UnknownRevision {
                repo_ref: source.repo_ref.clone(),
                revision: source.revision.clone(),
            })
    }
}
