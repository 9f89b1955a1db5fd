//! Sync run records and the bounded per-Application history.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use harbormaster_cluster::{HookPhase, ManifestDigest, ObjectKey};

/// What happened to a single object during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectOutcome {
    Created,
    Updated,
    Deleted,
    NoOp,
    Failed,
}

/// Per-object record within a [`SyncResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectResult {
    pub key: ObjectKey,
    pub outcome: ObjectOutcome,
    /// Hook phase when the object was applied as a lifecycle hook.
    #[serde(default)]
    pub hook: Option<HookPhase>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Aggregate outcome of one sync invocation.
///
/// `OutOfSyncNoAction` is returned when policy declined to run; such
/// invocations are never appended to history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncOutcome {
    Succeeded,
    Failed { reason: String },
    Aborted,
    OutOfSyncNoAction { reason: String },
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Succeeded)
    }
}

/// Immutable record of one orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub id: Uuid,
    /// Source revision the run applied.
    pub revision: String,
    /// Digest of the rendered manifest set.
    pub manifest_digest: Option<ManifestDigest>,
    pub outcome: SyncOutcome,
    pub objects: Vec<ObjectResult>,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncResult {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Bounded, append-only run history owned by one Application.
///
/// The oldest entry is evicted beyond the retention count. Reads are
/// newest-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncHistory {
    retention: usize,
    entries: VecDeque<SyncResult>,
}

impl SyncHistory {
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Append a run record, evicting the oldest beyond retention.
    pub fn append(&mut self, result: SyncResult) {
        self.entries.push_back(result);
        while self.entries.len() > self.retention {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent run, if any.
    pub fn latest(&self) -> Option<&SyncResult> {
        self.entries.back()
    }

    pub fn get(&self, id: Uuid) -> Option<&SyncResult> {
        self.entries.iter().find(|r| r.id == id)
    }

    /// Revision of the most recent successful run.
    pub fn last_synced_revision(&self) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|r| r.outcome.is_success())
            .map(|r| r.revision.as_str())
    }

    /// All entries, newest first.
    pub fn newest_first(&self) -> Vec<SyncResult> {
        self.entries.iter().rev().cloned().collect()
    }
}
