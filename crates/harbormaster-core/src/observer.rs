//! Live State Observer.
//!
//! Maintains an eventually-consistent snapshot of the objects managed
//! by each Application. Each kind is listed concurrently under a
//! bounded timeout; per-kind failures degrade the snapshot to the
//! successfully fetched subset plus a per-kind error instead of failing
//! the whole call. The internal cache is refreshed on every snapshot
//! and can be invalidated by an external change notification, which
//! bypasses the poll timer.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::warn;

use harbormaster_cluster::{ClusterClient, LiveObject, ObjectKey, MANAGED_BY_LABEL};

use crate::domain::app::AppId;

/// A per-kind observation failure inside an otherwise usable snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindError {
    pub kind: String,
    pub reason: String,
}

/// One observation of an Application's managed objects.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub objects: Vec<LiveObject>,
    /// Kinds that could not be listed this cycle.
    pub errors: Vec<KindError>,
    pub taken_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Observer over one cluster client, caching per Application.
pub struct LiveStateObserver {
    client: std::sync::Arc<dyn ClusterClient>,
    cache: Mutex<HashMap<AppId, Snapshot>>,
    kind_timeout: Duration,
}

impl LiveStateObserver {
    pub fn new(client: std::sync::Arc<dyn ClusterClient>, kind_timeout: Duration) -> Self {
        Self {
            client,
            cache: Mutex::new(HashMap::new()),
            kind_timeout,
        }
    }

    /// Observe the current live state for `app`.
    ///
    /// `kinds` is the tracked kind set (from the rendered desired set
    /// plus previously cached objects); `desired_keys` supplements the
    /// ownership-marker selection so unlabeled objects that match a
    /// desired key are still tracked. Never blocks longer than the
    /// per-kind timeout times the snapshot's kind count.
    pub async fn snapshot(
        &self,
        app: &AppId,
        namespace: &str,
        kinds: &BTreeSet<String>,
        desired_keys: &BTreeSet<ObjectKey>,
    ) -> Snapshot {
        let fetches = kinds.iter().map(|kind| {
            let client = std::sync::Arc::clone(&self.client);
            async move {
                let result =
                    tokio::time::timeout(self.kind_timeout, client.list(kind, namespace)).await;
                match result {
                    Ok(Ok(objects)) => Ok(objects),
                    Ok(Err(e)) => Err(KindError {
                        kind: kind.clone(),
                        reason: e.to_string(),
                    }),
                    Err(_) => Err(KindError {
                        kind: kind.clone(),
                        reason: format!("list timed out after {:?}", self.kind_timeout),
                    }),
                }
            }
        });

        let mut objects = Vec::new();
        let mut errors = Vec::new();
        for result in join_all(fetches).await {
            match result {
                Ok(listed) => objects.extend(
                    listed
                        .into_iter()
                        .filter(|l| self.tracks(app, l, desired_keys)),
                ),
                Err(e) => {
                    warn!(app = %app, kind = %e.kind, reason = %e.reason, "partial observation");
                    errors.push(e);
                }
            }
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));

        let snapshot = Snapshot {
            objects,
            errors,
            taken_at: Utc::now(),
        };
        self.cache
            .lock()
            .unwrap()
            .insert(app.clone(), snapshot.clone());
        snapshot
    }

    /// Last snapshot taken for `app`, if any.
    pub fn cached(&self, app: &AppId) -> Option<Snapshot> {
        self.cache.lock().unwrap().get(app).cloned()
    }

    /// Kinds seen in the last snapshot; prune candidates keep being
    /// observed even after they leave the desired set.
    pub fn cached_kinds(&self, app: &AppId) -> BTreeSet<String> {
        self.cache
            .lock()
            .unwrap()
            .get(app)
            .map(|s| s.objects.iter().map(|o| o.key.kind.clone()).collect())
            .unwrap_or_default()
    }

    /// External change notification: drop the cached snapshot so the
    /// next cycle re-observes immediately.
    pub fn invalidate(&self, app: &AppId) {
        self.cache.lock().unwrap().remove(app);
    }

    fn tracks(&self, app: &AppId, live: &LiveObject, desired_keys: &BTreeSet<ObjectKey>) -> bool {
        live.label(MANAGED_BY_LABEL) == Some(app.as_str()) || desired_keys.contains(&live.key)
    }
}
