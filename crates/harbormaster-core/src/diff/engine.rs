//! Desired/live delta computation.
//!
//! Outer join on the `(kind, namespace, name)` identity key. Modified
//! candidates are normalized first: system fields and user ignore-rules
//! are scrubbed from both sides, and sequences declared unordered for
//! the kind are canonicalized, so platform-injected noise never counts
//! as drift. Diffing is pure and deterministic.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use harbormaster_cluster::{DesiredObject, LiveObject, ObjectKey};

use crate::diff::ignore::{apply_ignore_rules, scrub_system_fields};
use crate::domain::app::IgnoreRule;

/// One element of the typed delta set.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    /// Desired but not live.
    Missing { desired: DesiredObject },
    /// Live but not desired; prune candidate.
    Extra { live: LiveObject },
    /// Both exist and differ outside the ignore-rules.
    Modified {
        desired: DesiredObject,
        live: LiveObject,
    },
    Unchanged { key: ObjectKey },
}

impl Delta {
    pub fn key(&self) -> &ObjectKey {
        match self {
            Delta::Missing { desired } => &desired.key,
            Delta::Extra { live } => &live.key,
            Delta::Modified { desired, .. } => &desired.key,
            Delta::Unchanged { key } => key,
        }
    }

    /// True for any delta that represents drift.
    pub fn is_drift(&self) -> bool {
        !matches!(self, Delta::Unchanged { .. })
    }
}

/// True when the delta set contains any drift.
pub fn has_drift(deltas: &[Delta]) -> bool {
    deltas.iter().any(Delta::is_drift)
}

/// Per-kind declaration of sequence paths compared order-insensitively.
#[derive(Debug, Clone)]
pub struct DiffConfig {
    unordered_paths: BTreeMap<String, Vec<String>>,
}

impl Default for DiffConfig {
    /// Standard declarations: service port lists carry no ordering
    /// semantics.
    fn default() -> Self {
        let mut unordered_paths = BTreeMap::new();
        unordered_paths.insert(
            "Service".to_string(),
            vec!["/spec/ports".to_string()],
        );
        Self { unordered_paths }
    }
}

impl DiffConfig {
    pub fn empty() -> Self {
        Self {
            unordered_paths: BTreeMap::new(),
        }
    }

    /// Declare a sequence at `path` unordered for `kind`.
    pub fn with_unordered(mut self, kind: impl Into<String>, path: impl Into<String>) -> Self {
        self.unordered_paths
            .entry(kind.into())
            .or_default()
            .push(path.into());
        self
    }

    fn canonicalize(&self, kind: &str, body: &mut Value) {
        let Some(paths) = self.unordered_paths.get(kind) else {
            return;
        };
        for path in paths {
            if let Some(node) = body.pointer_mut(path) {
                if let Value::Array(items) = node {
                    items.sort_by_key(|item| item.to_string());
                }
            }
        }
    }
}

/// Compute the delta set between a rendered desired set and a live
/// snapshot.
///
/// Hook-tagged objects are excluded on both sides: desired hooks are
/// re-applied every run by the orchestrator and never tracked as drift,
/// and live hook leftovers are not prune candidates.
pub fn diff(
    desired: &[DesiredObject],
    live: &[LiveObject],
    rules: &[IgnoreRule],
    config: &DiffConfig,
) -> Vec<Delta> {
    let desired_by_key: BTreeMap<&ObjectKey, &DesiredObject> = desired
        .iter()
        .filter(|d| !d.is_hook())
        .map(|d| (&d.key, d))
        .collect();
    let live_by_key: BTreeMap<&ObjectKey, &LiveObject> = live
        .iter()
        .filter(|l| !l.is_hook())
        .map(|l| (&l.key, l))
        .collect();

    let keys: BTreeSet<&ObjectKey> = desired_by_key
        .keys()
        .chain(live_by_key.keys())
        .copied()
        .collect();

    keys.into_iter()
        .map(|key| match (desired_by_key.get(key), live_by_key.get(key)) {
            (Some(d), None) => Delta::Missing {
                desired: (*d).clone(),
            },
            (None, Some(l)) => Delta::Extra { live: (*l).clone() },
            (Some(d), Some(l)) => {
                let lhs = normalize(&d.body, key, rules, config);
                let rhs = normalize(&l.body, key, rules, config);
                if lhs == rhs {
                    Delta::Unchanged { key: key.clone() }
                } else {
                    Delta::Modified {
                        desired: (*d).clone(),
                        live: (*l).clone(),
                    }
                }
            }
            (None, None) => unreachable!("key came from one of the two maps"),
        })
        .collect()
}

fn normalize(body: &Value, key: &ObjectKey, rules: &[IgnoreRule], config: &DiffConfig) -> Value {
    let mut value = body.clone();
    scrub_system_fields(&mut value);
    apply_ignore_rules(&mut value, key, rules);
    config.canonicalize(&key.kind, &mut value);
    value
}
