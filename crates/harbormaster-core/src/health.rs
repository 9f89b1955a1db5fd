//! Kind-specific health classification.
//!
//! Predicates are a registry of functions keyed by kind string with a
//! declared default: objects with no known predicate are Healthy when
//! present and Missing when absent from live state. Classification is
//! pure and re-run every cycle.

use std::collections::HashMap;

use harbormaster_cluster::{LiveObject, ObjectKey};

use crate::domain::status::HealthStatus;

/// A per-kind health predicate over a live object.
pub type HealthCheck = Box<dyn Fn(&LiveObject) -> HealthStatus + Send + Sync>;

/// Registry of health predicates keyed by kind string.
pub struct HealthRegistry {
    checks: HashMap<String, HealthCheck>,
}

impl HealthRegistry {
    /// Empty registry: every present object classifies Healthy.
    pub fn new() -> Self {
        Self {
            checks: HashMap::new(),
        }
    }

    /// Registry with the built-in predicates for replicated workloads
    /// and network-exposure objects.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in ["Deployment", "StatefulSet", "ReplicaSet"] {
            registry.register(kind, Box::new(workload_health));
        }
        registry.register("Service", Box::new(service_health));
        registry
    }

    /// Register or replace the predicate for `kind`.
    pub fn register(&mut self, kind: impl Into<String>, check: HealthCheck) {
        self.checks.insert(kind.into(), check);
    }

    /// Classify a single live object.
    pub fn status_of(&self, live: &LiveObject) -> HealthStatus {
        match self.checks.get(&live.key.kind) {
            Some(check) => check(live),
            None => HealthStatus::Healthy,
        }
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Classify every tracked object and derive the aggregate.
///
/// Tracked objects are the non-hook desired keys; an absent live
/// counterpart classifies Missing. Aggregate is worst-of under the
/// precedence declared on [`HealthStatus`].
pub fn evaluate(
    registry: &HealthRegistry,
    tracked: &[ObjectKey],
    live: &[LiveObject],
) -> (Vec<(ObjectKey, HealthStatus)>, HealthStatus) {
    let statuses: Vec<(ObjectKey, HealthStatus)> = tracked
        .iter()
        .map(|key| {
            let status = live
                .iter()
                .find(|l| &l.key == key)
                .map(|l| registry.status_of(l))
                .unwrap_or(HealthStatus::Missing);
            (key.clone(), status)
        })
        .collect();

    let aggregate = HealthStatus::aggregate(statuses.iter().map(|(_, s)| *s));
    (statuses, aggregate)
}

/// Replicated workload: Healthy iff observed-ready-count equals the
/// desired count and no failure condition is set.
fn workload_health(live: &LiveObject) -> HealthStatus {
    let desired = live
        .body
        .pointer("/spec/replicas")
        .and_then(|v| v.as_i64())
        .unwrap_or(1);
    let ready = live
        .body
        .pointer("/status/readyReplicas")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);

    let failed = live
        .body
        .pointer("/status/conditions")
        .and_then(|v| v.as_array())
        .map(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(|t| t.as_str()) == Some("ReplicaFailure")
                    && c.get("status").and_then(|s| s.as_str()) == Some("True")
            })
        })
        .unwrap_or(false);

    if failed {
        HealthStatus::Degraded
    } else if ready >= desired {
        HealthStatus::Healthy
    } else {
        HealthStatus::Progressing
    }
}

/// Network exposure: Healthy iff the object has a bound endpoint.
fn service_health(live: &LiveObject) -> HealthStatus {
    let is_load_balancer =
        live.body.pointer("/spec/type").and_then(|v| v.as_str()) == Some("LoadBalancer");
    if !is_load_balancer {
        return HealthStatus::Healthy;
    }

    let bound = live
        .body
        .pointer("/status/loadBalancer/ingress")
        .and_then(|v| v.as_array())
        .map(|ingress| !ingress.is_empty())
        .unwrap_or(false);
    if bound {
        HealthStatus::Healthy
    } else {
        HealthStatus::Progressing
    }
}
