//! Application declarations: the unit of reconciliation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use harbormaster_cluster::SourceRef;

/// Identity of an Application within the controller.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AppId(pub String);

impl AppId {
    pub fn new(name: impl Into<String>) -> Self {
        AppId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AppId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Target environment and namespace an Application deploys into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// Target environment identifier (cluster name/URL equivalent).
    pub target: String,
    pub namespace: String,
}

/// Bounded backoff policy for re-checking after a failed sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Automatic re-sync attempts per failing revision before requiring
    /// manual intervention.
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 5,
            max_delay_secs: 300,
            factor: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay before re-check number `attempt` (1-based), capped
    /// exponential.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let factor = u64::from(self.factor).max(1);
        let delay = factor
            .checked_pow(exp)
            .and_then(|f| f.checked_mul(self.base_delay_secs))
            .unwrap_or(self.max_delay_secs);
        Duration::from_secs(delay.min(self.max_delay_secs))
    }
}

/// Sync policy of an Application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPolicy {
    /// Apply corrective syncs without a manual trigger.
    pub automated: bool,
    /// Delete live objects with no desired counterpart.
    pub prune: bool,
    /// Re-sync an already-synced revision when live state drifts.
    pub self_heal: bool,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            automated: false,
            prune: false,
            self_heal: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// A field-path exclusion applied before diffing.
///
/// `path` is a JSON pointer where `*` matches exactly one segment.
/// `kind`/`name` scope the rule to matching objects; `None` matches all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreRule {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub path: String,
}

/// The unit of reconciliation: a declared source, a destination, and
/// the policy governing corrective action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub name: String,
    /// Project scope this Application must validate against.
    pub project: String,
    pub source: SourceRef,
    pub destination: Destination,
    #[serde(default)]
    pub sync_policy: SyncPolicy,
    #[serde(default)]
    pub ignore_differences: Vec<IgnoreRule>,
}

impl Application {
    pub fn id(&self) -> AppId {
        AppId::new(self.name.clone())
    }
}
