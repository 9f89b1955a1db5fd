//! Derived sync and health classifications.
//!
//! Both statuses are pure functions of the current delta set and live
//! object status: they are recomputed every cycle and only the last
//! value is cached for display and policy decisions, never persisted as
//! authoritative.

use serde::{Deserialize, Serialize};

use crate::domain::history::SyncResult;

/// Whether the live state matches the rendered desired state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Synced,
    OutOfSync,
}

/// Health classification of an object or an Application aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Progressing,
    Degraded,
    Missing,
    Unknown,
}

impl HealthStatus {
    /// Aggregation precedence: `Degraded > Progressing > Missing >
    /// Unknown > Healthy`.
    fn severity(self) -> u8 {
        match self {
            HealthStatus::Degraded => 4,
            HealthStatus::Progressing => 3,
            HealthStatus::Missing => 2,
            HealthStatus::Unknown => 1,
            HealthStatus::Healthy => 0,
        }
    }

    /// The worse of two statuses under the aggregation precedence.
    pub fn worse_of(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    /// Worst-of aggregate; an empty set is `Healthy`.
    pub fn aggregate(statuses: impl IntoIterator<Item = Self>) -> Self {
        statuses
            .into_iter()
            .fold(HealthStatus::Healthy, Self::worse_of)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Progressing => "progressing",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Missing => "missing",
            HealthStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Display view of an Application's cached classifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppStatusView {
    /// `None` until the first Observing cycle completes.
    pub sync_status: Option<SyncStatus>,
    pub health_status: HealthStatus,
    pub last_result: Option<SyncResult>,
    /// Per-kind observation warnings from the latest snapshot.
    pub warnings: Vec<String>,
}
