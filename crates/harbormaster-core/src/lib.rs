//! Harbormaster Core Library
//!
//! The reconciliation engine: desired/live state diffing, sync-wave and
//! hook ordered application, health evaluation, and the
//! auto-sync/self-heal policy loop. Source rendering and the target
//! environment are consumed through the `harbormaster-cluster` traits.

pub mod controller;
pub mod diff;
pub mod domain;
pub mod health;
pub mod obs;
pub mod observer;
pub mod policy;
pub mod sync;
pub mod telemetry;

pub use controller::{Controller, ControllerConfig, CycleOutcome};

pub use diff::{diff, has_drift, Delta, DiffConfig, SYSTEM_FIELD_PATHS};

pub use domain::{
    validate_app, AppId, AppStatusView, Application, Destination, EngineError, HealthStatus,
    IgnoreRule, ObjectOutcome, ObjectResult, Project, ProjectRule, ProjectVerdict,
    ProjectViolation, Result, RetryPolicy, SyncHistory, SyncOutcome, SyncPolicy, SyncResult,
    SyncStatus,
};

pub use health::{evaluate, HealthCheck, HealthRegistry};

pub use observer::{KindError, LiveStateObserver, Snapshot};

pub use policy::{evaluate_policy, PolicyDecision, Wake, WakeSource};

pub use sync::{
    build_plan, kind_priority, CancelFlag, SyncOptions, SyncOrchestrator, SyncPlan,
    KIND_APPLY_ORDER,
};

pub use obs::ReconcileSpan;
pub use telemetry::init_tracing;

/// Harbormaster version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
