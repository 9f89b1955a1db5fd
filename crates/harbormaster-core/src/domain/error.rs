//! Engine-level error taxonomy.
//!
//! Every variant maps to one failure class of the reconciliation
//! cycle: render, observation, validation, apply, hook. All of them
//! bubble to the policy loop, which isolates cycles: an error in one
//! cycle schedules the next via backoff instead of terminating the
//! Application's reconciliation.

use harbormaster_cluster::{ClusterError, HookPhase, ObjectKey, RenderError};

use crate::domain::app::AppId;
use crate::domain::project::ProjectVerdict;

/// Harbormaster engine errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    #[error("observation failed for required kind {kind}: {reason}")]
    Observation { kind: String, reason: String },

    #[error("project validation rejected: {0}")]
    Validation(ProjectVerdict),

    #[error("{phase} hook {key} failed: {reason}")]
    Hook {
        phase: HookPhase,
        key: ObjectKey,
        reason: String,
    },

    #[error("rollback rejected: {0}")]
    RollbackRejected(String),

    #[error("no sync history entry {0}")]
    HistoryNotFound(uuid::Uuid),

    #[error("application not found: {0}")]
    AppNotFound(AppId),

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
