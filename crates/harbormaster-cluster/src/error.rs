//! Error taxonomy for the target-environment client and the renderer
//! contract.

use crate::object::ObjectKey;

/// Errors produced by the external renderer collaborator.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("bad source reference: {0}")]
    BadSource(String),

    #[error("unknown revision {revision} for {repo_ref}")]
    UnknownRevision { repo_ref: String, revision: String },

    #[error("template failure at {path}: {reason}")]
    Template { path: String, reason: String },

    #[error("malformed manifest: {0}")]
    MalformedManifest(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors produced by the target-environment client.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("apply failed for {key}: {reason}")]
    Apply { key: ObjectKey, reason: String },

    #[error("immutable field conflict on {key}: {field}")]
    Immutable { key: ObjectKey, field: String },

    #[error("delete failed for {key}: {reason}")]
    Delete { key: ObjectKey, reason: String },

    #[error("list failed for kind {kind} in {namespace}: {reason}")]
    List {
        kind: String,
        namespace: String,
        reason: String,
    },

    #[error("object not found: {0}")]
    NotFound(ObjectKey),

    #[error("malformed live object: {0}")]
    Malformed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for cluster client operations.
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;
