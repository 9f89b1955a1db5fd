//! Collaborator contracts for the reconciliation engine.
//!
//! These traits define the two external seams:
//! - `Renderer`: turns a `(repo_ref, revision, path, params)` tuple into
//!   a list of target manifests
//! - `ClusterClient`: get/list/apply/delete on typed resources in the
//!   target environment
//!
//! All traits are async and backend-agnostic. In-memory fakes are
//! provided for testing via the `fakes` module; file-backed
//! implementations live in `fs`. The platform's watch mechanism is not
//! part of `ClusterClient`: change notifications feed the policy
//! loop's wake channel instead.

use async_trait::async_trait;

use crate::error::{ClusterResult, RenderError};
use crate::object::{DesiredObject, LiveObject, ObjectKey, SourceRef};

/// Per-apply options forwarded from the sync orchestrator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// Resolve immutable-field conflicts by delete-and-recreate.
    pub force: bool,
}

/// Renders a versioned source into a desired object set.
///
/// Guarantees:
/// - Rendering is read-only; it never mutates the source or the target
///   environment.
/// - The same `SourceRef` renders to the same manifest set.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Render the manifests at `source`. Fails with `RenderError` on a
    /// bad source reference or template failure; no partial set is
    /// returned.
    async fn render(&self, source: &SourceRef) -> Result<Vec<DesiredObject>, RenderError>;
}

/// Client for the target environment's object store.
///
/// Guarantees:
/// - `apply` is acknowledged only once the object is durably accepted;
///   the returned `LiveObject` reflects the stored body.
/// - `apply` with `force` resolves immutable-field conflicts by
///   delete-and-recreate; without it such conflicts surface as
///   `ClusterError::Immutable`.
/// - `delete` of an absent object is a no-op.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List all objects of `kind` in `namespace`.
    async fn list(&self, kind: &str, namespace: &str) -> ClusterResult<Vec<LiveObject>>;

    /// Fetch a single object, `None` if absent.
    async fn get(&self, key: &ObjectKey) -> ClusterResult<Option<LiveObject>>;

    /// Create or update an object, returning the stored form.
    async fn apply(
        &self,
        desired: &DesiredObject,
        options: ApplyOptions,
    ) -> ClusterResult<LiveObject>;

    /// Delete an object. Absent objects are a no-op.
    async fn delete(&self, key: &ObjectKey) -> ClusterResult<()>;
}
