//! Harbormaster Cluster Layer
//!
//! Object model and collaborator contracts shared by the reconciliation
//! engine: desired/live object records, the `Renderer` and
//! `ClusterClient` traits, in-memory fakes for testing, and file-backed
//! implementations for offline operation.

pub mod error;
pub mod fakes;
pub mod fs;
pub mod object;
pub mod traits;

pub use error::{ClusterError, ClusterResult, RenderError};
pub use fs::{DirRenderer, FsCluster};
pub use object::{
    DesiredObject, HookPhase, LiveObject, ManifestDigest, ObjectKey, SourceRef, HOOK_ANNOTATION,
    MANAGED_BY_LABEL, WAVE_ANNOTATION,
};
pub use traits::{ApplyOptions, ClusterClient, Renderer};
