//! File-backed collaborator implementations for offline operation.
//!
//! `FsCluster` persists live objects as JSON files so the CLI can sync
//! against a directory standing in for a target environment.
//! `DirRenderer` serves pre-rendered manifests from a
//! `<root>/<path>/<revision>/` layout; rendering itself (templating)
//! stays external.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::error::{ClusterError, ClusterResult, RenderError};
use crate::object::{DesiredObject, LiveObject, ObjectKey, SourceRef};
use crate::traits::{ApplyOptions, ClusterClient, Renderer};

// ---------------------------------------------------------------------------
// FsCluster
// ---------------------------------------------------------------------------

/// Filesystem-backed target environment.
///
/// Layout: `<root>/<namespace>/<kind>/<name>.json`
pub struct FsCluster {
    root: PathBuf,
}

impl FsCluster {
    /// Create a store rooted at `root`. Creates the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> ClusterResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn object_path(&self, key: &ObjectKey) -> PathBuf {
        self.root
            .join(&key.namespace)
            .join(&key.kind)
            .join(format!("{}.json", key.name))
    }
}

#[async_trait]
impl ClusterClient for FsCluster {
    async fn list(&self, kind: &str, namespace: &str) -> ClusterResult<Vec<LiveObject>> {
        let dir = self.root.join(namespace).join(kind);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut objects = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json") != Some(true) {
                continue;
            }
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| ClusterError::Malformed(format!("bad file name: {:?}", path)))?
                .to_string();
            let body: serde_json::Value = serde_json::from_slice(&fs::read(&path)?)?;
            objects.push(LiveObject::new(ObjectKey::new(kind, namespace, name), body));
        }
        // read_dir order is platform-dependent
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn get(&self, key: &ObjectKey) -> ClusterResult<Option<LiveObject>> {
        let path = self.object_path(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(LiveObject::new(
                key.clone(),
                serde_json::from_slice(&bytes)?,
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ClusterError::Io(e)),
        }
    }

    async fn apply(
        &self,
        desired: &DesiredObject,
        _options: ApplyOptions,
    ) -> ClusterResult<LiveObject> {
        let path = self.object_path(&desired.key);
        let dir = path.parent().ok_or_else(|| {
            ClusterError::Malformed(format!("object path has no parent: {:?}", path))
        })?;
        fs::create_dir_all(dir)?;

        // Atomic write: temp file in the same directory, then rename.
        let json = serde_json::to_vec_pretty(&desired.body)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.persist(&path).map_err(|e| ClusterError::Io(e.error))?;

        Ok(LiveObject::new(desired.key.clone(), desired.body.clone()))
    }

    async fn delete(&self, key: &ObjectKey) -> ClusterResult<()> {
        let path = self.object_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ClusterError::Io(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// DirRenderer
// ---------------------------------------------------------------------------

/// Renderer serving pre-rendered manifest files.
///
/// Layout: `<root>/<source.path>/<source.revision>/*.json`, each file
/// holding one manifest object or an array of them. The render param
/// `namespace`, when present, supplies the namespace default for
/// manifests that do not declare one.
pub struct DirRenderer {
    root: PathBuf,
}

impl DirRenderer {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Renderer for DirRenderer {
    async fn render(&self, source: &SourceRef) -> Result<Vec<DesiredObject>, RenderError> {
        let dir = self.root.join(&source.path).join(&source.revision);
        if !dir.is_dir() {
            return Err(RenderError::UnknownRevision {
                repo_ref: source.repo_ref.clone(),
                revision: source.revision.clone(),
            });
        }

        let fallback_namespace = source
            .params
            .get("namespace")
            .map(String::as_str)
            .unwrap_or("default");

        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "json") == Some(true))
            .collect();
        paths.sort();

        let mut objects = Vec::new();
        for path in paths {
            let value: serde_json::Value = serde_json::from_slice(&fs::read(&path)?)?;
            match value {
                serde_json::Value::Array(items) => {
                    for item in items {
                        objects.push(DesiredObject::from_manifest(item, fallback_namespace)?);
                    }
                }
                body => objects.push(DesiredObject::from_manifest(body, fallback_namespace)?),
            }
        }
        Ok(objects)
    }
}
