//! Object model shared between the reconciliation engine and the
//! target-environment client.
//!
//! Desired and live objects are `(kind, namespace, name)` keyed records
//! with a structured JSON body. The key is the join key between the
//! rendered desired set and the observed live set.

use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::RenderError;

/// Annotation carrying the integer sync-wave of an object (default 0).
pub const WAVE_ANNOTATION: &str = "harbormaster.io/sync-wave";

/// Annotation tagging an object as a lifecycle hook (`pre_sync`,
/// `sync`, `post_sync`).
pub const HOOK_ANNOTATION: &str = "harbormaster.io/hook";

/// Label stamped onto every applied object to mark ownership by an
/// Application. The Live State Observer selects on it.
pub const MANAGED_BY_LABEL: &str = "harbormaster.io/application";

/// Identity key joining desired and live objects.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Lifecycle phase a hook object is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    PreSync,
    Sync,
    PostSync,
}

impl HookPhase {
    fn from_annotation(value: &str) -> Option<Self> {
        match value {
            "pre_sync" | "PreSync" => Some(HookPhase::PreSync),
            "sync" | "Sync" => Some(HookPhase::Sync),
            "post_sync" | "PostSync" => Some(HookPhase::PostSync),
            _ => None,
        }
    }
}

impl std::fmt::Display for HookPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookPhase::PreSync => write!(f, "pre_sync"),
            HookPhase::Sync => write!(f, "sync"),
            HookPhase::PostSync => write!(f, "post_sync"),
        }
    }
}

/// Reference to a versioned source of desired state.
///
/// Consumed by the external renderer: `(repo_ref, revision, path,
/// params)` → list of target manifests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Repository locator (e.g. a git URL or registry coordinate).
    pub repo_ref: String,
    /// Revision to render (e.g. a commit SHA or tag).
    pub revision: String,
    /// Path within the repository.
    pub path: String,
    /// Render parameters forwarded verbatim to the renderer.
    #[serde(default)]
    pub params: std::collections::BTreeMap<String, String>,
}

/// A rendered target manifest with its ordering and lifecycle tags
/// resolved at construction time.
///
/// The `wave` and `hook` tags are parsed once from the well-known
/// annotations so downstream consumers never re-inspect the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredObject {
    pub key: ObjectKey,
    /// Full manifest body, including metadata.
    pub body: serde_json::Value,
    /// Sync wave; waves apply ascending with a barrier between them.
    pub wave: i64,
    /// Lifecycle phase when this object is a hook rather than a normal
    /// resource.
    pub hook: Option<HookPhase>,
}

impl DesiredObject {
    /// Build a desired object from a rendered manifest body.
    ///
    /// The body must carry `kind` and `metadata.name`; a missing
    /// `metadata.namespace` defaults to `fallback_namespace` (the
    /// Application's destination namespace).
    pub fn from_manifest(
        body: serde_json::Value,
        fallback_namespace: &str,
    ) -> Result<Self, RenderError> {
        let kind = body
            .get("kind")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RenderError::MalformedManifest("missing `kind`".to_string()))?
            .to_string();
        let metadata = body
            .get("metadata")
            .ok_or_else(|| RenderError::MalformedManifest("missing `metadata`".to_string()))?;
        let name = metadata
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RenderError::MalformedManifest("missing `metadata.name`".to_string()))?
            .to_string();
        let namespace = metadata
            .get("namespace")
            .and_then(|v| v.as_str())
            .unwrap_or(fallback_namespace)
            .to_string();

        let wave = annotation(&body, WAVE_ANNOTATION)
            .map(|raw| {
                raw.parse::<i64>().map_err(|_| RenderError::MalformedManifest(
                    format!("annotation {} is not an integer: {}", WAVE_ANNOTATION, raw),
                ))
            })
            .transpose()?
            .unwrap_or(0);

        let hook = match annotation(&body, HOOK_ANNOTATION) {
            Some(raw) => Some(HookPhase::from_annotation(raw).ok_or_else(|| {
                RenderError::MalformedManifest(format!(
                    "annotation {} has unknown phase: {}",
                    HOOK_ANNOTATION, raw
                ))
            })?),
            None => None,
        };

        Ok(Self {
            key: ObjectKey::new(kind, namespace, name),
            body,
            wave,
            hook,
        })
    }

    /// True when this object is bound to a lifecycle phase instead of
    /// the normal wave sequence.
    pub fn is_hook(&self) -> bool {
        self.hook.is_some()
    }
}

/// An object observed in the target environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveObject {
    pub key: ObjectKey,
    /// Full observed body, including the platform-maintained `status`
    /// sub-record.
    pub body: serde_json::Value,
}

impl LiveObject {
    pub fn new(key: ObjectKey, body: serde_json::Value) -> Self {
        Self { key, body }
    }

    /// Observed status sub-record, if the platform has populated one.
    pub fn status(&self) -> Option<&serde_json::Value> {
        self.body.get("status")
    }

    /// Look up a metadata label.
    pub fn label(&self, label: &str) -> Option<&str> {
        self.body
            .pointer(&format!("/metadata/labels/{}", escape_pointer_segment(label)))
            .and_then(|v| v.as_str())
    }

    /// Declared sync-wave of this object (default 0). Used for
    /// reverse-wave prune ordering.
    pub fn wave(&self) -> i64 {
        annotation(&self.body, WAVE_ANNOTATION)
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(0)
    }

    /// True when the observed object carries a lifecycle-hook
    /// annotation (a leftover of a previous run's hook).
    pub fn is_hook(&self) -> bool {
        annotation(&self.body, HOOK_ANNOTATION).is_some()
    }
}

fn annotation<'a>(body: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    body.pointer(&format!(
        "/metadata/annotations/{}",
        escape_pointer_segment(key)
    ))
    .and_then(|v| v.as_str())
}

// RFC 6901: `~` → `~0`, `/` → `~1`.
fn escape_pointer_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Content digest over a rendered manifest set (SHA-256 hex).
///
/// Recorded on each sync result so an audit can tell whether two
/// revisions rendered to identical content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManifestDigest(String);

impl ManifestDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ManifestDigest(hex::encode(hasher.finalize()))
    }

    /// Digest a rendered manifest set, independent of render order.
    pub fn of_manifests(objects: &[DesiredObject]) -> Self {
        let mut entries: Vec<String> = objects
            .iter()
            .map(|o| format!("{}\n{}", o.key, o.body))
            .collect();
        entries.sort();
        Self::from_bytes(entries.join("\n---\n").as_bytes())
    }

    /// Full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for ManifestDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_manifest_parses_key_and_tags() {
        let body = json!({
            "kind": "Deployment",
            "metadata": {
                "name": "api",
                "namespace": "prod",
                "annotations": {
                    WAVE_ANNOTATION: "2",
                    HOOK_ANNOTATION: "pre_sync",
                }
            },
            "spec": { "replicas": 3 }
        });
        let obj = DesiredObject::from_manifest(body, "default").unwrap();
        assert_eq!(obj.key, ObjectKey::new("Deployment", "prod", "api"));
        assert_eq!(obj.wave, 2);
        assert_eq!(obj.hook, Some(HookPhase::PreSync));
        assert!(obj.is_hook());
    }

    #[test]
    fn test_from_manifest_defaults() {
        let body = json!({
            "kind": "ConfigMap",
            "metadata": { "name": "settings" }
        });
        let obj = DesiredObject::from_manifest(body, "staging").unwrap();
        assert_eq!(obj.key.namespace, "staging");
        assert_eq!(obj.wave, 0);
        assert!(obj.hook.is_none());
    }

    #[test]
    fn test_from_manifest_rejects_missing_name() {
        let body = json!({ "kind": "ConfigMap", "metadata": {} });
        let err = DesiredObject::from_manifest(body, "default").unwrap_err();
        assert!(err.to_string().contains("metadata.name"));
    }

    #[test]
    fn test_from_manifest_rejects_bad_wave() {
        let body = json!({
            "kind": "ConfigMap",
            "metadata": {
                "name": "settings",
                "annotations": { WAVE_ANNOTATION: "soon" }
            }
        });
        assert!(DesiredObject::from_manifest(body, "default").is_err());
    }

    #[test]
    fn test_live_object_label_and_wave() {
        let live = LiveObject::new(
            ObjectKey::new("Service", "prod", "web"),
            json!({
                "kind": "Service",
                "metadata": {
                    "name": "web",
                    "labels": { MANAGED_BY_LABEL: "shop" },
                    "annotations": { WAVE_ANNOTATION: "-1" }
                }
            }),
        );
        assert_eq!(live.label(MANAGED_BY_LABEL), Some("shop"));
        assert_eq!(live.wave(), -1);
    }

    #[test]
    fn test_manifest_digest_order_independent() {
        let a = DesiredObject::from_manifest(
            json!({ "kind": "ConfigMap", "metadata": { "name": "a" } }),
            "ns",
        )
        .unwrap();
        let b = DesiredObject::from_manifest(
            json!({ "kind": "ConfigMap", "metadata": { "name": "b" } }),
            "ns",
        )
        .unwrap();

        let d1 = ManifestDigest::of_manifests(&[a.clone(), b.clone()]);
        let d2 = ManifestDigest::of_manifests(&[b, a]);
        assert_eq!(d1, d2);
        assert_eq!(d1.short().len(), 12);
    }
}
