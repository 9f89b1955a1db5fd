//! Project allow-list validation gate.
//!
//! Every Application must validate against exactly one Project's
//! allow-lists before any sync is permitted; a violation is a hard
//! reject, never a partial apply. Evaluation produces a
//! [`ProjectVerdict`] carrying every violation found.

use serde::{Deserialize, Serialize};

use harbormaster_cluster::DesiredObject;

use crate::domain::app::{Application, Destination};

/// A named scope constraining where Applications may pull from and
/// deploy to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    /// Allowed source repository patterns (`*` wildcard).
    pub source_repos: Vec<String>,
    /// Allowed (target, namespace) pairs (`*` wildcard per field).
    pub destinations: Vec<Destination>,
    /// Allowed object kinds; `["*"]` allows all.
    pub allowed_kinds: Vec<String>,
}

/// Which allow-list a violation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectRule {
    SourceRepo,
    Destination,
    Kind,
}

/// A single allow-list violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectViolation {
    pub rule: ProjectRule,
    pub reason: String,
}

/// The outcome of validating an Application against a Project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectVerdict {
    /// Violations found (empty when allowed).
    pub violations: Vec<ProjectViolation>,
}

impl ProjectVerdict {
    fn pass() -> Self {
        Self {
            violations: Vec::new(),
        }
    }

    /// Whether the Application is allowed (no violations).
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

impl std::fmt::Display for ProjectVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.violations.is_empty() {
            return write!(f, "allowed");
        }
        let reasons: Vec<&str> = self.violations.iter().map(|v| v.reason.as_str()).collect();
        write!(f, "{}", reasons.join("; "))
    }
}

/// Validate an Application and its rendered object set against a
/// Project snapshot.
///
/// The Project is passed as an explicit immutable value; validation
/// never reads ambient shared state.
pub fn validate_app(
    project: &Project,
    app: &Application,
    desired: &[DesiredObject],
) -> ProjectVerdict {
    let mut violations = Vec::new();

    if !project
        .source_repos
        .iter()
        .any(|pattern| pattern_matches(pattern, &app.source.repo_ref))
    {
        violations.push(ProjectViolation {
            rule: ProjectRule::SourceRepo,
            reason: format!(
                "source repo {} is not allowed by project {}",
                app.source.repo_ref, project.name
            ),
        });
    }

    if !project.destinations.iter().any(|d| {
        pattern_matches(&d.target, &app.destination.target)
            && pattern_matches(&d.namespace, &app.destination.namespace)
    }) {
        violations.push(ProjectViolation {
            rule: ProjectRule::Destination,
            reason: format!(
                "destination {}/{} is not allowed by project {}",
                app.destination.target, app.destination.namespace, project.name
            ),
        });
    }

    for obj in desired {
        if !project
            .allowed_kinds
            .iter()
            .any(|pattern| pattern_matches(pattern, &obj.key.kind))
        {
            violations.push(ProjectViolation {
                rule: ProjectRule::Kind,
                reason: format!(
                    "kind {} ({}) is not allowed by project {}",
                    obj.key.kind, obj.key, project.name
                ),
            });
        }
    }

    if violations.is_empty() {
        ProjectVerdict::pass()
    } else {
        ProjectVerdict { violations }
    }
}

/// Glob match where `*` matches any run of characters.
fn pattern_matches(pattern: &str, value: &str) -> bool {
    fn matches(pattern: &[u8], value: &[u8]) -> bool {
        match (pattern.first(), value.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                matches(&pattern[1..], value)
                    || (!value.is_empty() && matches(pattern, &value[1..]))
            }
            (Some(p), Some(v)) if p == v => matches(&pattern[1..], &value[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), value.as_bytes())
}
