//! Field-path scrubbing applied before structural comparison.
//!
//! Two layers of exclusions exist: the user-declared ignore-rules on an
//! Application, and a fixed list of platform-injected system fields the
//! diff engine always scrubs regardless of user rules. Paths are JSON
//! pointers where `*` matches exactly one segment.

use serde_json::Value;

use harbormaster_cluster::ObjectKey;

use crate::domain::app::IgnoreRule;

/// Fields the live platform injects that must never produce a Modified
/// delta: server-maintained metadata, the whole observed status
/// sub-record, and the engine's own ownership marker label.
pub const SYSTEM_FIELD_PATHS: &[&str] = &[
    "/metadata/creationTimestamp",
    "/metadata/generation",
    "/metadata/resourceVersion",
    "/metadata/uid",
    "/metadata/managedFields",
    "/metadata/labels/harbormaster.io~1application",
    "/status",
];

/// Remove the field at `path` from `value`, if present. `*` matches
/// exactly one segment (any object key or array index).
pub fn scrub_path(value: &mut Value, path: &str) {
    let segments: Vec<String> = path
        .split('/')
        .skip(1)
        .map(unescape_segment)
        .collect();
    if !segments.is_empty() {
        scrub(value, &segments);
    }
}

/// Remove every system field from `value`.
pub fn scrub_system_fields(value: &mut Value) {
    for path in SYSTEM_FIELD_PATHS {
        scrub_path(value, path);
    }
}

/// Apply the ignore-rules scoped to `key` to `value`.
pub fn apply_ignore_rules(value: &mut Value, key: &ObjectKey, rules: &[IgnoreRule]) {
    for rule in rules.iter().filter(|r| rule_applies(r, key)) {
        scrub_path(value, &rule.path);
    }
}

fn rule_applies(rule: &IgnoreRule, key: &ObjectKey) -> bool {
    rule.kind.as_deref().map(|k| k == key.kind).unwrap_or(true)
        && rule.name.as_deref().map(|n| n == key.name).unwrap_or(true)
}

fn scrub(value: &mut Value, segments: &[String]) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    let wildcard = head == "*";

    if rest.is_empty() {
        match value {
            Value::Object(map) => {
                if wildcard {
                    map.clear();
                } else {
                    map.remove(head);
                }
            }
            Value::Array(items) => {
                if wildcard {
                    items.clear();
                } else if let Ok(index) = head.parse::<usize>() {
                    if index < items.len() {
                        items.remove(index);
                    }
                }
            }
            _ => {}
        }
        return;
    }

    match value {
        Value::Object(map) => {
            if wildcard {
                for child in map.values_mut() {
                    scrub(child, rest);
                }
            } else if let Some(child) = map.get_mut(head.as_str()) {
                scrub(child, rest);
            }
        }
        Value::Array(items) => {
            if wildcard {
                for child in items.iter_mut() {
                    scrub(child, rest);
                }
            } else if let Ok(index) = head.parse::<usize>() {
                if let Some(child) = items.get_mut(index) {
                    scrub(child, rest);
                }
            }
        }
        _ => {}
    }
}

// RFC 6901: `~1` → `/`, `~0` → `~`.
fn unescape_segment(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}
