//! Desired/live diffing: delta computation and field-path scrubbing.

pub mod engine;
pub mod ignore;

pub use engine::{diff, has_drift, Delta, DiffConfig};
pub use ignore::{apply_ignore_rules, scrub_path, scrub_system_fields, SYSTEM_FIELD_PATHS};
