//! Sync orchestration: plan construction and ordered execution.

pub mod executor;
pub mod plan;

pub use executor::{CancelFlag, SyncOptions, SyncOrchestrator};
pub use plan::{build_plan, kind_priority, PlannedApply, PlannedDelete, SyncPlan, Wave,
    KIND_APPLY_ORDER};
