//! Snapshot chains.

use super::common::delete_plan;
use super::{ChainContext, ChainPlan, ChainSpec, Family};
use crate::backend::{runtime, BackendMethod};
use crate::model::{Resource, Transition};
use crate::orchestrator::OrchestratorError;
use crate::tasks::{MethodCall, TaskSpec};
use std::time::Duration;

/// Throttled create of one snapshot from its source volume, then a poll.
pub(super) fn create_steps(snapshot: &Resource, countdown: Duration) -> Vec<TaskSpec> {
    let id = snapshot.id();
    let mut call = MethodCall::new(BackendMethod::CreateSnapshot)
        .with_transition(Transition::BeginCreating)
        .throttled();
    if let Some(volume) = snapshot.as_snapshot().and_then(|s| s.source_volume) {
        call = call.with_related([volume]);
    }
    vec![
        TaskSpec::method(id, call),
        TaskSpec::poll(
            id,
            BackendMethod::PullSnapshotRuntimeState,
            runtime::SNAPSHOT_AVAILABLE,
            runtime::SNAPSHOT_ERROR,
        )
        .with_countdown(countdown),
    ]
}

pub(super) fn create(ctx: &ChainContext<'_>, snapshot: &Resource) -> Result<ChainSpec, OrchestratorError> {
    let source = snapshot.as_snapshot().and_then(|s| s.source_volume);
    match source {
        Some(volume) if ctx.get(volume)?.has_backend_id() => {}
        _ => {
            return Err(OrchestratorError::NothingToRestore(format!(
                "Snapshot {} has no source volume at the backend",
                snapshot.id()
            )))
        }
    }
    let plan = ChainPlan::new().then_all(create_steps(snapshot, ctx.timings.snapshot_poll_countdown));
    Ok(ChainSpec::new(snapshot, "create", Family::Create, plan))
}

/// Backend delete and confirmation, without the final row removal.
pub(super) fn delete_steps(snapshot: &Resource) -> ChainPlan {
    delete_plan(
        snapshot,
        BackendMethod::DeleteSnapshot,
        Some(BackendMethod::IsSnapshotDeleted),
    )
}

pub(super) fn delete(snapshot: &Resource) -> Result<ChainSpec, OrchestratorError> {
    Ok(ChainSpec::new(
        snapshot,
        "delete",
        Family::Delete,
        delete_steps(snapshot),
    ))
}
