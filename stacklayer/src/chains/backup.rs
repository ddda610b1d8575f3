//! Backup chains.
//!
//! A backup is a set of snapshots, one per instance volume. It is created
//! and deleted with them: the backup only reaches OK after every snapshot
//! did, and deleting it removes every snapshot first.

use super::timings::ChainTimings;
use super::{snapshot, ChainContext, ChainPlan, ChainSpec, Family, PreApply};
use crate::jobs::Hook;
use crate::model::{Resource, ResourceState, Transition};
use crate::orchestrator::OrchestratorError;
use crate::tasks::TaskSpec;

pub(super) fn create(ctx: &ChainContext<'_>, backup: &Resource) -> Result<ChainSpec, OrchestratorError> {
    let id = backup.id();
    let snapshots = ctx.repository.snapshots_of(id);
    if snapshots.is_empty() {
        return Err(OrchestratorError::InvalidRequest(format!(
            "Backup {} has no snapshots",
            id
        )));
    }

    let branches = snapshots
        .iter()
        .enumerate()
        .map(|(index, s)| {
            let countdown = ChainTimings::first_only(ctx.timings.snapshot_poll_countdown, index);
            let mut branch = snapshot::create_steps(s, countdown);
            branch.push(TaskSpec::transition(s.id(), Transition::SetOk));
            branch
        })
        .collect();

    let plan = ChainPlan::new()
        .then(TaskSpec::transition(id, Transition::BeginCreating))
        .fan_out(branches);
    Ok(ChainSpec::new(backup, "create", Family::Create, plan)
        .on_failure(Hook::SetBackupErred(id)))
}

/// Deletes every snapshot at the backend, confirms, removes the rows, then
/// the backup itself.
pub(super) fn delete(
    ctx: &ChainContext<'_>,
    backup: &Resource,
    force: bool,
) -> Result<ChainSpec, OrchestratorError> {
    let id = backup.id();
    let snapshots = ctx.repository.snapshots_of(id);
    let busy = snapshots
        .iter()
        .find(|s| !s.state().is_stable() && s.state() != ResourceState::DeletionScheduled);
    if let Some(busy) = busy {
        return Err(OrchestratorError::IllegalTransition {
            resource: busy.id(),
            operation: "delete",
            state: busy.state(),
        });
    }

    let branches = snapshots
        .iter()
        .map(|s| {
            let mut steps: Vec<TaskSpec> = snapshot::delete_steps(s).specs().cloned().collect();
            steps.push(TaskSpec::delete(s.id()));
            steps
        })
        .collect();

    let plan = ChainPlan::new()
        .then(TaskSpec::transition(id, Transition::BeginDeleting))
        .fan_out(branches);

    let mut spec = ChainSpec::new(backup, "delete", Family::Delete, plan).on_failure(if force {
        Hook::ForceDeleteBackup(id)
    } else {
        Hook::SetBackupErred(id)
    });
    // Snapshots show as scheduled for deletion as soon as the call returns.
    for s in snapshots.iter().filter(|s| s.state() != ResourceState::DeletionScheduled) {
        spec = spec.with_pre_apply(PreApply::new(s.id(), Transition::ScheduleDeleting));
    }
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::testing::Graph;
    use crate::model::{BackupDetails, ResourceDetails, SnapshotDetails};
    use std::time::Duration;

    fn backup_with_snapshots(graph: &Graph, count: usize) -> (Resource, Vec<Resource>) {
        let vm = graph.instance("vm");
        let backup = graph.insert(
            "Backup#1 of vm",
            ResourceDetails::Backup(BackupDetails {
                instance: Some(vm.id()),
                ..Default::default()
            }),
        );
        let snapshots = (0..count)
            .map(|i| {
                let volume = graph.volume(&format!("vol-{}", i), Some(vm.id()), i == 0);
                graph.insert(
                    &format!("snap-{}", i),
                    ResourceDetails::Snapshot(SnapshotDetails {
                        size: 10240,
                        source_volume: Some(volume.id()),
                        backup: Some(backup.id()),
                        ..Default::default()
                    }),
                )
            })
            .collect();
        (backup, snapshots)
    }

    #[test]
    fn test_create_fans_out_per_snapshot() {
        let graph = Graph::new();
        let ctx = ChainContext::new(&graph.repository, ChainTimings::default());
        let (backup, snapshots) = backup_with_snapshots(&graph, 2);

        let spec = create(&ctx, &backup).unwrap();
        assert_eq!(spec.plan.stage_count(), 2);
        let branches = &spec.plan.stages()[1];
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[0][1].countdown, Duration::from_secs(10));
        assert_eq!(branches[1][1].countdown, Duration::ZERO);
        assert_eq!(branches[1][2], TaskSpec::transition(snapshots[1].id(), Transition::SetOk));
        assert_eq!(spec.on_failure, Hook::SetBackupErred(backup.id()));
    }

    #[test]
    fn test_delete_schedules_snapshots_and_picks_failure_hook() {
        let graph = Graph::new();
        let ctx = ChainContext::new(&graph.repository, ChainTimings::default());
        let (backup, snapshots) = backup_with_snapshots(&graph, 2);
        let backup = graph.materialize(backup.id(), "");
        for (i, s) in snapshots.iter().enumerate() {
            graph.materialize(s.id(), &format!("snap-{}", i));
        }

        let spec = delete(&ctx, &backup, false).unwrap();
        assert_eq!(spec.pre_apply.len(), 3);
        assert_eq!(spec.on_failure, Hook::SetBackupErred(backup.id()));
        assert_eq!(spec.on_success, Hook::Delete(backup.id()));
        let branch = &spec.plan.stages()[1][0];
        assert_eq!(
            branch.iter().map(TaskSpec::name).collect::<Vec<_>>(),
            vec![
                format!("delete_snapshot({})", snapshots[0].id()),
                format!("is_snapshot_deleted({})", snapshots[0].id()),
                format!("delete_row({})", snapshots[0].id()),
            ]
        );

        let forced = delete(&ctx, &backup, true).unwrap();
        assert_eq!(forced.on_failure, Hook::ForceDeleteBackup(backup.id()));
    }
}
