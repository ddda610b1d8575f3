//! Volume chains.

use super::common::{delete_plan, updating_call};
use super::{ChainContext, ChainPlan, ChainSpec, DetailChange, Family, PreApply};
use crate::backend::{runtime, BackendMethod};
use crate::jobs::Hook;
use crate::model::{Resource, ResourceId, Transition};
use crate::orchestrator::OrchestratorError;
use crate::tasks::{MethodCall, TaskSpec};
use std::time::Duration;

fn poll_volume(volume: ResourceId, success: &str) -> TaskSpec {
    TaskSpec::poll(
        volume,
        BackendMethod::PullVolumeRuntimeState,
        success,
        runtime::VOLUME_ERROR,
    )
}

/// Branch creating one volume and waiting until it is available. Volumes
/// restored from a snapshot pass the snapshot along.
pub(super) fn create_steps(volume: &Resource, countdown: Duration) -> Vec<TaskSpec> {
    let id = volume.id();
    let mut call = MethodCall::new(BackendMethod::CreateVolume)
        .with_transition(Transition::BeginCreating)
        .throttled();
    if let Some(snapshot) = volume.as_volume().and_then(|v| v.source_snapshot) {
        call = call.with_related([snapshot]);
    }
    vec![
        TaskSpec::method(id, call),
        poll_volume(id, runtime::VOLUME_AVAILABLE).with_countdown(countdown),
    ]
}

pub(super) fn create(ctx: &ChainContext<'_>, volume: &Resource) -> Result<ChainSpec, OrchestratorError> {
    let id = volume.id();
    let mut plan = ChainPlan::new().then_all(create_steps(volume, ctx.timings.volume_poll_countdown));
    if volume.as_volume().is_some_and(|v| v.source_snapshot.is_some()) {
        // Bootable flag and device come from the snapshot.
        plan = plan.then(TaskSpec::call(id, BackendMethod::PullVolume, None));
    }
    Ok(ChainSpec::new(volume, "create", Family::Create, plan))
}

pub(super) fn delete(ctx: &ChainContext<'_>, volume: &Resource) -> Result<ChainSpec, OrchestratorError> {
    if let Some(instance) = volume.as_volume().and_then(|v| v.instance) {
        if volume.has_backend_id() && ctx.repository.get(instance).is_ok() {
            return Err(OrchestratorError::DependentResources(format!(
                "Volume {} is attached to instance {}",
                volume.id(),
                instance
            )));
        }
    }
    let plan = delete_plan(
        volume,
        BackendMethod::DeleteVolume,
        Some(BackendMethod::IsVolumeDeleted),
    );
    Ok(ChainSpec::new(volume, "delete", Family::Delete, plan))
}

/// Extends a volume, detaching it from its instance for the duration.
pub(super) fn extend(
    ctx: &ChainContext<'_>,
    volume: &Resource,
    new_size: u64,
) -> Result<ChainSpec, OrchestratorError> {
    let id = volume.id();
    let details = volume
        .as_volume()
        .ok_or_else(|| OrchestratorError::InvalidRequest(format!("{} is not a volume", volume)))?;
    if new_size <= details.size {
        return Err(OrchestratorError::InvalidRequest(format!(
            "New volume size should be greater than the current size {}",
            details.size
        )));
    }

    let extend = TaskSpec::method(
        id,
        MethodCall::new(BackendMethod::ExtendVolume).with_param("new_size", new_size),
    );

    let Some(instance_id) = details.instance else {
        let plan = ChainPlan::new()
            .then(TaskSpec::method(
                id,
                MethodCall::new(BackendMethod::ExtendVolume)
                    .with_transition(Transition::BeginUpdating)
                    .with_param("new_size", new_size),
            ))
            .then(poll_volume(id, runtime::VOLUME_AVAILABLE));
        return Ok(
            ChainSpec::new(volume, "extend", Family::Action("Extend".into()), plan)
                .with_change(id, DetailChange::VolumeSize(new_size))
                .on_failure(Hook::VolumeExtendErred {
                    volume: id,
                    instance: None,
                }),
        );
    };

    let instance = ctx.get(instance_id)?;
    let device = details.device.clone();
    let plan = ChainPlan::new()
        .then(TaskSpec::transition(instance_id, Transition::BeginUpdating))
        .then(updating_call(id, BackendMethod::DetachVolume))
        .then(poll_volume(id, runtime::VOLUME_AVAILABLE))
        .then(extend)
        .then(poll_volume(id, runtime::VOLUME_AVAILABLE))
        .then(TaskSpec::method(
            id,
            MethodCall::new(BackendMethod::AttachVolume)
                .with_param("device", &device)
                .with_related([instance_id]),
        ))
        .then(poll_volume(id, runtime::VOLUME_IN_USE));

    Ok(
        ChainSpec::new(volume, "extend", Family::Action("Extend".into()), plan)
            .with_pre_apply(
                PreApply::new(instance.id(), Transition::ScheduleUpdating)
                    .with_action("Extend volume")
                    .with_detail("volume", id),
            )
            .with_change(id, DetailChange::VolumeSize(new_size))
            .on_success(Hook::All(vec![Hook::SetOk(id), Hook::SetOk(instance_id)]))
            .on_failure(Hook::VolumeExtendErred {
                volume: id,
                instance: Some(instance_id),
            }),
    )
}

pub(super) fn attach(
    ctx: &ChainContext<'_>,
    volume: &Resource,
    instance: ResourceId,
    device: &str,
) -> Result<ChainSpec, OrchestratorError> {
    if volume.as_volume().is_some_and(|v| v.instance.is_some()) {
        return Err(OrchestratorError::InvalidRequest(format!(
            "Volume {} is already attached",
            volume.id()
        )));
    }
    let instance = ctx.get(instance)?;
    if !instance.has_backend_id() {
        return Err(OrchestratorError::InvalidRequest(format!(
            "Instance {} does not exist at backend yet",
            instance.id()
        )));
    }

    let id = volume.id();
    let plan = ChainPlan::new()
        .then(TaskSpec::method(
            id,
            MethodCall::new(BackendMethod::AttachVolume)
                .with_transition(Transition::BeginUpdating)
                .with_param("device", device)
                .with_related([instance.id()]),
        ))
        .then(poll_volume(id, runtime::VOLUME_IN_USE))
        .then(TaskSpec::call(id, BackendMethod::PullVolume, None));
    Ok(ChainSpec::new(volume, "attach", Family::Action("Attach".into()), plan))
}

pub(super) fn detach(volume: &Resource) -> Result<ChainSpec, OrchestratorError> {
    if volume.as_volume().is_some_and(|v| v.instance.is_none()) {
        return Err(OrchestratorError::InvalidRequest(format!(
            "Volume {} is not attached",
            volume.id()
        )));
    }
    let id = volume.id();
    let plan = ChainPlan::new()
        .then(updating_call(id, BackendMethod::DetachVolume))
        .then(poll_volume(id, runtime::VOLUME_AVAILABLE));
    Ok(ChainSpec::new(volume, "detach", Family::Action("Detach".into()), plan))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::testing::Graph;
    use crate::chains::ChainTimings;
    use crate::repository::ResourceRepository;

    fn names(spec: &ChainSpec) -> Vec<Vec<Vec<String>>> {
        spec.plan.describe()
    }

    #[test]
    fn test_create_polls_after_countdown() {
        let graph = Graph::new();
        let ctx = ChainContext::new(&graph.repository, ChainTimings::default());
        let volume = graph.volume("data", None, false);

        let spec = create(&ctx, &volume).unwrap();
        let steps: Vec<_> = spec.plan.specs().collect();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].countdown, ChainTimings::default().volume_poll_countdown);
        assert!(spec.pre_apply.is_empty());
        assert_eq!(spec.on_failure, Hook::SetErred(volume.id()));
    }

    #[test]
    fn test_extend_attached_volume() {
        let graph = Graph::new();
        let ctx = ChainContext::new(&graph.repository, ChainTimings::default());
        let vm = graph.instance("vm");
        let vm = graph.materialize(vm.id(), "srv-1");
        let volume = graph.volume("data", Some(vm.id()), false);
        graph
            .repository
            .modify(volume.id(), &mut |r| {
                r.as_volume_mut().unwrap().device = "/dev/vdb".into();
                Ok(())
            })
            .unwrap();
        let volume = graph.materialize(volume.id(), "vol-1");
        let (v, i) = (volume.id(), vm.id());

        let spec = extend(&ctx, &volume, 20480).unwrap();
        assert_eq!(
            names(&spec),
            vec![vec![vec![
                format!("begin_updating({})", i),
                format!("detach_volume({})", v),
                format!("poll_runtime_state({})", v),
                format!("extend_volume({})", v),
                format!("poll_runtime_state({})", v),
                format!("attach_volume({})", v),
                format!("poll_runtime_state({})", v),
            ]]]
        );

        let attach = spec.plan.specs().nth(5).unwrap();
        let crate::tasks::TaskOp::Method(call) = &attach.op else {
            panic!("attach is a method call");
        };
        assert_eq!(call.params.get("device").map(String::as_str), Some("/dev/vdb"));

        assert_eq!(spec.pre_apply.len(), 2);
        assert_eq!(spec.pre_apply[1].resource, i);
        assert_eq!(spec.pre_apply[1].action.as_deref(), Some("Extend volume"));
        assert_eq!(
            spec.on_failure,
            Hook::VolumeExtendErred {
                volume: v,
                instance: Some(i)
            }
        );
    }

    #[test]
    fn test_extend_rejects_shrinking() {
        let graph = Graph::new();
        let ctx = ChainContext::new(&graph.repository, ChainTimings::default());
        let volume = graph.volume("data", None, false);
        assert!(matches!(
            extend(&ctx, &volume, 1024),
            Err(OrchestratorError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_attached_volume_cannot_be_deleted() {
        let graph = Graph::new();
        let ctx = ChainContext::new(&graph.repository, ChainTimings::default());
        let vm = graph.instance("vm");
        let volume = graph.volume("data", Some(vm.id()), false);
        let volume = graph.materialize(volume.id(), "vol-1");
        assert!(matches!(
            delete(&ctx, &volume),
            Err(OrchestratorError::DependentResources(_))
        ));
    }
}
